//! Generic lifecycle of a locally supervised support service.
//!
//! A service is provisioned into a workspace, launched as a detached
//! subprocess, health-checked, and described by a record on disk so a later
//! invocation can find it again.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod base;
mod download;
mod error;
mod health;
mod process;
mod record;

pub use base::{DEFAULT_HEALTHY_TIMEOUT_SECONDS, ServiceBase, ServiceBaseOptions};
pub use download::release_url;
pub use error::{Error, Result};
pub use health::{HEALTH_POLL_INTERVAL, HealthState, Readiness, poll_until_ready};
pub use process::{StopOutcome, is_alive};
pub use record::{ServiceRecord, read as read_record_file, write as write_record_file};

use async_trait::async_trait;
use tracing::{error, warn};

/// Lifecycle operations every supervised service supports.
///
/// Implementors compose a [`ServiceBase`] and only override the operations
/// whose behaviour differs, typically the health check and, for services
/// with extra persisted state, the record accessors.
#[async_trait]
pub trait SupportService: Send + Sync {
    /// Shared lifecycle state.
    fn base(&self) -> &ServiceBase;

    /// Shared lifecycle state, mutably.
    fn base_mut(&mut self) -> &mut ServiceBase;

    /// Full health check: liveness plus service-level readiness.
    async fn check_health(&self) -> HealthState;

    /// Service name.
    fn name(&self) -> &str {
        self.base().name()
    }

    /// `host:port` the service listens on.
    fn address(&self) -> &str {
        &self.base().record().address
    }

    /// The in-memory record.
    fn record(&self) -> &ServiceRecord {
        self.base().record()
    }

    /// Ensures the binary and data directory exist, downloading if needed.
    ///
    /// The generated config is written here as well, so it is in place
    /// before the first launch reads it.
    async fn init(&self) -> Result<()> {
        self.base().provision().await?;
        self.write_service_config().await
    }

    /// Fetches the binary into the workspace.
    async fn download(&self) -> Result<()> {
        self.base().download().await
    }

    /// Launches the service and persists the record.
    ///
    /// If the record cannot be written the just-launched process is stopped
    /// again, so no untracked process is left behind.
    async fn start(&mut self) -> Result<u32> {
        let pid = self.base_mut().launch()?;

        if let Err(e) = self.write_record().await {
            error!(service = %self.name(), pid, error = %e, "failed to persist record, stopping service");
            if let Err(stop_err) = self.stop() {
                warn!(service = %self.name(), pid, error = %stop_err, "compensating stop failed");
            }
            return Err(e);
        }

        Ok(pid)
    }

    /// Sends the graceful-stop signal. Missing or exited processes are no-ops.
    fn stop(&self) -> Result<StopOutcome> {
        self.base().stop()
    }

    /// Stops then starts. A failed stop aborts without starting.
    async fn restart(&mut self) -> Result<u32> {
        self.stop()?;
        self.start().await
    }

    /// Adopts the persisted record if there is one. Returns whether it was found.
    async fn read_record(&mut self) -> Result<bool> {
        self.base_mut().read_record().await
    }

    /// Persists the in-memory record.
    async fn write_record(&self) -> Result<()> {
        self.base().write_record().await
    }

    /// Writes the generated config into the data directory.
    async fn write_service_config(&self) -> Result<()> {
        self.base().write_service_config().await
    }
}
