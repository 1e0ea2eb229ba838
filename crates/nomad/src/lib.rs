//! Runs a combined server/client Nomad agent as the environment's scheduler.
//!
//! The agent is wired to the coordination store and to the secrets store,
//! so it can only be built once both are running.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod api;
mod error;

pub use api::{HttpNomadApi, NomadApi, REQUEST_TIMEOUT};
pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vivarium_service::{
    DEFAULT_HEALTHY_TIMEOUT_SECONDS, HEALTH_POLL_INTERVAL, HealthState, Readiness, ServiceBase,
    ServiceBaseOptions, SupportService, poll_until_ready,
};

static CONFIG_TEMPLATE: &str = include_str!("../templates/nomad_server.hcl");

/// Service and binary name.
pub const NAME: &str = "nomad";

/// Release version.
pub const VERSION: &str = "0.8.3";

/// HTTP port of the agent.
pub const PORT: u16 = 4646;

/// Name of the generated config file.
pub const CONFIG_FILE_NAME: &str = "nomad_server.hcl";

/// Options for configuring a `NomadService`.
#[derive(Clone, Debug)]
pub struct NomadOptions {
    /// Workspace the agent lives in.
    pub workspace: PathBuf,

    /// `host:port` of the coordination store.
    pub consul_address: String,

    /// `host:port` of the secrets store.
    pub vault_address: String,

    /// Root token of the secrets store.
    pub vault_token: String,

    /// Upper bound for a single health check.
    pub healthy_timeout_seconds: u64,
}

/// Nomad agent supervised as a local subprocess.
pub struct NomadService {
    api: Arc<dyn NomadApi>,
    base: ServiceBase,
}

impl NomadService {
    /// Creates a service talking to the agent over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(options: NomadOptions) -> Result<Self> {
        let base = Self::base_for(options);
        let api = Arc::new(HttpNomadApi::new(&base.record().address)?);

        Ok(Self { api, base })
    }

    /// Creates a service with a caller-supplied API client.
    #[must_use]
    pub fn with_api(options: NomadOptions, api: Arc<dyn NomadApi>) -> Self {
        Self {
            api,
            base: Self::base_for(options),
        }
    }

    /// Resolves the instance persisted in `workspace`, if any.
    ///
    /// The store and secrets wiring is not persisted, so the resolved
    /// instance is suitable for health checks and stopping, not for
    /// regenerating its config.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub async fn from_workspace(workspace: PathBuf) -> Result<Option<Self>> {
        let mut service = Self::new(NomadOptions {
            workspace,
            consul_address: String::new(),
            vault_address: String::new(),
            vault_token: String::new(),
            healthy_timeout_seconds: DEFAULT_HEALTHY_TIMEOUT_SECONDS,
        })?;

        if !service.read_record().await? {
            return Ok(None);
        }

        service.api = Arc::new(HttpNomadApi::new(service.address())?);

        Ok(Some(service))
    }

    fn base_for(options: NomadOptions) -> ServiceBase {
        let NomadOptions {
            workspace,
            consul_address,
            vault_address,
            vault_token,
            healthy_timeout_seconds,
        } = options;

        let service_config = CONFIG_TEMPLATE
            .replace("{consul_address}", &consul_address)
            .replace("{vault_address}", &vault_address)
            .replace("{vault_token}", &vault_token);

        let mut base = ServiceBase::new(ServiceBaseOptions {
            workspace,
            name: NAME.to_string(),
            version: VERSION.to_string(),
            address: format!("127.0.0.1:{PORT}"),
            config_file_name: CONFIG_FILE_NAME.to_string(),
            service_config,
            healthy_timeout_seconds,
        });

        let command_line = format!(
            "\"{}\" agent -data-dir \"{}\" -config \"{}\"",
            base.binary_path().display(),
            base.record().data_dir.display(),
            base.config_path().display(),
        );
        base.set_command_line(command_line);

        base
    }
}

#[async_trait]
impl SupportService for NomadService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ServiceBase {
        &mut self.base
    }

    async fn check_health(&self) -> HealthState {
        let liveness = self.base.liveness();
        if !liveness.is_healthy() {
            return liveness;
        }

        let api = &*self.api;
        poll_until_ready(
            NAME,
            self.base.healthy_timeout(),
            HEALTH_POLL_INTERVAL,
            move || async move {
                let leader = api.leader().await?;
                if leader.is_empty() {
                    return Ok::<_, Error>(Readiness::Pending(
                        "no leader elected yet".to_string(),
                    ));
                }

                debug!(target: "nomad", %leader, "leader elected");
                Ok(Readiness::Ready)
            },
        )
        .await
    }
}
