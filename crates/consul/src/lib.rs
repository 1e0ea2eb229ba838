//! Runs a single-node Consul agent as the environment's coordination store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod api;
mod error;

pub use api::{ConsulApi, HttpConsulApi, REQUEST_TIMEOUT};
pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vivarium_data_loader::KvWriter;
use vivarium_service::{
    DEFAULT_HEALTHY_TIMEOUT_SECONDS, HEALTH_POLL_INTERVAL, HealthState, Readiness, ServiceBase,
    ServiceBaseOptions, SupportService, poll_until_ready,
};

static CONFIG_TEMPLATE: &str = include_str!("../templates/consul_server.hcl");

/// Service and binary name.
pub const NAME: &str = "consul";

/// Release version.
pub const VERSION: &str = "1.1.0";

/// HTTP port of the agent.
pub const PORT: u16 = 8500;

/// Name of the generated config file.
pub const CONFIG_FILE_NAME: &str = "consul_server.hcl";

/// Options for configuring a `ConsulService`.
#[derive(Clone, Debug)]
pub struct ConsulOptions {
    /// Workspace the agent lives in.
    pub workspace: PathBuf,

    /// Upper bound for a single health check.
    pub healthy_timeout_seconds: u64,
}

impl ConsulOptions {
    /// Default options for `workspace`.
    #[must_use]
    pub const fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            healthy_timeout_seconds: DEFAULT_HEALTHY_TIMEOUT_SECONDS,
        }
    }
}

/// Consul agent supervised as a local subprocess.
pub struct ConsulService {
    api: Arc<dyn ConsulApi>,
    base: ServiceBase,
}

impl ConsulService {
    /// Creates a service talking to the agent over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(options: ConsulOptions) -> Result<Self> {
        let base = Self::base_for(options);
        let api = Arc::new(HttpConsulApi::new(&base.record().address)?);

        Ok(Self { api, base })
    }

    /// Creates a service with a caller-supplied API client.
    #[must_use]
    pub fn with_api(options: ConsulOptions, api: Arc<dyn ConsulApi>) -> Self {
        Self {
            api,
            base: Self::base_for(options),
        }
    }

    /// Resolves the instance persisted in `workspace`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub async fn from_workspace(workspace: PathBuf) -> Result<Option<Self>> {
        let mut service = Self::new(ConsulOptions::new(workspace))?;

        if !service.read_record().await? {
            return Ok(None);
        }

        service.api = Arc::new(HttpConsulApi::new(service.address())?);

        Ok(Some(service))
    }

    fn base_for(options: ConsulOptions) -> ServiceBase {
        let ConsulOptions {
            workspace,
            healthy_timeout_seconds,
        } = options;

        let mut base = ServiceBase::new(ServiceBaseOptions {
            workspace,
            name: NAME.to_string(),
            version: VERSION.to_string(),
            address: format!("127.0.0.1:{PORT}"),
            config_file_name: CONFIG_FILE_NAME.to_string(),
            service_config: CONFIG_TEMPLATE.replace("{port}", &PORT.to_string()),
            healthy_timeout_seconds,
        });

        let command_line = format!(
            "\"{}\" agent -data-dir \"{}\" -config-file \"{}\"",
            base.binary_path().display(),
            base.record().data_dir.display(),
            base.config_path().display(),
        );
        base.set_command_line(command_line);

        base
    }
}

#[async_trait]
impl SupportService for ConsulService {
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
                Ok::<_, Error>(if api.autopilot_healthy().await? {
                    Readiness::Ready
                } else {
                    Readiness::Pending("autopilot reports unhealthy".to_string())
                })
            },
        )
        .await
    }
}

#[async_trait]
impl KvWriter for ConsulService {
    async fn write_key(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!(target: "consul", %key, "put");
        self.api.put_key(key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeConsul {
        health: Mutex<VecDeque<bool>>,
        probes: Mutex<u32>,
        puts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ConsulApi for FakeConsul {
        async fn autopilot_healthy(&self) -> Result<bool> {
            *self.probes.lock().unwrap() += 1;
            Ok(self.health.lock().unwrap().pop_front().unwrap_or(false))
        }

        async fn put_key(&self, key: &str, value: &str) -> Result<()> {
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn live_service(workspace: PathBuf, api: Arc<FakeConsul>) -> ConsulService {
        let mut service = ConsulService::with_api(
            ConsulOptions {
                workspace,
                healthy_timeout_seconds: 3,
            },
            api,
        );
        let mut record = service.record().clone();
        record.pid = Some(std::process::id());
        service.base_mut().set_record(record);
        service
    }

    #[test]
    fn paths_and_command_line() {
        let dir = tempdir().unwrap();
        let service = ConsulService::with_api(
            ConsulOptions::new(dir.path().to_path_buf()),
            Arc::new(FakeConsul::default()),
        );
        let record = service.record();

        assert_eq!(record.name, "consul");
        assert_eq!(record.address, "127.0.0.1:8500");
        assert_eq!(record.data_dir, dir.path().join("consul.d"));
        assert_eq!(record.log_file, dir.path().join("consul.log"));
        assert!(record.command_line.contains(" agent -data-dir "));
        assert!(record.command_line.contains("consul.d/consul_server.hcl"));
        assert!(record.download_url.contains("/consul/1.1.0/consul_1.1.0_"));
    }

    #[tokio::test]
    async fn generated_config_is_single_node_server() {
        let dir = tempdir().unwrap();
        let service = ConsulService::with_api(
            ConsulOptions::new(dir.path().to_path_buf()),
            Arc::new(FakeConsul::default()),
        );

        service.base().ensure_data_dir().await.unwrap();
        service.write_service_config().await.unwrap();

        let config = std::fs::read_to_string(service.base().config_path()).unwrap();
        assert!(config.contains("bootstrap_expect = 1"));
        assert!(config.contains("http = 8500"));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_autopilot_healthy() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeConsul::default());
        api.health.lock().unwrap().extend([false, false, true]);
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        assert_eq!(service.check_health().await, HealthState::Healthy);
        assert_eq!(*api.probes.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_healthy_times_out() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeConsul::default());
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        let started = tokio::time::Instant::now();
        assert_eq!(service.check_health().await, HealthState::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn dead_process_skips_readiness_probe() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeConsul::default());
        let service = ConsulService::with_api(
            ConsulOptions::new(dir.path().to_path_buf()),
            Arc::clone(&api) as Arc<dyn ConsulApi>,
        );

        assert_matches!(service.check_health().await, HealthState::Error(_));
        assert_eq!(*api.probes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_keys_through_api() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeConsul::default());
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        service.write_key("app/shop/abc/db", "x").await.unwrap();

        assert_eq!(
            *api.puts.lock().unwrap(),
            vec![("app/shop/abc/db".to_string(), "x".to_string())]
        );
    }

    #[tokio::test]
    async fn from_workspace_without_record_is_none() {
        let dir = tempdir().unwrap();
        assert!(
            ConsulService::from_workspace(dir.path().to_path_buf())
                .await
                .unwrap()
                .is_none()
        );
    }
}
