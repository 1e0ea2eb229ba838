//! Runs a dev-mode Vault server as the environment's secrets store.
//!
//! Every fresh instance gets a new random root token. The token is part of
//! the persisted record, so a resumed instance keeps talking to the server
//! with the token it was started with.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod api;
mod backend;
mod error;

pub use api::{HttpVaultApi, MountInfo, REQUEST_TIMEOUT, VaultApi, VaultHealth};
pub use backend::{BackendReconciliation, SECRET_KV_VERSION, SECRET_MOUNT, reconcile_secret_backend};
pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use vivarium_data_loader::KvWriter;
use vivarium_service::{
    DEFAULT_HEALTHY_TIMEOUT_SECONDS, HEALTH_POLL_INTERVAL, HealthState, Readiness, ServiceBase,
    ServiceBaseOptions, ServiceRecord, SupportService, poll_until_ready, read_record_file,
    write_record_file,
};

/// Service and binary name.
pub const NAME: &str = "vault";

/// Release version.
pub const VERSION: &str = "0.10.1";

/// Listen port of the dev server.
pub const PORT: u16 = 8200;

/// Name of the (empty) generated config file.
pub const CONFIG_FILE_NAME: &str = "vault_server.hcl";

/// Persisted form: the generic record plus the root token.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct VaultRecord {
    /// Generic service fields.
    #[serde(flatten)]
    pub service: ServiceRecord,

    /// Root token the dev server was started with.
    pub root_token: String,
}

/// Options for configuring a `VaultService`.
#[derive(Clone, Debug)]
pub struct VaultOptions {
    /// Workspace the server lives in.
    pub workspace: PathBuf,

    /// Upper bound for a single health check.
    pub healthy_timeout_seconds: u64,
}

impl VaultOptions {
    /// Default options for `workspace`.
    #[must_use]
    pub const fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            healthy_timeout_seconds: DEFAULT_HEALTHY_TIMEOUT_SECONDS,
        }
    }
}

/// Vault dev server supervised as a local subprocess.
pub struct VaultService {
    api: Arc<dyn VaultApi>,
    base: ServiceBase,
    root_token: String,
}

impl VaultService {
    /// Creates a service with a fresh root token, talking to the server over HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(options: VaultOptions) -> Result<Self> {
        let root_token = Uuid::new_v4().to_string();
        let base = Self::base_for(options, &root_token);
        let api = Arc::new(HttpVaultApi::new(&base.record().address, &root_token)?);

        Ok(Self {
            api,
            base,
            root_token,
        })
    }

    /// Creates a service with a fresh root token and a caller-supplied API client.
    #[must_use]
    pub fn with_api(options: VaultOptions, api: Arc<dyn VaultApi>) -> Self {
        let root_token = Uuid::new_v4().to_string();
        let base = Self::base_for(options, &root_token);
        api.set_token(&root_token);

        Self {
            api,
            base,
            root_token,
        }
    }

    /// Resolves the instance persisted in `workspace`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub async fn from_workspace(workspace: PathBuf) -> Result<Option<Self>> {
        let mut service = Self::new(VaultOptions::new(workspace))?;

        if !service.read_record().await? {
            return Ok(None);
        }

        service.api = Arc::new(HttpVaultApi::new(service.address(), &service.root_token)?);

        Ok(Some(service))
    }

    /// Root token currently authoritative for this instance.
    #[must_use]
    pub fn root_token(&self) -> &str {
        &self.root_token
    }

    /// Makes sure the secret backend is mounted at the version the data
    /// loader expects.
    ///
    /// # Errors
    ///
    /// Returns an error if any mount-table call fails.
    pub async fn reconcile_backends(&self) -> Result<BackendReconciliation> {
        reconcile_secret_backend(&*self.api).await
    }

    fn base_for(options: VaultOptions, root_token: &str) -> ServiceBase {
        let VaultOptions {
            workspace,
            healthy_timeout_seconds,
        } = options;

        let address = format!("127.0.0.1:{PORT}");
        let mut base = ServiceBase::new(ServiceBaseOptions {
            workspace,
            name: NAME.to_string(),
            version: VERSION.to_string(),
            address: address.clone(),
            config_file_name: CONFIG_FILE_NAME.to_string(),
            service_config: String::new(),
            healthy_timeout_seconds,
        });

        let command_line = format!(
            "\"{}\" server -dev -dev-root-token-id {root_token} -dev-listen-address {address}",
            base.binary_path().display(),
        );
        base.set_command_line(command_line);

        base
    }
}

#[async_trait]
impl SupportService for VaultService {
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
            move || async move { api.health().await.map(readiness) },
        )
        .await
    }

    async fn read_record(&mut self) -> vivarium_service::Result<bool> {
        let Some(record) =
            read_record_file::<VaultRecord>(NAME, &self.base.record_path()).await?
        else {
            return Ok(false);
        };

        self.base.set_record(record.service);
        self.root_token = record.root_token;
        self.api.set_token(&self.root_token);

        debug!(target: "vault", "adopted persisted root token");

        Ok(true)
    }

    async fn write_record(&self) -> vivarium_service::Result<()> {
        let record = VaultRecord {
            service: self.base.record().clone(),
            root_token: self.root_token.clone(),
        };

        write_record_file(NAME, &self.base.record_path(), &record).await
    }
}

#[async_trait]
impl KvWriter for VaultService {
    async fn write_key(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        debug!(target: "vault", %key, "write");
        self.api.write_secret(key, value).await?;
        Ok(())
    }
}

/// Sealed, standby and uninitialized servers will not recover on their own.
fn readiness(health: VaultHealth) -> Readiness {
    if health.sealed {
        Readiness::Terminal("vault is sealed".to_string())
    } else if health.standby {
        Readiness::Terminal("vault is in standby mode".to_string())
    } else if !health.initialized {
        Readiness::Terminal("vault is not initialized".to_string())
    } else {
        Readiness::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        List,
        Mount(String, String),
        Unmount(String),
        Write(String, String),
    }

    #[derive(Default)]
    struct FakeVault {
        calls: Mutex<Vec<Call>>,
        health: Mutex<VecDeque<Option<VaultHealth>>>,
        mounts: Mutex<BTreeMap<String, MountInfo>>,
        token: Mutex<String>,
    }

    impl FakeVault {
        fn with_secret_mount(version: Option<&str>) -> Self {
            let fake = Self::default();
            if let Some(version) = version {
                fake.mounts.lock().unwrap().insert(
                    SECRET_MOUNT.to_string(),
                    MountInfo {
                        kind: "kv".to_string(),
                        options: Some(BTreeMap::from([(
                            "version".to_string(),
                            version.to_string(),
                        )])),
                    },
                );
            }
            fake
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    const READY: VaultHealth = VaultHealth {
        initialized: true,
        sealed: false,
        standby: false,
    };

    #[async_trait]
    impl VaultApi for FakeVault {
        fn set_token(&self, token: &str) {
            *self.token.lock().unwrap() = token.to_string();
        }

        async fn health(&self) -> Result<VaultHealth> {
            self.health
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or_else(|| Error::UnexpectedResponse("connection refused".to_string()))
        }

        async fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>> {
            self.calls.lock().unwrap().push(Call::List);
            Ok(self.mounts.lock().unwrap().clone())
        }

        async fn mount_kv(&self, path: &str, version: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Mount(path.to_string(), version.to_string()));
            Ok(())
        }

        async fn unmount(&self, path: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Unmount(path.to_string()));
            Ok(())
        }

        async fn write_secret(&self, key: &str, value: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Write(key.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn live_service(workspace: PathBuf, api: Arc<FakeVault>) -> VaultService {
        let mut service = VaultService::with_api(
            VaultOptions {
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

    #[tokio::test]
    async fn absent_backend_is_mounted() {
        let api = FakeVault::with_secret_mount(None);

        let outcome = reconcile_secret_backend(&api).await.unwrap();

        assert_eq!(outcome, BackendReconciliation::Mounted);
        assert_eq!(
            api.calls(),
            vec![Call::List, Call::Mount("secret/".to_string(), "1".to_string())]
        );
    }

    #[tokio::test]
    async fn wrong_version_is_remounted() {
        let api = FakeVault::with_secret_mount(Some("2"));

        let outcome = reconcile_secret_backend(&api).await.unwrap();

        assert_eq!(outcome, BackendReconciliation::Remounted);
        assert_eq!(
            api.calls(),
            vec![
                Call::List,
                Call::Unmount("secret/".to_string()),
                Call::Mount("secret/".to_string(), "1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn current_backend_is_left_alone() {
        let api = FakeVault::with_secret_mount(Some("1"));

        let outcome = reconcile_secret_backend(&api).await.unwrap();

        assert_eq!(outcome, BackendReconciliation::AlreadyCurrent);
        assert_eq!(api.calls(), vec![Call::List]);
    }

    #[test]
    fn fresh_instances_get_distinct_tokens() {
        let dir = tempdir().unwrap();
        let first = VaultService::with_api(
            VaultOptions::new(dir.path().to_path_buf()),
            Arc::new(FakeVault::default()),
        );
        let second = VaultService::with_api(
            VaultOptions::new(dir.path().to_path_buf()),
            Arc::new(FakeVault::default()),
        );

        assert_ne!(first.root_token(), second.root_token());
        assert!(Uuid::parse_str(first.root_token()).is_ok());
        assert!(
            first
                .record()
                .command_line
                .contains(&format!("-dev-root-token-id {}", first.root_token()))
        );
        assert!(
            first
                .record()
                .command_line
                .ends_with("-dev-listen-address 127.0.0.1:8200")
        );
    }

    #[tokio::test]
    async fn resumed_instance_adopts_persisted_token() {
        let dir = tempdir().unwrap();
        let original = live_service(dir.path().to_path_buf(), Arc::new(FakeVault::default()));
        original.write_record().await.unwrap();

        let api = Arc::new(FakeVault::default());
        let mut resumed = VaultService::with_api(
            VaultOptions::new(dir.path().to_path_buf()),
            Arc::clone(&api) as Arc<dyn VaultApi>,
        );
        assert_ne!(resumed.root_token(), original.root_token());

        assert!(resumed.read_record().await.unwrap());

        assert_eq!(resumed.root_token(), original.root_token());
        assert_eq!(resumed.record(), original.record());
        assert_eq!(*api.token.lock().unwrap(), original.root_token());
    }

    #[tokio::test]
    async fn record_file_is_flat() {
        let dir = tempdir().unwrap();
        let service = live_service(dir.path().to_path_buf(), Arc::new(FakeVault::default()));
        service.write_record().await.unwrap();

        let yaml = std::fs::read_to_string(dir.path().join("vault.yml")).unwrap();
        assert!(yaml.contains("root_token:"));
        assert!(yaml.contains(service.root_token()));
        assert!(yaml.contains("name: vault"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_then_ready() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeVault::default());
        api.health.lock().unwrap().extend([None, None, Some(READY)]);
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        assert_eq!(service.check_health().await, HealthState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn sealed_is_terminal() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeVault::default());
        api.health.lock().unwrap().extend([
            Some(VaultHealth {
                sealed: true,
                ..READY
            }),
            Some(READY),
        ]);
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        assert_matches!(
            service.check_health().await,
            HealthState::Unhealthy(reason) if reason.contains("sealed")
        );
        assert_eq!(api.health.lock().unwrap().len(), 1);
    }

    #[test]
    fn standby_and_uninitialized_are_terminal() {
        assert_matches!(
            readiness(VaultHealth {
                standby: true,
                ..READY
            }),
            Readiness::Terminal(reason) if reason.contains("standby")
        );
        assert_matches!(
            readiness(VaultHealth {
                initialized: false,
                ..READY
            }),
            Readiness::Terminal(reason) if reason.contains("not initialized")
        );
        assert_eq!(readiness(READY), Readiness::Ready);
    }

    #[tokio::test]
    async fn writes_secrets_through_api() {
        let dir = tempdir().unwrap();
        let api = Arc::new(FakeVault::default());
        let service = live_service(dir.path().to_path_buf(), Arc::clone(&api));

        service.write_key("secret/shop/key", "s3cr3t").await.unwrap();

        assert_eq!(
            api.calls(),
            vec![Call::Write("secret/shop/key".to_string(), "s3cr3t".to_string())]
        );
    }
}
