#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vivarium_consul::{ConsulApi, ConsulOptions, ConsulService};
use vivarium_environment::{
    Environment, Result, SchedulerDependencies, SecretsService, ServiceProvider, StoreService,
    Workspace,
};
use vivarium_nomad::{NomadApi, NomadOptions, NomadService};
use vivarium_service::{ServiceRecord, SupportService, read_record_file};
use vivarium_vault::{MountInfo, VaultApi, VaultHealth, VaultOptions, VaultRecord, VaultService};

/// Stands in for every service binary.
pub const STUB_COMMAND: &str = "sleep 60";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Default)]
pub struct FakeConsul {
    pub unhealthy: AtomicBool,
    pub puts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ConsulApi for FakeConsul {
    async fn autopilot_healthy(&self) -> vivarium_consul::Result<bool> {
        Ok(!self.unhealthy.load(Ordering::SeqCst))
    }

    async fn put_key(&self, key: &str, value: &str) -> vivarium_consul::Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVault {
    pub mounts: Mutex<BTreeMap<String, MountInfo>>,
    pub mount_calls: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl VaultApi for FakeVault {
    fn set_token(&self, _token: &str) {}

    async fn health(&self) -> vivarium_vault::Result<VaultHealth> {
        Ok(VaultHealth {
            initialized: true,
            sealed: false,
            standby: false,
        })
    }

    async fn list_mounts(&self) -> vivarium_vault::Result<BTreeMap<String, MountInfo>> {
        Ok(self.mounts.lock().unwrap().clone())
    }

    async fn mount_kv(&self, path: &str, version: &str) -> vivarium_vault::Result<()> {
        self.mount_calls
            .lock()
            .unwrap()
            .push(format!("{path}@{version}"));
        self.mounts.lock().unwrap().insert(
            path.to_string(),
            MountInfo {
                kind: "kv".to_string(),
                options: Some(BTreeMap::from([("version".to_string(), version.to_string())])),
            },
        );
        Ok(())
    }

    async fn unmount(&self, path: &str) -> vivarium_vault::Result<()> {
        self.mounts.lock().unwrap().remove(path);
        Ok(())
    }

    async fn write_secret(&self, key: &str, value: &str) -> vivarium_vault::Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

pub struct FakeNomad;

#[async_trait]
impl NomadApi for FakeNomad {
    async fn leader(&self) -> vivarium_nomad::Result<String> {
        Ok("127.0.0.1:4647".to_string())
    }
}

/// The real variants, launched as `sleep` and talking to in-memory APIs.
#[derive(Clone)]
pub struct StubServices {
    pub consul: Arc<FakeConsul>,
    pub vault: Arc<FakeVault>,
    pub healthy_timeout_seconds: u64,
}

impl Default for StubServices {
    fn default() -> Self {
        Self {
            consul: Arc::default(),
            vault: Arc::default(),
            healthy_timeout_seconds: 2,
        }
    }
}

fn stub<S: SupportService>(mut service: S) -> S {
    service.base_mut().set_command_line(STUB_COMMAND.to_string());
    service
}

#[async_trait]
impl ServiceProvider for StubServices {
    fn store(&self, workspace: &Path) -> Result<Box<dyn StoreService>> {
        Ok(Box::new(stub(ConsulService::with_api(
            ConsulOptions {
                workspace: workspace.to_path_buf(),
                healthy_timeout_seconds: self.healthy_timeout_seconds,
            },
            self.consul.clone(),
        ))))
    }

    fn secrets(&self, workspace: &Path) -> Result<Box<dyn SecretsService>> {
        Ok(Box::new(stub(VaultService::with_api(
            VaultOptions {
                workspace: workspace.to_path_buf(),
                healthy_timeout_seconds: self.healthy_timeout_seconds,
            },
            self.vault.clone(),
        ))))
    }

    fn scheduler(
        &self,
        workspace: &Path,
        dependencies: &SchedulerDependencies,
    ) -> Result<Box<dyn SupportService>> {
        Ok(Box::new(stub(NomadService::with_api(
            NomadOptions {
                workspace: workspace.to_path_buf(),
                consul_address: dependencies.store_address.clone(),
                vault_address: dependencies.secrets_address.clone(),
                vault_token: dependencies.secrets_root_token.clone(),
                healthy_timeout_seconds: self.healthy_timeout_seconds,
            },
            Arc::new(FakeNomad),
        ))))
    }
}

/// A workspace with placeholder binaries, so nothing is downloaded.
pub struct TestEnv {
    _root: TempDir,
    pub workspace: Workspace,
    pub services: StubServices,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();

        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::for_project(root.path(), "test");
        std::fs::create_dir_all(workspace.path()).unwrap();
        for name in ["consul", "vault", "nomad"] {
            std::fs::write(workspace.path().join(name), b"").unwrap();
        }

        Self {
            _root: root,
            workspace,
            services: StubServices::default(),
        }
    }

    pub fn environment(&self) -> Environment<StubServices> {
        Environment::new(self.workspace.clone(), self.services.clone())
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.workspace.path().join(relative)
    }

    pub async fn record(&self, name: &str) -> ServiceRecord {
        read_record_file(name, &self.path(&format!("{name}.yml")))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn vault_record(&self) -> VaultRecord {
        read_record_file("vault", &self.path("vault.yml"))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn pid(&self, name: &str) -> u32 {
        self.record(name).await.pid.unwrap()
    }
}

/// Sends SIGINT via `kill(1)`.
pub fn interrupt(pid: u32) {
    let _ = std::process::Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .status();
}

/// Waits until `pid` is gone or a zombie.
pub async fn exited(pid: u32) -> bool {
    for _ in 0..50 {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
        if stat.is_empty() || stat.contains(") Z ") {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

/// A pid that belonged to a process which has already been reaped.
pub fn reaped_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}
