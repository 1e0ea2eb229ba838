use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::download;
use crate::error::{Error, Result};
use crate::health::HealthState;
use crate::process::{self, StopOutcome};
use crate::record::{self, ServiceRecord};

/// Default health check budget.
pub const DEFAULT_HEALTHY_TIMEOUT_SECONDS: u64 = 30;

/// Options for constructing a [`ServiceBase`].
#[derive(Clone, Debug)]
pub struct ServiceBaseOptions {
    /// Workspace the service lives in.
    pub workspace: PathBuf,

    /// Service name, also the binary and record file name.
    pub name: String,

    /// Release version.
    pub version: String,

    /// `host:port` the service listens on.
    pub address: String,

    /// Name of the generated config file inside the data directory.
    pub config_file_name: String,

    /// Generated config text written by `write_service_config`.
    pub service_config: String,

    /// Upper bound for a single health check.
    pub healthy_timeout_seconds: u64,
}

/// State and behaviour shared by every supervised service.
///
/// Variants own one of these and delegate the generic lifecycle to it.
#[derive(Clone, Debug)]
pub struct ServiceBase {
    workspace: PathBuf,
    record: ServiceRecord,
    service_config: String,
}

impl ServiceBase {
    /// Creates a base with every path rooted under the workspace.
    ///
    /// The command line starts out empty; the variant sets it once the
    /// paths it depends on are known.
    #[must_use]
    pub fn new(options: ServiceBaseOptions) -> Self {
        let ServiceBaseOptions {
            workspace,
            name,
            version,
            address,
            config_file_name,
            service_config,
            healthy_timeout_seconds,
        } = options;

        let record = ServiceRecord {
            download_url: download::release_url(&name, &version),
            data_dir: workspace.join(format!("{name}.d")),
            log_file: workspace.join(format!("{name}.log")),
            pid: None,
            command_line: String::new(),
            name,
            version,
            address,
            config_file_name,
            healthy_timeout_seconds,
        };

        Self {
            workspace,
            record,
            service_config,
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The in-memory record.
    #[must_use]
    pub const fn record(&self) -> &ServiceRecord {
        &self.record
    }

    /// Replaces the in-memory record, e.g. with one read back from disk.
    pub fn set_record(&mut self, record: ServiceRecord) {
        self.record = record;
    }

    /// Sets the launch command line.
    pub fn set_command_line(&mut self, command_line: String) {
        self.record.command_line = command_line;
    }

    /// Overrides the download URL, e.g. to point at a mirror.
    pub fn set_download_url(&mut self, url: String) {
        self.record.download_url = url;
    }

    /// Workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// `<workspace>/<name>`.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.workspace.join(&self.record.name)
    }

    /// `<workspace>/<name>.yml`.
    #[must_use]
    pub fn record_path(&self) -> PathBuf {
        self.workspace.join(format!("{}.yml", self.record.name))
    }

    /// `<data_dir>/<config_file_name>`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.record.data_dir.join(&self.record.config_file_name)
    }

    /// Health check budget.
    #[must_use]
    pub const fn healthy_timeout(&self) -> Duration {
        Duration::from_secs(self.record.healthy_timeout_seconds)
    }

    /// Generic liveness check: is the recorded pid still running?
    ///
    /// Says nothing about protocol readiness.
    #[must_use]
    pub fn liveness(&self) -> HealthState {
        if process::is_alive(self.record.pid) {
            HealthState::Healthy
        } else {
            HealthState::Error(format!(
                "process {} is not running",
                self.record
                    .pid
                    .map_or_else(|| "<none>".to_string(), |pid| pid.to_string())
            ))
        }
    }

    /// Whether the binary is already in the workspace.
    pub async fn has_binary(&self) -> bool {
        tokio::fs::try_exists(self.binary_path())
            .await
            .unwrap_or(false)
    }

    /// Fetches the binary from the recorded download URL.
    ///
    /// # Errors
    ///
    /// Returns `Download` on any failure. There is no retry.
    pub async fn download(&self) -> Result<()> {
        download::fetch_binary(
            &self.record.name,
            &self.record.download_url,
            &self.binary_path(),
        )
        .await
    }

    /// Creates the data directory if it is missing.
    ///
    /// # Errors
    ///
    /// Returns `Provisioning` if the directory cannot be created.
    pub async fn ensure_data_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.record.data_dir)
            .await
            .map_err(|e| Error::Provisioning {
                service: self.record.name.clone(),
                path: self.record.data_dir.clone(),
                source: Box::new(e),
            })
    }

    /// Makes sure the binary and data directory are in place.
    ///
    /// # Errors
    ///
    /// Returns `Provisioning` wrapping the download failure, or if the data
    /// directory cannot be created.
    pub async fn provision(&self) -> Result<()> {
        if !self.has_binary().await {
            self.download().await.map_err(|e| Error::Provisioning {
                service: self.record.name.clone(),
                path: self.binary_path(),
                source: Box::new(e),
            })?;
        }

        self.ensure_data_dir().await
    }

    /// Launches the command line and records the new pid in memory.
    ///
    /// # Errors
    ///
    /// Returns `Launch` if the subprocess cannot be spawned.
    pub fn launch(&mut self) -> Result<u32> {
        let command_line = format!(
            "{} &> \"{}\"",
            self.record.command_line,
            self.record.log_file.display()
        );

        let pid = process::launch(&command_line).map_err(|e| Error::Launch {
            service: self.record.name.clone(),
            source: e,
        })?;

        self.record.pid = Some(pid);

        info!(service = %self.record.name, pid, "started service");

        Ok(pid)
    }

    /// Sends the graceful-stop signal to the recorded pid.
    ///
    /// # Errors
    ///
    /// Returns `Signal` if delivery failed for any reason other than the
    /// process already being gone.
    pub fn stop(&self) -> Result<StopOutcome> {
        let outcome = process::interrupt(self.record.pid).map_err(|e| Error::Signal {
            service: self.record.name.clone(),
            pid: self.record.pid.unwrap_or_default(),
            source: e,
        })?;

        match outcome {
            StopOutcome::Signalled => {
                info!(service = %self.record.name, pid = ?self.record.pid, "sent stop signal");
            }
            StopOutcome::AlreadyGone => {
                warn!(service = %self.record.name, pid = ?self.record.pid, "process already gone");
            }
            StopOutcome::NoProcess => {
                debug!(service = %self.record.name, "no process recorded, nothing to stop");
            }
        }

        Ok(outcome)
    }

    /// Writes the generated config text to [`Self::config_path`].
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the file cannot be written.
    pub async fn write_service_config(&self) -> Result<()> {
        let path = self.config_path();

        tokio::fs::write(&path, &self.service_config)
            .await
            .map_err(|e| Error::Persistence {
                service: self.record.name.clone(),
                context: "failed to write service config",
                path: path.clone(),
                source: e,
            })?;

        debug!(service = %self.record.name, path = %path.display(), "wrote service config");

        Ok(())
    }

    /// Reads the record file and, if present, adopts it.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` or `MalformedRecord` if the file exists but
    /// cannot be read.
    pub async fn read_record(&mut self) -> Result<bool> {
        match record::read::<ServiceRecord>(&self.record.name, &self.record_path()).await? {
            Some(found) => {
                self.record = found;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persists the in-memory record.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the file cannot be written.
    pub async fn write_record(&self) -> Result<()> {
        record::write(&self.record.name, &self.record_path(), &self.record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn base(workspace: &Path) -> ServiceBase {
        let mut base = ServiceBase::new(ServiceBaseOptions {
            workspace: workspace.to_path_buf(),
            name: "sleeper".to_string(),
            version: "1.0.0".to_string(),
            address: "127.0.0.1:1".to_string(),
            config_file_name: "sleeper.hcl".to_string(),
            service_config: "x = 1\n".to_string(),
            healthy_timeout_seconds: 5,
        });
        base.set_command_line("sleep 30".to_string());
        base
    }

    #[test]
    fn paths_are_rooted_in_workspace() {
        let dir = tempdir().unwrap();
        let base = base(dir.path());

        assert_eq!(base.binary_path(), dir.path().join("sleeper"));
        assert_eq!(base.record_path(), dir.path().join("sleeper.yml"));
        assert_eq!(base.record().data_dir, dir.path().join("sleeper.d"));
        assert_eq!(base.record().log_file, dir.path().join("sleeper.log"));
        assert_eq!(
            base.config_path(),
            dir.path().join("sleeper.d").join("sleeper.hcl")
        );
    }

    #[tokio::test]
    async fn launch_then_stop() {
        let dir = tempdir().unwrap();
        let mut base = base(dir.path());

        let pid = base.launch().unwrap();
        assert_eq!(base.record().pid, Some(pid));
        assert!(base.liveness().is_healthy());

        assert_eq!(base.stop().unwrap(), StopOutcome::Signalled);
    }

    #[tokio::test]
    async fn launch_redirects_output_to_log_file() {
        let dir = tempdir().unwrap();
        let mut base = base(dir.path());
        base.set_command_line("echo hello".to_string());

        base.launch().unwrap();

        let mut contents = String::new();
        for _ in 0..50 {
            contents = tokio::fs::read_to_string(&base.record().log_file)
                .await
                .unwrap_or_default();
            if !contents.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn stop_without_pid_is_noop() {
        let dir = tempdir().unwrap();
        let base = base(dir.path());

        assert_eq!(base.stop().unwrap(), StopOutcome::NoProcess);
        assert_matches!(base.liveness(), HealthState::Error(_));
    }

    #[tokio::test]
    async fn record_round_trips_through_workspace() {
        let dir = tempdir().unwrap();
        let mut written = base(dir.path());
        written.launch().unwrap();
        written.write_record().await.unwrap();

        let mut read_back = base(dir.path());
        read_back.set_command_line(String::new());
        assert!(read_back.read_record().await.unwrap());
        assert_eq!(read_back.record(), written.record());

        written.stop().unwrap();
    }

    #[tokio::test]
    async fn read_record_without_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let mut base = base(dir.path());

        assert!(!base.read_record().await.unwrap());
        assert_eq!(base.record().pid, None);
    }

    #[tokio::test]
    async fn service_config_lands_in_data_dir() {
        let dir = tempdir().unwrap();
        let base = base(dir.path());

        base.ensure_data_dir().await.unwrap();
        base.write_service_config().await.unwrap();

        let written = tokio::fs::read_to_string(base.config_path()).await.unwrap();
        assert_eq!(written, "x = 1\n");
    }

    #[tokio::test]
    async fn provision_skips_download_when_binary_present() {
        let dir = tempdir().unwrap();
        let mut base = base(dir.path());
        base.set_download_url("http://127.0.0.1:1/unreachable.zip".to_string());
        tokio::fs::write(base.binary_path(), b"").await.unwrap();

        base.provision().await.unwrap();

        assert!(base.record().data_dir.is_dir());
    }

    #[tokio::test]
    async fn provision_wraps_download_failure() {
        let dir = tempdir().unwrap();
        let mut base = base(dir.path());
        base.set_download_url("http://127.0.0.1:1/unreachable.zip".to_string());

        let result = base.provision().await;

        assert_matches!(result, Err(Error::Provisioning { .. }));
    }
}
