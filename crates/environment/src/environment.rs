use std::path::Path;

use tracing::{error, info, warn};
use vivarium_data_loader::LoadTarget;
use vivarium_service::{HealthState, StopOutcome, SupportService};

use crate::error::{Error, Result};
use crate::provider::{LocalServices, Role, SchedulerDependencies, ServiceProvider};
use crate::workspace::Workspace;

/// Where the store-bound application document lives, relative to the app.
pub const APP_DATA_FILE: &str = "infra/data.yml";

/// Where the secrets-bound application document lives, relative to the app.
pub const APP_SECRETS_FILE: &str = "infra/secrets.yml";

/// Result of tearing an environment down.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Services a stop was attempted on, and what happened.
    pub stopped: Vec<(Role, StopOutcome)>,

    /// Services with no record in the workspace.
    pub not_provisioned: Vec<Role>,

    /// Services that could not be resolved or stopped.
    pub failures: Vec<(Role, Error)>,
}

impl ShutdownReport {
    /// Whether every provisioned service was stopped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What `status` found for one service.
#[derive(Debug)]
pub enum ServiceStatus {
    /// No record in the workspace.
    NotProvisioned,

    /// The record could not be resolved.
    Unresolvable(Error),

    /// Outcome of a full health check.
    Checked {
        /// Service name.
        name: String,
        /// Health check result.
        health: HealthState,
    },
}

/// Number of keys written by `load_application_data`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Keys written into the store.
    pub store_keys: usize,

    /// Keys written into the secrets store.
    pub secret_keys: usize,
}

/// One local environment: its workspace and how to build its services.
pub struct Environment<P = LocalServices> {
    provider: P,
    workspace: Workspace,
}

impl<P: ServiceProvider> Environment<P> {
    /// Creates an environment over `workspace`.
    #[must_use]
    pub const fn new(workspace: Workspace, provider: P) -> Self {
        Self {
            provider,
            workspace,
        }
    }

    /// The environment's workspace.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Brings the store, secrets store and scheduler up, in that order.
    ///
    /// Services that are already healthy are left alone. Services with a
    /// record that fail their health check are stopped and started fresh.
    /// Any service that is unhealthy after a fresh start aborts the run.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle, health or reconciliation failure.
    pub async fn init_env(&self) -> Result<()> {
        self.workspace.ensure().await?;
        let path = self.workspace.path();

        info!(workspace = %path.display(), "initializing environment");

        let store = ensure_running(Role::Store, || self.provider.store(path)).await?;
        let secrets = ensure_running(Role::Secrets, || self.provider.secrets(path)).await?;

        secrets.reconcile_backends().await.map_err(Error::Reconcile)?;

        let dependencies = SchedulerDependencies {
            store_address: store.address().to_string(),
            secrets_address: secrets.address().to_string(),
            secrets_root_token: secrets.root_token().to_string(),
        };
        ensure_running(Role::Scheduler, || {
            self.provider.scheduler(path, &dependencies)
        })
        .await?;

        info!(workspace = %path.display(), "environment is up");

        Ok(())
    }

    /// Stops every provisioned service, scheduler first.
    ///
    /// A service that cannot be resolved or stopped is reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceMissing` if there is no workspace to shut down.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        self.require_workspace().await?;

        let mut report = ShutdownReport::default();

        for role in Role::TEARDOWN {
            match self.stop_role(role).await {
                Ok(Some(outcome)) => report.stopped.push((role, outcome)),
                Ok(None) => {
                    info!(%role, "not provisioned, nothing to stop");
                    report.not_provisioned.push(role);
                }
                Err(e) => {
                    error!(%role, error = %e, "failed to stop service, continuing");
                    report.failures.push((role, e));
                }
            }
        }

        Ok(report)
    }

    /// Health of every service in the workspace. Never starts or stops anything.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceMissing` if there is no workspace.
    pub async fn status(&self) -> Result<Vec<(Role, ServiceStatus)>> {
        self.require_workspace().await?;

        let mut statuses = Vec::with_capacity(Role::STARTUP.len());

        for role in Role::STARTUP {
            let path = self.workspace.path();
            let status = match role {
                Role::Store => check_resolved(self.provider.resolve_store(path).await).await,
                Role::Secrets => check_resolved(self.provider.resolve_secrets(path).await).await,
                Role::Scheduler => {
                    check_resolved(self.provider.resolve_scheduler(path).await).await
                }
            };
            statuses.push((role, status));
        }

        Ok(statuses)
    }

    /// Seeds an application's configuration and secrets.
    ///
    /// `<app_path>/infra/data.yml` goes into the store under
    /// `app/<app>/<version_label>/`, and `<app_path>/infra/secrets.yml` into
    /// the secrets store under `secret/`. Either file may be absent.
    ///
    /// # Errors
    ///
    /// Returns an error if either service is not provisioned or not
    /// healthy, or if a load fails.
    pub async fn load_application_data(
        &self,
        app_path: &Path,
        version_label: &str,
    ) -> Result<LoadSummary> {
        self.require_workspace().await?;

        let application = app_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::ApplicationName(app_path.to_path_buf()))?
            .to_string();

        let path = self.workspace.path();

        let store = self
            .provider
            .resolve_store(path)
            .await?
            .ok_or_else(|| self.not_provisioned(Role::Store))?;
        require_healthy(&*store).await?;

        let secrets = self
            .provider
            .resolve_secrets(path)
            .await?
            .ok_or_else(|| self.not_provisioned(Role::Secrets))?;
        require_healthy(&*secrets).await?;

        let store_keys = vivarium_data_loader::load(
            &app_path.join(APP_DATA_FILE),
            &LoadTarget::Store {
                application: application.clone(),
                version_label: version_label.to_string(),
            },
            &*store,
        )
        .await
        .map_err(|source| Error::DataLoad {
            service: store.name().to_string(),
            source,
        })?;

        let secret_keys = vivarium_data_loader::load(
            &app_path.join(APP_SECRETS_FILE),
            &LoadTarget::Secrets,
            &*secrets,
        )
        .await
        .map_err(|source| Error::DataLoad {
            service: secrets.name().to_string(),
            source,
        })?;

        info!(%application, version_label, store_keys, secret_keys, "loaded application data");

        Ok(LoadSummary {
            store_keys,
            secret_keys,
        })
    }

    async fn stop_role(&self, role: Role) -> Result<Option<StopOutcome>> {
        let path = self.workspace.path();

        match role {
            Role::Store => stop_resolved(self.provider.resolve_store(path).await?),
            Role::Secrets => stop_resolved(self.provider.resolve_secrets(path).await?),
            Role::Scheduler => stop_resolved(self.provider.resolve_scheduler(path).await?),
        }
    }

    async fn require_workspace(&self) -> Result<()> {
        if self.workspace.exists().await {
            Ok(())
        } else {
            Err(Error::WorkspaceMissing(self.workspace.path().to_path_buf()))
        }
    }

    fn not_provisioned(&self, role: Role) -> Error {
        Error::NotProvisioned {
            service: role.as_str(),
            workspace: self.workspace.path().to_path_buf(),
        }
    }
}

/// Resumes the persisted instance if it is healthy, otherwise starts fresh.
async fn ensure_running<S, F>(role: Role, make: F) -> Result<Box<S>>
where
    S: SupportService + ?Sized,
    F: Fn() -> Result<Box<S>>,
{
    let mut service = make()?;

    if service.read_record().await? {
        let health = service.check_health().await;
        if health.is_healthy() {
            info!(%role, service = service.name(), "resumed running service");
            return Ok(service);
        }

        warn!(%role, service = service.name(), %health, "recorded service is not healthy, restarting");
        service.stop()?;
        service = make()?;
    }

    fresh_start(&mut *service).await?;

    Ok(service)
}

/// `init` → `start` → config → record → health check.
///
/// Once `start` has succeeded, any later failure stops the process again.
async fn fresh_start<S: SupportService + ?Sized>(service: &mut S) -> Result<()> {
    info!(service = service.name(), "starting service");

    service.init().await?;
    service.start().await?;

    let persisted: vivarium_service::Result<()> = async {
        service.write_service_config().await?;
        service.write_record().await
    }
    .await;
    if let Err(e) = persisted {
        error!(service = service.name(), error = %e, "failed to persist service state, stopping");
        stop_after_failure(service);
        return Err(e.into());
    }

    let health = service.check_health().await;
    if health.is_healthy() {
        return Ok(());
    }

    error!(service = service.name(), %health, "service failed to become healthy, stopping");
    stop_after_failure(service);

    Err(vivarium_service::Error::HealthCheck {
        service: service.name().to_string(),
        state: health,
    }
    .into())
}

fn stop_after_failure<S: SupportService + ?Sized>(service: &S) {
    if let Err(e) = service.stop() {
        warn!(service = service.name(), error = %e, "failed to stop service");
    }
}

fn stop_resolved<S: SupportService + ?Sized>(
    service: Option<Box<S>>,
) -> Result<Option<StopOutcome>> {
    service
        .map(|service| service.stop())
        .transpose()
        .map_err(Error::from)
}

async fn check_resolved<S: SupportService + ?Sized>(
    resolved: Result<Option<Box<S>>>,
) -> ServiceStatus {
    match resolved {
        Ok(Some(service)) => ServiceStatus::Checked {
            name: service.name().to_string(),
            health: service.check_health().await,
        },
        Ok(None) => ServiceStatus::NotProvisioned,
        Err(e) => ServiceStatus::Unresolvable(e),
    }
}

async fn require_healthy<S: SupportService + ?Sized>(service: &S) -> Result<()> {
    let health = service.check_health().await;

    if health.is_healthy() {
        Ok(())
    } else {
        Err(vivarium_service::Error::HealthCheck {
            service: service.name().to_string(),
            state: health,
        }
        .into())
    }
}
