use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use vivarium_consul::{ConsulOptions, ConsulService};
use vivarium_data_loader::KvWriter;
use vivarium_nomad::{NomadOptions, NomadService};
use vivarium_service::{DEFAULT_HEALTHY_TIMEOUT_SECONDS, SupportService};
use vivarium_vault::{VaultOptions, VaultService};

use crate::error::{Error, Result};

/// Boxed error returned across the provider seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Position of a service in the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Coordination / service-discovery store.
    Store,

    /// Secrets store.
    Secrets,

    /// Scheduler, wired to the other two.
    Scheduler,
}

impl Role {
    /// Startup order.
    pub const STARTUP: [Self; 3] = [Self::Store, Self::Secrets, Self::Scheduler];

    /// Teardown order.
    pub const TEARDOWN: [Self; 3] = [Self::Scheduler, Self::Secrets, Self::Store];

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Secrets => "secrets",
            Self::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A coordination store application data can be written into.
pub trait StoreService: SupportService + KvWriter {}

impl<T: SupportService + KvWriter> StoreService for T {}

/// A secrets store other services authenticate against.
#[async_trait]
pub trait SecretsService: SupportService + KvWriter {
    /// Root token currently authoritative for this instance.
    fn root_token(&self) -> &str;

    /// One-time backend fix-up after the service becomes healthy.
    async fn reconcile_backends(&self) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl SecretsService for VaultService {
    fn root_token(&self) -> &str {
        Self::root_token(self)
    }

    async fn reconcile_backends(&self) -> std::result::Result<(), BoxError> {
        Self::reconcile_backends(self).await?;
        Ok(())
    }
}

/// What the scheduler needs to know about the services it depends on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerDependencies {
    /// `host:port` of the store.
    pub store_address: String,

    /// `host:port` of the secrets store.
    pub secrets_address: String,

    /// Root token of the secrets store.
    pub secrets_root_token: String,
}

/// Builds the service instances of an environment.
///
/// `store`, `secrets` and `scheduler` build fresh in-memory instances. The
/// `resolve_*` methods build an instance and overlay its persisted record,
/// returning `None` if there is no record.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// A fresh store instance.
    fn store(&self, workspace: &Path) -> Result<Box<dyn StoreService>>;

    /// A fresh secrets instance, with a newly generated root token.
    fn secrets(&self, workspace: &Path) -> Result<Box<dyn SecretsService>>;

    /// A fresh scheduler instance wired to `dependencies`.
    fn scheduler(
        &self,
        workspace: &Path,
        dependencies: &SchedulerDependencies,
    ) -> Result<Box<dyn SupportService>>;

    /// The store persisted in `workspace`.
    async fn resolve_store(&self, workspace: &Path) -> Result<Option<Box<dyn StoreService>>> {
        let mut service = self.store(workspace)?;
        Ok(service.read_record().await?.then_some(service))
    }

    /// The secrets store persisted in `workspace`.
    async fn resolve_secrets(&self, workspace: &Path) -> Result<Option<Box<dyn SecretsService>>> {
        let mut service = self.secrets(workspace)?;
        Ok(service.read_record().await?.then_some(service))
    }

    /// The scheduler persisted in `workspace`.
    async fn resolve_scheduler(
        &self,
        workspace: &Path,
    ) -> Result<Option<Box<dyn SupportService>>> {
        let mut service = self.scheduler(workspace, &SchedulerDependencies::default())?;
        Ok(service.read_record().await?.then_some(service))
    }
}

/// Consul, Vault and Nomad running as local subprocesses.
#[derive(Clone, Copy, Debug)]
pub struct LocalServices {
    healthy_timeout_seconds: u64,
}

impl LocalServices {
    /// Services with the given health check budget.
    #[must_use]
    pub const fn new(healthy_timeout_seconds: u64) -> Self {
        Self {
            healthy_timeout_seconds,
        }
    }
}

impl Default for LocalServices {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTHY_TIMEOUT_SECONDS)
    }
}

fn construct(service: &'static str) -> impl FnOnce(BoxError) -> Error {
    move |source| Error::Construct { service, source }
}

#[async_trait]
impl ServiceProvider for LocalServices {
    fn store(&self, workspace: &Path) -> Result<Box<dyn StoreService>> {
        let service = ConsulService::new(ConsulOptions {
            workspace: workspace.to_path_buf(),
            healthy_timeout_seconds: self.healthy_timeout_seconds,
        })
        .map_err(|e| construct(vivarium_consul::NAME)(e.into()))?;

        Ok(Box::new(service))
    }

    fn secrets(&self, workspace: &Path) -> Result<Box<dyn SecretsService>> {
        let service = VaultService::new(VaultOptions {
            workspace: workspace.to_path_buf(),
            healthy_timeout_seconds: self.healthy_timeout_seconds,
        })
        .map_err(|e| construct(vivarium_vault::NAME)(e.into()))?;

        Ok(Box::new(service))
    }

    fn scheduler(
        &self,
        workspace: &Path,
        dependencies: &SchedulerDependencies,
    ) -> Result<Box<dyn SupportService>> {
        let service = NomadService::new(NomadOptions {
            workspace: workspace.to_path_buf(),
            consul_address: dependencies.store_address.clone(),
            vault_address: dependencies.secrets_address.clone(),
            vault_token: dependencies.secrets_root_token.clone(),
            healthy_timeout_seconds: self.healthy_timeout_seconds,
        })
        .map_err(|e| construct(vivarium_nomad::NAME)(e.into()))?;

        Ok(Box::new(service))
    }

    async fn resolve_store(&self, workspace: &Path) -> Result<Option<Box<dyn StoreService>>> {
        let service = ConsulService::from_workspace(workspace.to_path_buf())
            .await
            .map_err(|e| match e {
                vivarium_consul::Error::Service(e) => Error::Service(e),
                other => construct(vivarium_consul::NAME)(other.into()),
            })?;

        Ok(service.map(|s| Box::new(s) as Box<dyn StoreService>))
    }

    async fn resolve_secrets(&self, workspace: &Path) -> Result<Option<Box<dyn SecretsService>>> {
        let service = VaultService::from_workspace(workspace.to_path_buf())
            .await
            .map_err(|e| match e {
                vivarium_vault::Error::Service(e) => Error::Service(e),
                other => construct(vivarium_vault::NAME)(other.into()),
            })?;

        Ok(service.map(|s| Box::new(s) as Box<dyn SecretsService>))
    }

    async fn resolve_scheduler(
        &self,
        workspace: &Path,
    ) -> Result<Option<Box<dyn SupportService>>> {
        let service = NomadService::from_workspace(workspace.to_path_buf())
            .await
            .map_err(|e| match e {
                vivarium_nomad::Error::Service(e) => Error::Service(e),
                other => construct(vivarium_nomad::NAME)(other.into()),
            })?;

        Ok(service.map(|s| Box::new(s) as Box<dyn SupportService>))
    }
}
