use std::path::PathBuf;

use thiserror::Error;

/// Result type for environment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating an environment.
#[derive(Debug, Error)]
pub enum Error {
    /// The application path has no final component to name the application by.
    #[error("cannot derive an application name from {}", .0.display())]
    ApplicationName(PathBuf),

    /// A service instance could not be built.
    #[error("failed to construct {service}: {source}")]
    Construct {
        /// Role or name of the service.
        service: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Loading application data failed.
    #[error("failed to load application data into {service}: {source}")]
    DataLoad {
        /// Service the data was headed for.
        service: String,
        /// Underlying failure.
        #[source]
        source: vivarium_data_loader::Error,
    },

    /// Filesystem failure.
    #[error("{0} {path}: {2}", path = .1.display())]
    Io(&'static str, PathBuf, #[source] std::io::Error),

    /// A service needed by the operation has no record in the workspace.
    #[error("{service} is not provisioned in {}", .workspace.display())]
    NotProvisioned {
        /// Role of the missing service.
        service: &'static str,
        /// Workspace that was searched.
        workspace: PathBuf,
    },

    /// The secrets backend could not be reconciled.
    #[error("failed to reconcile secret backends: {0}")]
    Reconcile(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A lifecycle operation failed.
    #[error(transparent)]
    Service(#[from] vivarium_service::Error),

    /// The workspace directory does not exist.
    #[error("workspace {} does not exist", .0.display())]
    WorkspaceMissing(PathBuf),
}
