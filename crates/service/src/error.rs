use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::HealthState;

/// Result type for service lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning or supervising a service.
#[derive(Debug, Error)]
pub enum Error {
    /// The release archive could not be fetched or unpacked.
    #[error("{service}: download from {url} failed: {reason}")]
    Download {
        /// Name of the service being downloaded.
        service: String,
        /// Where the release was fetched from.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// The service never became healthy.
    #[error("{service} is not healthy: {state}")]
    HealthCheck {
        /// Name of the service.
        service: String,
        /// The state the health check ended in.
        state: HealthState,
    },

    /// The subprocess could not be started.
    #[error("{service}: failed to launch: {source}")]
    Launch {
        /// Name of the service.
        service: String,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },

    /// A record or config file could not be read or written.
    #[error("{service}: {context} {}: {source}", .path.display())]
    Persistence {
        /// Name of the service.
        service: String,
        /// What was being attempted.
        context: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },

    /// A record file exists but is not a valid record.
    #[error("{service}: malformed record {}: {source}", .path.display())]
    MalformedRecord {
        /// Name of the service.
        service: String,
        /// File involved.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_yaml::Error,
    },

    /// The binary or data directory could not be set up.
    #[error("{service}: could not provision {}: {source}", .path.display())]
    Provisioning {
        /// Name of the service.
        service: String,
        /// Path that could not be created.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A signal could not be delivered to the recorded process.
    #[error("{service}: could not signal pid {pid}: {source}")]
    Signal {
        /// Name of the service.
        service: String,
        /// Process the signal was aimed at.
        pid: u32,
        /// Errno returned by `kill(2)`.
        #[source]
        source: Errno,
    },
}
