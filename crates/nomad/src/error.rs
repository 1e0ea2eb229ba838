use thiserror::Error;

/// Result type for Nomad operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising or talking to Nomad.
#[derive(Debug, Error)]
pub enum Error {
    /// An HTTP request to the agent failed.
    #[error("nomad request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A lifecycle operation failed.
    #[error(transparent)]
    Service(#[from] vivarium_service::Error),
}
