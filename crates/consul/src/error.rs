use thiserror::Error;

/// Result type for Consul operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising or talking to Consul.
#[derive(Debug, Error)]
pub enum Error {
    /// An HTTP request to the agent failed.
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent address does not form a valid URL.
    #[error("invalid consul address {0}")]
    InvalidAddress(String),

    /// A lifecycle operation failed.
    #[error(transparent)]
    Service(#[from] vivarium_service::Error),
}
