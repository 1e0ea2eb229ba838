use thiserror::Error;

/// Result type for Vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising or talking to Vault.
#[derive(Debug, Error)]
pub enum Error {
    /// An HTTP request to the server failed.
    #[error("vault request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with something unexpected.
    #[error("unexpected vault response: {0}")]
    UnexpectedResponse(String),

    /// The server address does not form a valid URL.
    #[error("invalid vault address {0}")]
    InvalidAddress(String),

    /// A lifecycle operation failed.
    #[error(transparent)]
    Service(#[from] vivarium_service::Error),
}
