use std::path::PathBuf;

use thiserror::Error;

/// Result type for data loading.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while flattening or loading a document.
#[derive(Debug, Error)]
pub enum Error {
    /// A single key could not be written. Remaining keys were not attempted.
    #[error("failed to write key {key}: {source}")]
    DataWrite {
        /// Fully namespaced key that failed.
        key: String,
        /// Underlying client failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The document could not be read.
    #[error("{0} {path}: {2}", path = .1.display())]
    Io(&'static str, PathBuf, #[source] std::io::Error),

    /// A mapping key was itself a mapping or sequence.
    #[error("unsupported key under {0:?}: keys must be scalars")]
    UnsupportedKey(String),

    /// The document root is not a mapping.
    #[error("document root must be a mapping")]
    NotAMapping,

    /// The document is not valid YAML.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
