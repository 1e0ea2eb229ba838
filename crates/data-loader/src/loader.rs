use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flatten::{KeyValueDocument, Target};

/// Something keys can be written to.
#[async_trait]
pub trait KvWriter: Send + Sync {
    /// Writes (overwrites) a single key.
    async fn write_key(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Where a document is loaded, and the namespace its keys land in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadTarget {
    /// `app/<application>/<version_label>/<key>` in the coordination store.
    Store {
        /// Application name.
        application: String,
        /// Version label, e.g. a content hash.
        version_label: String,
    },

    /// `secret/<key>` in the secrets store.
    Secrets,
}

impl LoadTarget {
    /// The flattening convention for this target.
    #[must_use]
    pub const fn target(&self) -> Target {
        match self {
            Self::Store { .. } => Target::Store,
            Self::Secrets => Target::Secrets,
        }
    }

    /// Fully namespaced key for a flattened entry.
    #[must_use]
    pub fn namespaced(&self, key: &str) -> String {
        match self {
            Self::Store {
                application,
                version_label,
            } => format!("app/{application}/{version_label}/{key}"),
            Self::Secrets => format!("secret/{key}"),
        }
    }
}

/// Loads the document at `path` into `writer`. Returns the number of keys
/// written.
///
/// A missing file is not an error: data is optional per application. Keys
/// are written in sorted order, and the first failed write stops the load.
/// Keys already written are left in place.
///
/// # Errors
///
/// Returns `DataWrite` for the first key that could not be written, or an
/// error if the file exists but cannot be read or parsed.
pub async fn load<W>(path: &Path, target: &LoadTarget, writer: &W) -> Result<usize>
where
    W: KvWriter + ?Sized,
{
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no data file found, skipping");
            return Ok(0);
        }
        Err(e) => return Err(Error::Io("failed to read data file", path.to_path_buf(), e)),
    };

    let document = KeyValueDocument::from_yaml(target.target(), &contents)?;

    for (key, value) in document.entries() {
        let key = target.namespaced(key);

        writer
            .write_key(&key, value)
            .await
            .map_err(|source| Error::DataWrite {
                key: key.clone(),
                source,
            })?;

        debug!(%key, "wrote key");
    }

    info!(path = %path.display(), keys = document.len(), "loaded data file");

    Ok(document.len())
}
