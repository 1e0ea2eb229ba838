use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Persisted descriptor of one supervised service.
///
/// A record on disk only means a process was started with `pid` at some
/// point. It says nothing about whether that process is still alive.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    /// Service name, also the binary and record file name.
    pub name: String,

    /// Release version.
    pub version: String,

    /// Where the release archive is fetched from.
    pub download_url: String,

    /// `host:port` the service listens on.
    pub address: String,

    /// Process id of the last successful start.
    #[serde(default)]
    pub pid: Option<u32>,

    /// Shell command line used to launch the service.
    pub command_line: String,

    /// Name of the generated config file inside `data_dir`.
    pub config_file_name: String,

    /// Service data directory.
    pub data_dir: PathBuf,

    /// File the service's stdout and stderr are redirected to.
    pub log_file: PathBuf,

    /// Upper bound for a single health check.
    pub healthy_timeout_seconds: u64,
}

/// Reads a YAML record from `path`.
///
/// Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// Returns `Persistence` if the file exists but cannot be read, and
/// `MalformedRecord` if it cannot be parsed.
pub async fn read<T: DeserializeOwned>(service: &str, path: &Path) -> Result<Option<T>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(service, path = %path.display(), "no record on disk");
            return Ok(None);
        }
        Err(e) => {
            return Err(Error::Persistence {
                service: service.to_string(),
                context: "failed to read record",
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::MalformedRecord {
            service: service.to_string(),
            path: path.to_path_buf(),
            source: e,
        })
}

/// Writes `record` to `path` as YAML, replacing any previous contents.
///
/// # Errors
///
/// Returns `Persistence` if the record cannot be serialized or written.
pub async fn write<T: Serialize + Sync>(service: &str, path: &Path, record: &T) -> Result<()> {
    let persistence = |source| Error::Persistence {
        service: service.to_string(),
        context: "failed to write record",
        path: path.to_path_buf(),
        source,
    };

    let contents = serde_yaml::to_string(record).map_err(|e| persistence(io::Error::other(e)))?;

    tokio::fs::write(path, contents).await.map_err(persistence)?;

    debug!(service, path = %path.display(), "wrote record");

    Ok(())
}
