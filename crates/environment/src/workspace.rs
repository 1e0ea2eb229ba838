use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Prefix of workspace directory names.
pub const WORKSPACE_PREFIX: &str = "vivarium_";

/// Directory that identifies one environment and holds all its state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Wraps an explicit directory.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<workspace_root>/vivarium_<project>`.
    #[must_use]
    pub fn for_project(workspace_root: &Path, project: &str) -> Self {
        Self::new(workspace_root.join(format!("{WORKSPACE_PREFIX}{project}")))
    }

    /// The workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
    }

    /// Creates the directory if it is missing.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| Error::Io("failed to create workspace", self.path.clone(), e))?;

        debug!(path = %self.path.display(), "workspace ready");

        Ok(())
    }
}
