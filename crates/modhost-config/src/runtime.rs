//! Derives runtime artefact paths shared by the supervisor and its peers.
//!
//! The runtime directory houses the channel FIFOs and the instance lock. Both
//! the supervisor and any dialling peer must agree on the layout, so the
//! derivation lives next to the configuration it is computed from.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for runtime artefacts written by the supervisor.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    permissions_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the configuration, creating the runtime
    /// directory when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::RuntimeDirectory`] when the directory
    /// cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = config.runtime_dir();
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            runtime_dir,
            permissions_path: config.permissions_path(),
        })
    }

    /// Directory holding the channel FIFOs and lock file.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the permission map.
    #[must_use]
    pub fn permissions_path(&self) -> &Path {
        self.permissions_path.as_path()
    }
}

/// Errors raised while deriving runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
