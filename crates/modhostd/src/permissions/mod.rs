//! Permission map deciding which extensions may run modules.
//!
//! The map lives in a JSON file of `key: bool` pairs, where a key is either
//! an extension id (from the extension's `content.xml`) or the extension's
//! folder name. The store is an explicit object handed to the session; it
//! only changes when [`PermissionStore::reload`] is called.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

const PERMISSIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::permissions");
const MANIFEST_FILE: &str = "content.xml";
const EXTENSIONS_DIR: &str = "extensions";
const DEFAULT_INSTRUCTIONS: &str =
    "Set allowed extension IDs or folder names. IDs take precedence.";
const DEFAULT_GRANTS: &[&str] = &["ws_2042901274"];

/// Capability answering whether a module may be run.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionGate {
    /// Whether the module at `relative` (under `root`) may run.
    fn is_permitted(&self, root: &Path, relative: &str) -> bool;
}

/// Errors raised while loading the permission map.
#[derive(Debug, Error)]
pub enum PermissionsError {
    /// The permission file exists but could not be read.
    #[error("failed to read permissions from '{path}': {source}")]
    Read {
        /// Permission file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The default permission file could not be written.
    #[error("failed to write default permissions to '{path}': {source}")]
    WriteDefault {
        /// Permission file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Reasons a manifest lookup failed.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The module path is not `extensions/<folder>/...`.
    #[error("module '{relative}' is not inside an extension folder")]
    OutsideExtensions {
        /// Offending relative path.
        relative: String,
    },
    /// `content.xml` could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `content.xml` carries no `id` attribute.
    #[error("'{path}' has no id attribute")]
    MissingId {
        /// Manifest path.
        path: PathBuf,
    },
}

/// Permission map loaded from disk.
#[derive(Debug, Clone)]
pub struct PermissionStore {
    path: PathBuf,
    grants: BTreeMap<String, bool>,
}

impl PermissionStore {
    /// Loads the map at `path`, writing a default file when it is missing,
    /// unparsable, or empty.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionsError`] when the file cannot be read or the
    /// default cannot be written.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PermissionsError> {
        let path = path.into();
        let grants = read_grants(&path)?;
        Ok(Self { path, grants })
    }

    /// Re-reads the file, replacing the current map.
    ///
    /// # Errors
    ///
    /// As [`PermissionStore::load`]; the current map is kept on failure.
    pub fn reload(&mut self) -> Result<(), PermissionsError> {
        self.grants = read_grants(&self.path)?;
        info!(
            target: PERMISSIONS_TARGET,
            file = %self.path.display(),
            entries = self.grants.len(),
            "permissions reloaded"
        );
        Ok(())
    }

    /// Decides from an extension id and folder name. A listed id wins over
    /// the folder; unlisted extensions are denied.
    #[must_use]
    pub fn decide(&self, id: &str, folder: &str) -> bool {
        self.grants
            .get(id)
            .or_else(|| self.grants.get(folder))
            .copied()
            .unwrap_or(false)
    }

    /// Value recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<bool> {
        self.grants.get(key).copied()
    }

    /// Number of boolean entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the map holds no boolean entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// File the map was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, root: &Path, relative: &str) -> Result<bool, ManifestError> {
        let folder = extension_folder(relative)?;
        let extension_dir = root.join(EXTENSIONS_DIR).join(folder);
        let id = extension_id(&extension_dir)?;
        let allowed = self.decide(&id, folder);
        if allowed {
            debug!(
                target: PERMISSIONS_TARGET,
                module = relative,
                id = %id,
                folder,
                "permission granted"
            );
        } else {
            warn!(
                target: PERMISSIONS_TARGET,
                module = relative,
                id = %id,
                folder,
                "permission denied"
            );
        }
        Ok(allowed)
    }
}

impl PermissionGate for PermissionStore {
    fn is_permitted(&self, root: &Path, relative: &str) -> bool {
        self.check(root, relative).unwrap_or_else(|error| {
            warn!(
                target: PERMISSIONS_TARGET,
                module = relative,
                error = %error,
                "permission check failed"
            );
            false
        })
    }
}

/// Reads the first `id="..."` attribute from an extension's manifest.
///
/// # Errors
///
/// Returns [`ManifestError`] when the manifest is unreadable or has no id.
pub fn extension_id(extension_dir: &Path) -> Result<String, ManifestError> {
    let path = extension_dir.join(MANIFEST_FILE);
    let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
        path: path.clone(),
        source,
    })?;
    content
        .split_once("id=\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(id, _)| id.to_owned())
        .ok_or(ManifestError::MissingId { path })
}

fn extension_folder(relative: &str) -> Result<&str, ManifestError> {
    let outside = || ManifestError::OutsideExtensions {
        relative: relative.to_owned(),
    };
    let mut components = Path::new(relative).components();
    let (Some(Component::Normal(top)), Some(Component::Normal(folder)), Some(_)) =
        (components.next(), components.next(), components.next())
    else {
        return Err(outside());
    };
    if top != EXTENSIONS_DIR {
        return Err(outside());
    }
    folder.to_str().ok_or_else(outside)
}

fn read_grants(path: &Path) -> Result<BTreeMap<String, bool>, PermissionsError> {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
            Ok(map) if !map.is_empty() => {
                info!(
                    target: PERMISSIONS_TARGET,
                    file = %path.display(),
                    "loaded permissions"
                );
                return Ok(boolean_entries(map));
            }
            Ok(_) => {
                warn!(target: PERMISSIONS_TARGET, file = %path.display(), "permissions file is empty");
            }
            Err(error) => {
                warn!(
                    target: PERMISSIONS_TARGET,
                    file = %path.display(),
                    error = %error,
                    "failed to parse permissions file"
                );
            }
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(PermissionsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    write_default(path)
}

fn write_default(path: &Path) -> Result<BTreeMap<String, bool>, PermissionsError> {
    let mut map = Map::new();
    map.insert("instructions".to_owned(), Value::from(DEFAULT_INSTRUCTIONS));
    for grant in DEFAULT_GRANTS {
        map.insert((*grant).to_owned(), Value::Bool(true));
    }
    let write_error = |source| PermissionsError::WriteDefault {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let text = serde_json::to_string_pretty(&Value::Object(map.clone()))
        .map_err(|error| write_error(io::Error::other(error)))?;
    fs::write(path, text).map_err(write_error)?;
    info!(
        target: PERMISSIONS_TARGET,
        file = %path.display(),
        "initialised default permissions"
    );
    Ok(boolean_entries(map))
}

fn boolean_entries(map: Map<String, Value>) -> BTreeMap<String, bool> {
    map.into_iter()
        .filter_map(|(key, value)| value.as_bool().map(|allowed| (key, allowed)))
        .collect()
}
