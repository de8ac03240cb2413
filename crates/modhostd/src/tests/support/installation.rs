//! Temporary installation tree with one extension folder.

use std::fs;
use std::path::{Path, PathBuf};

use rstest::fixture;
use tempfile::TempDir;

/// Relative path of the module every install carries.
pub const MODULE: &str = "extensions/modA/script.py";

/// An installation root holding `extensions/modA` and a permission file.
pub struct Install {
    dir: TempDir,
}

impl Install {
    /// Installation root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a module file at `relative` with `source`.
    pub fn module(&self, relative: &str, source: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().expect("module parent")).expect("module dir");
        fs::write(&path, source).expect("module file");
        path
    }

    /// Writes `permissions.json` and returns its path.
    pub fn permissions(&self, json: &str) -> PathBuf {
        let path = self.root().join("permissions.json");
        fs::write(&path, json).expect("permissions");
        path
    }

    /// Directory for channel artefacts.
    pub fn runtime_dir(&self) -> PathBuf {
        let dir = self.root().join("run");
        fs::create_dir_all(&dir).expect("runtime dir");
        dir
    }
}

/// Builds an install whose `modA` extension has id `ws_1` and one module.
#[fixture]
pub fn install() -> Install {
    let install = Install {
        dir: TempDir::new().expect("temp dir"),
    };
    let extension = install.root().join("extensions/modA");
    fs::create_dir_all(&extension).expect("extension dir");
    fs::write(
        extension.join("content.xml"),
        r#"<content id="ws_1" name="Mod A" version="100"/>"#,
    )
    .expect("manifest");
    install.module(MODULE, "def main(stop_signal):\n    stop_signal.wait()\n");
    install
}
