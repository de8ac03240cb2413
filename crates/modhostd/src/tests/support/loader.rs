//! Module loader double that hands out canned entry points.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use modhost_workers::{EntryPoint, ModuleError, ModuleLoader, WorkerCommand};

/// Records every load and returns the same entry point each time.
#[derive(Debug, Clone)]
pub struct StubLoader {
    entry: Option<EntryPoint>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl StubLoader {
    /// Loader whose modules run a shell worker that exits once stopped.
    pub fn stop_aware() -> Self {
        Self::returning(Some(EntryPoint::StopSignal(
            WorkerCommand::new("sh").args(["-c", "cat >/dev/null"]),
        )))
    }

    /// Loader whose modules export no `main`.
    pub fn without_main() -> Self {
        Self::returning(None)
    }

    fn returning(entry: Option<EntryPoint>) -> Self {
        Self {
            entry,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Paths loaded so far.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().expect("loader mutex poisoned").clone()
    }
}

impl ModuleLoader for StubLoader {
    fn load(&self, path: &Path) -> Result<Option<EntryPoint>, ModuleError> {
        self.calls
            .lock()
            .expect("loader mutex poisoned")
            .push(path.to_path_buf());
        Ok(self.entry.clone())
    }
}
