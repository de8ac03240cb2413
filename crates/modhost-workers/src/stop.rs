//! One-way stop signal shared between the supervisor and a worker.
//!
//! Across the process boundary the signal is the worker's stdin pipe:
//! setting it closes the pipe and the worker observes end-of-file. Once set
//! it stays set.

use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    set: AtomicBool,
    pipe: Mutex<Option<ChildStdin>>,
}

/// Single-writer, many-reader stop flag.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal. Further calls have no effect.
    pub fn set(&self) {
        if self.inner.set.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.take_pipe());
    }

    /// Whether the signal has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Binds the signal to a worker's stdin.
    pub(crate) fn attach(&self, pipe: ChildStdin) {
        let mut slot = self
            .inner
            .pipe
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_set() {
            drop(pipe);
        } else {
            *slot = Some(pipe);
        }
    }

    fn take_pipe(&self) -> Option<ChildStdin> {
        self.inner
            .pipe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
