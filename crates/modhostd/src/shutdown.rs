//! Shutdown requests raised by termination signals.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;

const SHUTDOWN_SIGNALS: [libc::c_int; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Errors reported while installing shutdown handlers.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Flag that flips once shutdown has been requested.
///
/// The accept loop and the protocol loop poll it between waits.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    raised: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Creates a flag that only [`ShutdownFlag::raise`] sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag raised by `SIGTERM`, `SIGINT`, `SIGQUIT`, or `SIGHUP`.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when a handler cannot be
    /// registered.
    pub fn from_signals() -> Result<Self, ShutdownError> {
        let flag = Self::new();
        for signal in SHUTDOWN_SIGNALS {
            signal_hook::flag::register(signal, Arc::clone(&flag.raised))
                .map_err(|source| ShutdownError::Install { source })?;
        }
        Ok(flag)
    }

    /// Requests shutdown.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// The underlying flag, for APIs that poll an [`AtomicBool`].
    #[must_use]
    pub fn as_atomic(&self) -> &AtomicBool {
        &self.raised
    }
}
