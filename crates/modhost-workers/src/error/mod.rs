//! Domain errors raised while loading modules and supervising workers.
//!
//! I/O errors are wrapped in `Arc` so the enums stay small and cloneable
//! enough for the `result_large_err` lint.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors arising from worker lifecycle operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A worker with this name is already tracked.
    #[error("worker '{name}' is already running")]
    DuplicateName {
        /// Worker name.
        name: String,
    },

    /// The worker process could not be started.
    #[error("worker '{name}' failed to start '{program}': {source}")]
    Spawn {
        /// Worker name.
        name: String,
        /// Program that was launched.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Polling or reaping the worker process failed.
    #[error("failed to wait for worker '{name}': {source}")]
    Wait {
        /// Worker name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The worker process could not be killed.
    #[error("failed to kill worker '{name}': {source}")]
    Kill {
        /// Worker name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Errors arising while turning a module file into an entry point.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module file does not exist.
    #[error("module '{path}' does not exist")]
    NotFound {
        /// Module path.
        path: PathBuf,
    },

    /// The probe process could not be run.
    #[error("failed to probe module '{path}': {source}")]
    Probe {
        /// Module path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The probe did not finish in time.
    #[error("probing module '{path}' timed out after {timeout:?}")]
    ProbeTimeout {
        /// Module path.
        path: PathBuf,
        /// Probe deadline.
        timeout: Duration,
    },

    /// The interpreter could not import the module.
    #[error("module '{path}' failed to import (status {status:?}): {stderr}")]
    ImportFailed {
        /// Module path.
        path: PathBuf,
        /// Probe exit code, if it exited normally.
        status: Option<i32>,
        /// Trimmed stderr output of the probe.
        stderr: String,
    },

    /// The probe output could not be understood.
    #[error("module probe for '{path}' produced an invalid report: {message}")]
    MalformedReport {
        /// Module path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// `main` exists but cannot be called with zero or one argument.
    #[error(
        "module '{path}' exports main with an unsupported signature \
         ({required} required parameters, accepts positional: {accepts_signal})"
    )]
    UnsupportedSignature {
        /// Module path.
        path: PathBuf,
        /// Parameters without defaults.
        required: usize,
        /// Whether a positional argument is accepted at all.
        accepts_signal: bool,
    },
}

/// Errors arising from log tailing.
#[derive(Debug, Error)]
pub enum TailError {
    /// Reading, seeking, or rewriting the log file failed.
    #[error("log tail I/O on '{path}' failed: {source}")]
    Io {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}
