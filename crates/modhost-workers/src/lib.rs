//! Worker process supervision for the module host.
//!
//! Each discovered module runs in its own OS process. The
//! [`ProcessSupervisor`] owns every [`WorkerHandle`], and the only thing it
//! shares with a worker is a one-way [`StopSignal`]. Workers whose entry
//! point accepts the signal are expected to exit once it is set; workers
//! that do not are killed when their join timeout runs out.
//!
//! Modules become entry points through a [`ModuleLoader`]. The production
//! [`ScriptModuleLoader`] probes a script with an external interpreter and
//! picks the calling shape once, before anything is spawned.
//!
//! The crate also carries [`LogTail`], which follows a log file that
//! another process appends to.

mod command;
mod entry;
mod error;
mod handle;
mod log_tail;
mod module;
mod stop;
mod supervisor;

#[cfg(test)]
mod tests;

pub use self::command::WorkerCommand;
pub use self::entry::{EntryKind, EntryPoint};
pub use self::error::{ModuleError, TailError, WorkerError};
pub use self::handle::{JoinOutcome, WorkerHandle, WorkerState};
pub use self::log_tail::{DEFAULT_TRIM_BYTES, LogTail};
pub use self::module::{DEFAULT_PROBE_TIMEOUT, ModuleLoader, ProbeReport, ScriptModuleLoader};
pub use self::stop::StopSignal;
pub use self::supervisor::{ProcessSupervisor, ShutdownSummary};

pub(crate) const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");
pub(crate) const MODULE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::module");
pub(crate) const TAIL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::log_tail");

/// Derives a worker's display name from a module's relative path.
///
/// ```
/// assert_eq!(
///     modhost_workers::worker_name("extensions/modA/script.py"),
///     "Proc_extensions_modA_script.py"
/// );
/// ```
#[must_use]
pub fn worker_name(relative_path: &str) -> String {
    format!("Proc_{}", relative_path.replace('/', "_"))
}
