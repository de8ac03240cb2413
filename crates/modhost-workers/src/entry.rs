//! Entry point shapes a worker can have.

use crate::command::WorkerCommand;

/// How a worker's entry point is called, fixed once when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `main()`: runs until it returns; cannot be asked to stop.
    NoArg,
    /// `main(stop_signal)`: polls the signal and exits once it is set.
    StopSignal,
}

/// A runnable entry point and the command that executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Entry point taking no arguments.
    NoArg(WorkerCommand),
    /// Entry point taking the worker's stop signal.
    StopSignal(WorkerCommand),
}

impl EntryPoint {
    /// Pairs a command with its calling shape.
    #[must_use]
    pub const fn new(kind: EntryKind, command: WorkerCommand) -> Self {
        match kind {
            EntryKind::NoArg => Self::NoArg(command),
            EntryKind::StopSignal => Self::StopSignal(command),
        }
    }

    /// Calling shape of the entry point.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::NoArg(_) => EntryKind::NoArg,
            Self::StopSignal(_) => EntryKind::StopSignal,
        }
    }

    /// Command that runs the entry point.
    #[must_use]
    pub const fn command(&self) -> &WorkerCommand {
        match self {
            Self::NoArg(command) | Self::StopSignal(command) => command,
        }
    }

    /// Whether the worker can be stopped cooperatively.
    #[must_use]
    pub const fn is_stoppable(&self) -> bool {
        matches!(self, Self::StopSignal(_))
    }
}
