//! Error surface for channel operations.
//!
//! Failures are split so callers can branch exhaustively: creation failures
//! mean another supervisor owns the name, `Io` failures carry the OS error
//! code plus a coarse [`IoFailureKind`], and decoding failures describe a
//! peer that broke the framing contract.

use std::io;
use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailureKind {
    /// The peer closed its end or the pipe broke.
    Disconnected,
    /// The OS ran out of memory, descriptors, or space.
    ResourceExhausted,
    /// The channel is busy or has nobody attached on the other side yet.
    Busy,
    /// The channel does not exist (yet).
    Unavailable,
    /// Anything else.
    Other,
}

impl IoFailureKind {
    /// Classifies an I/O error by its OS error code.
    #[must_use]
    pub fn classify(error: &io::Error) -> Self {
        match error.raw_os_error() {
            Some(libc::EPIPE | libc::ECONNRESET) => Self::Disconnected,
            Some(libc::ENOMEM | libc::ENOSPC | libc::EMFILE | libc::ENFILE) => {
                Self::ResourceExhausted
            }
            Some(libc::EAGAIN | libc::EBUSY | libc::ENXIO) => Self::Busy,
            Some(libc::ENOENT) => Self::Unavailable,
            _ => match error.kind() {
                io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => Self::Disconnected,
                _ => Self::Other,
            },
        }
    }

    /// Whether a dialler should keep retrying after this failure.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Busy | Self::Unavailable)
    }
}

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Another live process already serves a channel with this name.
    #[error("channel '{name}' is already in use by pid {pid}")]
    InUse {
        /// Channel base name.
        name: String,
        /// PID recorded in the lock file.
        pid: u32,
    },
    /// A channel artefact could not be created.
    #[error("failed to create channel artefact '{path}': {source}")]
    Create {
        /// Path of the artefact.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Dialling gave up before a listener admitted this peer.
    #[error("timed out after {timeout:?} waiting for channel '{name}'")]
    Timeout {
        /// Channel base name.
        name: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Waiting for a peer was cancelled.
    #[error("waiting for a peer on channel '{name}' was interrupted")]
    Interrupted {
        /// Channel base name.
        name: String,
    },
    /// The endpoint has no attached peer.
    #[error("channel '{name}' has no attached peer")]
    NotConnected {
        /// Channel base name.
        name: String,
    },
    /// An I/O operation failed.
    #[error("channel {operation} failed ({kind:?}): {source}")]
    Io {
        /// Operation that failed, e.g. `read`.
        operation: &'static str,
        /// Classification of the failure.
        kind: IoFailureKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A frame exceeded the buffer capacity.
    #[error("frame of {len} bytes exceeds the {capacity} byte buffer")]
    FrameTooLarge {
        /// Announced or attempted payload length.
        len: usize,
        /// Configured buffer capacity.
        capacity: usize,
    },
    /// A payload was not valid UTF-8.
    #[error("message payload is not valid UTF-8: {source}")]
    InvalidUtf8 {
        /// Underlying decoding error.
        #[from]
        source: FromUtf8Error,
    },
}

impl ChannelError {
    pub(crate) fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io {
            operation,
            kind: IoFailureKind::classify(&source),
            source,
        }
    }

    pub(crate) fn disconnected(operation: &'static str) -> Self {
        Self::io(operation, io::Error::from_raw_os_error(libc::EPIPE))
    }

    /// Whether the channel could not be created, typically because another
    /// supervisor instance is running.
    #[must_use]
    pub const fn is_create_failure(&self) -> bool {
        matches!(self, Self::InUse { .. } | Self::Create { .. })
    }

    /// Whether the failure means the peer went away.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io {
                kind: IoFailureKind::Disconnected,
                ..
            }
        )
    }

    /// Classification of an I/O failure, if this is one.
    #[must_use]
    pub const fn io_kind(&self) -> Option<IoFailureKind> {
        match self {
            Self::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Raw OS error code underlying an I/O or creation failure.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } | Self::Create { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
