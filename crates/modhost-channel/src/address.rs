//! Filesystem locations that make up a named channel.

use std::path::{Path, PathBuf};

/// Names the artefacts of one channel inside a runtime directory.
///
/// A channel `N` in directory `D` is the FIFO pair `D/N_in` and `D/N_out`,
/// the instance lock `D/N.lock`, and the peer claim `D/N.peer`. Directions
/// are named from the listener's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    dir: PathBuf,
    name: String,
    inbound: PathBuf,
    outbound: PathBuf,
    lock: PathBuf,
    claim: PathBuf,
}

impl ChannelAddress {
    /// Builds the address of channel `name` inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        let dir = dir.into();
        let name = name.into();
        let inbound = dir.join(format!("{name}_in"));
        let outbound = dir.join(format!("{name}_out"));
        let lock = dir.join(format!("{name}.lock"));
        let claim = dir.join(format!("{name}.peer"));
        Self {
            dir,
            name,
            inbound,
            outbound,
            lock,
            claim,
        }
    }

    /// Directory holding the channel artefacts.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base name of the channel.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// FIFO carrying messages from the peer to the listener.
    #[must_use]
    pub fn inbound_path(&self) -> &Path {
        &self.inbound
    }

    /// FIFO carrying messages from the listener to the peer.
    #[must_use]
    pub fn outbound_path(&self) -> &Path {
        &self.outbound
    }

    /// Lock file recording the listener's PID.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock
    }

    /// File a dialler holds an exclusive `flock` on while attached.
    #[must_use]
    pub fn claim_path(&self) -> &Path {
        &self.claim
    }
}
