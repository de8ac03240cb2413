//! Locks that keep a channel name to one listener and one attached peer.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::CHANNEL_TARGET;
use crate::address::ChannelAddress;
use crate::error::ChannelError;

/// Holds `N.lock` for as long as a listener owns the channel name.
#[derive(Debug)]
pub(crate) struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    /// Takes the lock, clearing artefacts left behind by a dead listener.
    pub(crate) fn acquire(address: &ChannelAddress) -> Result<Self, ChannelError> {
        let file = create_lock(address)?;
        Ok(Self {
            path: address.lock_path().to_path_buf(),
            _file: file,
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: CHANNEL_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove channel lock"
                );
            }
            _ => {}
        }
    }
}

/// Marks `N.peer` as taken by the dialler attached to a channel.
///
/// A listener creates the claim file empty. The first dialler to take the
/// `flock` writes its PID into it, and the mark stays until the listener
/// closes, so each listen admits exactly one peer.
pub(crate) struct PeerClaim {
    path: PathBuf,
    lock: Flock<File>,
}

impl PeerClaim {
    /// Creates an unclaimed `N.peer`, replacing any leftover.
    pub(crate) fn offer(address: &ChannelAddress) -> Result<(), ChannelError> {
        let path = address.claim_path();
        remove_stale(path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map(drop)
            .map_err(|source| ChannelError::Create {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Claims the channel for this dialler without waiting.
    ///
    /// Fails with `EWOULDBLOCK` while another dialler is mid-claim and with
    /// `EBUSY` once the channel has been claimed.
    pub(crate) fn try_acquire(address: &ChannelAddress) -> io::Result<Self> {
        let path = address.claim_path();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut lock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|(_, errno)| io::Error::from(errno))?;
        if lock.metadata()?.len() > 0 {
            return Err(io::Error::from(Errno::EBUSY));
        }
        writeln!(lock, "{}", std::process::id())?;
        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    /// Hands the channel back after a dial that did not complete.
    pub(crate) fn relinquish(self) {
        if let Err(error) = self.lock.set_len(0) {
            warn!(
                target: CHANNEL_TARGET,
                file = %self.path.display(),
                error = %error,
                "failed to release peer claim"
            );
        }
    }
}

impl fmt::Debug for PeerClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerClaim")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn create_lock(address: &ChannelAddress) -> Result<File, ChannelError> {
    let path = address.lock_path();
    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(0o600);
    match options.open(path) {
        Ok(mut file) => {
            let pid = std::process::id();
            writeln!(file, "{pid}")
                .and_then(|()| file.sync_all())
                .map_err(|source| ChannelError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!(
                target: CHANNEL_TARGET,
                channel = address.name(),
                file = %path.display(),
                pid,
                "acquired channel lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            handle_existing_lock(address)
        }
        Err(source) => Err(ChannelError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(address: &ChannelAddress) -> Result<File, ChannelError> {
    if let Some(pid) = read_pid(address.lock_path())
        && pid != 0
    {
        if is_alive(pid).map_err(|source| ChannelError::Create {
            path: address.lock_path().to_path_buf(),
            source,
        })? {
            info!(
                target: CHANNEL_TARGET,
                channel = address.name(),
                pid,
                "refusing to listen: channel owned by a live process"
            );
            return Err(ChannelError::InUse {
                name: address.name().to_owned(),
                pid,
            });
        }
        warn!(
            target: CHANNEL_TARGET,
            channel = address.name(),
            pid,
            "previous listener not detected; cleaning stale channel"
        );
    }
    for stale in [
        address.lock_path(),
        address.inbound_path(),
        address.outbound_path(),
        address.claim_path(),
    ] {
        remove_stale(stale)?;
    }
    create_lock(address)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_stale(path: &Path) -> Result<(), ChannelError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(target: CHANNEL_TARGET, file = %path.display(), "removed stale artefact");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ChannelError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_alive(pid: u32) -> Result<bool, io::Error> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}
