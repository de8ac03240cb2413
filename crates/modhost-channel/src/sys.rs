//! Thin wrappers over the FIFO system calls.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

/// Creates an owner-only FIFO at `path`.
pub(crate) fn make_fifo(path: &Path) -> io::Result<()> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}

/// Opens one end of a FIFO.
pub(crate) fn open_fifo(path: &Path, write: bool, nonblocking: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    if write {
        options.write(true);
    } else {
        options.read(true);
    }
    if nonblocking {
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path)
}

/// Sets or clears `O_NONBLOCK` on a descriptor.
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, enabled: bool) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` stays open for the borrow and F_GETFL takes no pointer.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let updated = if enabled {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if updated == flags {
        return Ok(());
    }
    // SAFETY: as above; F_SETFL takes an integer flag set.
    if unsafe { libc::fcntl(raw, libc::F_SETFL, updated) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Waits up to `timeout` for `fd` to become readable or hung up.
///
/// Returns `false` on expiry or when a signal interrupts the wait.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: `pollfd` is a single valid entry that outlives the call.
    let ready = unsafe { libc::poll(&raw mut pollfd, 1, millis) };
    if ready < 0 {
        let error = io::Error::last_os_error();
        if error.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(error);
    }
    Ok(ready > 0)
}
