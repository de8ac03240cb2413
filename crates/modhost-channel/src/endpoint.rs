//! Duplex endpoint over a pair of named FIFOs.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::address::ChannelAddress;
use crate::error::{ChannelError, IoFailureKind};
use crate::frame::{FrameDecoder, encode};
use crate::lock::{InstanceLock, PeerClaim};
use crate::{CHANNEL_TARGET, TEARDOWN_SENTINEL, sys};

const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8 * 1024;
const RELEASE_ATTEMPTS: u32 = 40;

/// Which side of the channel an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the channel and waits for peers.
    Listener,
    /// Attached to a channel created by someone else.
    Dialler,
}

/// Result of a read that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete message.
    Message(String),
    /// Nothing queued (non-blocking mode) or the wait expired.
    NoData,
    /// The peer signalled it was torn down without a clean close.
    PeerTornDown,
}

#[derive(Debug)]
struct Streams {
    reader: File,
    writer: File,
}

#[derive(Debug)]
enum Link {
    /// Listening: the inbound FIFO is open, no peer yet.
    Pending { reader: File },
    Attached(Streams),
    Closed,
}

/// One side of a named duplex channel.
///
/// Both directions are attached and released together. Closing is
/// idempotent and also happens on drop; a listener removes its FIFOs and
/// lock file when it closes, and a dialler gives up its peer claim.
#[derive(Debug)]
pub struct Endpoint {
    address: ChannelAddress,
    role: Role,
    capacity: usize,
    blocking: bool,
    link: Link,
    decoder: FrameDecoder,
    lock: Option<InstanceLock>,
    claim: Option<PeerClaim>,
}

impl Endpoint {
    /// Creates the channel and starts listening for a peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InUse`] when a live process already owns the
    /// name and [`ChannelError::Create`] when the artefacts cannot be made.
    pub fn listen(address: ChannelAddress, capacity: usize) -> Result<Self, ChannelError> {
        fs::create_dir_all(address.dir()).map_err(|source| ChannelError::Create {
            path: address.dir().to_path_buf(),
            source,
        })?;
        let lock = InstanceLock::acquire(&address)?;
        for path in [address.inbound_path(), address.outbound_path()] {
            create_fifo(path)?;
        }
        PeerClaim::offer(&address)?;
        let reader = sys::open_fifo(address.inbound_path(), false, true).map_err(|source| {
            ChannelError::Create {
                path: address.inbound_path().to_path_buf(),
                source,
            }
        })?;
        info!(
            target: CHANNEL_TARGET,
            channel = address.name(),
            dir = %address.dir().display(),
            capacity,
            "channel listening"
        );
        Ok(Self {
            address,
            role: Role::Listener,
            capacity,
            blocking: true,
            link: Link::Pending { reader },
            decoder: FrameDecoder::new(capacity),
            lock: Some(lock),
            claim: None,
        })
    }

    /// Waits until a peer attaches both directions.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is closed or an attach attempt hits an I/O
    /// error other than "no reader yet".
    pub fn accept(&mut self) -> Result<(), ChannelError> {
        self.accept_until(&AtomicBool::new(false))
    }

    /// Like [`Endpoint::accept`], but gives up once `cancel` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Interrupted`] when cancelled, otherwise as
    /// [`Endpoint::accept`].
    pub fn accept_until(&mut self, cancel: &AtomicBool) -> Result<(), ChannelError> {
        match &self.link {
            Link::Attached(_) => return Ok(()),
            Link::Closed => return Err(self.not_connected()),
            Link::Pending { .. } => {}
        }
        let writer = loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(ChannelError::Interrupted {
                    name: self.address.name().to_owned(),
                });
            }
            match sys::open_fifo(self.address.outbound_path(), true, true) {
                Ok(file) => break file,
                Err(error) if error.raw_os_error() == Some(libc::ENXIO) => {
                    thread::sleep(ATTACH_POLL_INTERVAL);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ChannelError::io("accept", error)),
            }
        };
        let Link::Pending { reader } = std::mem::replace(&mut self.link, Link::Closed) else {
            return Err(self.not_connected());
        };
        let streams = Streams { reader, writer };
        apply_mode(&streams, self.blocking).map_err(|error| ChannelError::io("accept", error))?;
        self.link = Link::Attached(streams);
        info!(
            target: CHANNEL_TARGET,
            channel = self.address.name(),
            "peer attached"
        );
        Ok(())
    }

    /// Attaches to an existing listening channel, retrying until `timeout`.
    ///
    /// Each listen admits one dialler. A second one keeps retrying until the
    /// listener closes and listens afresh, or the time runs out.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Timeout`] when no listener appeared, another
    /// peer held the channel, or the listener did not accept in time, and
    /// [`ChannelError::Io`] for non-transient failures.
    pub fn dial(
        address: ChannelAddress,
        capacity: usize,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let deadline = Instant::now() + timeout;
        let expired = |address: &ChannelAddress| ChannelError::Timeout {
            name: address.name().to_owned(),
            timeout,
        };
        let (writer, claim) = loop {
            match attach_writer(&address) {
                Ok(attached) => break attached,
                Err(error) if IoFailureKind::classify(&error).is_transient() => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(expired(&address));
                    }
                    thread::sleep(ATTACH_POLL_INTERVAL.min(deadline - now));
                }
                Err(error) => return Err(ChannelError::io("dial", error)),
            }
        };
        let reader = match open_reader_by(address.outbound_path(), deadline) {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                debug!(
                    target: CHANNEL_TARGET,
                    channel = address.name(),
                    "listener did not accept before the dial deadline"
                );
                claim.relinquish();
                return Err(expired(&address));
            }
            Err(error) => {
                claim.relinquish();
                return Err(ChannelError::io("dial", error));
            }
        };
        debug!(
            target: CHANNEL_TARGET,
            channel = address.name(),
            "dialled channel"
        );
        Ok(Self {
            address,
            role: Role::Dialler,
            capacity,
            blocking: true,
            link: Link::Attached(Streams { reader, writer }),
            decoder: FrameDecoder::new(capacity),
            lock: None,
            claim: Some(claim),
        })
    }

    /// Reads the next message.
    ///
    /// Blocks for a whole message in blocking mode; returns
    /// [`ReadOutcome::NoData`] straight away in non-blocking mode when
    /// nothing is queued.
    ///
    /// # Errors
    ///
    /// A closed peer surfaces as a [`ChannelError::Io`] whose kind is
    /// [`IoFailureKind::Disconnected`]; framing violations surface as
    /// [`ChannelError::FrameTooLarge`] or [`ChannelError::InvalidUtf8`].
    pub fn read(&mut self) -> Result<ReadOutcome, ChannelError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return self.decode(frame);
            }
            let Link::Attached(streams) = &mut self.link else {
                return Err(self.not_connected());
            };
            let mut chunk = [0_u8; READ_CHUNK];
            match streams.reader.read(&mut chunk) {
                Ok(0) => return Err(ChannelError::disconnected("read")),
                Ok(count) => self.decoder.push(chunk.get(..count).unwrap_or_default()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::NoData);
                }
                Err(error) => return Err(ChannelError::io("read", error)),
            }
        }
    }

    /// Waits at most `timeout` for a message, returning
    /// [`ReadOutcome::NoData`] when none arrived.
    ///
    /// # Errors
    ///
    /// As [`Endpoint::read`].
    pub fn read_within(&mut self, timeout: Duration) -> Result<ReadOutcome, ChannelError> {
        if self.decoder.pending() > 0 || !self.blocking {
            return self.read();
        }
        let Link::Attached(streams) = &self.link else {
            return Err(self.not_connected());
        };
        let ready = sys::wait_readable(streams.reader.as_fd(), timeout)
            .map_err(|error| ChannelError::io("read", error))?;
        if ready {
            self.read()
        } else {
            Ok(ReadOutcome::NoData)
        }
    }

    /// Sends one whole message and flushes it.
    ///
    /// # Errors
    ///
    /// Fails when the payload exceeds the buffer capacity or the write
    /// fails, e.g. because the peer has gone away.
    pub fn write(&mut self, message: &str) -> Result<(), ChannelError> {
        let frame = encode(message, self.capacity)?;
        let Link::Attached(streams) = &mut self.link else {
            return Err(self.not_connected());
        };
        streams
            .writer
            .write_all(&frame)
            .and_then(|()| streams.writer.flush())
            .map_err(|error| ChannelError::io("write", error))?;
        trace!(
            target: CHANNEL_TARGET,
            channel = self.address.name(),
            bytes = message.len(),
            "message written"
        );
        Ok(())
    }

    /// Switches both directions between blocking and non-blocking mode.
    ///
    /// # Errors
    ///
    /// Fails when the descriptor flags cannot be changed.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<(), ChannelError> {
        if self.blocking == blocking {
            return Ok(());
        }
        if let Link::Attached(streams) = &self.link {
            apply_mode(streams, blocking).map_err(|error| ChannelError::io("set_blocking", error))?;
        }
        self.blocking = blocking;
        Ok(())
    }

    /// Releases the channel. Safe to call repeatedly.
    pub fn close(&mut self) {
        if matches!(self.link, Link::Closed) && self.lock.is_none() && self.claim.is_none() {
            return;
        }
        if let Link::Attached(streams) = &mut self.link
            && let Err(error) = streams.writer.flush()
        {
            debug!(
                target: CHANNEL_TARGET,
                channel = self.address.name(),
                error = %error,
                "flush during close failed"
            );
        }
        self.link = Link::Closed;
        self.claim = None;
        if self.role == Role::Listener {
            for path in [
                self.address.inbound_path(),
                self.address.outbound_path(),
                self.address.claim_path(),
            ] {
                remove_artefact(path);
            }
            self.lock = None;
        }
        debug!(
            target: CHANNEL_TARGET,
            channel = self.address.name(),
            role = ?self.role,
            "channel closed"
        );
    }

    /// Address of the channel.
    #[must_use]
    pub const fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Side this endpoint plays.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether a peer is attached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.link, Link::Attached(_))
    }

    /// Whether reads block.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Largest payload accepted in either direction.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn decode(&self, frame: Vec<u8>) -> Result<ReadOutcome, ChannelError> {
        let text = String::from_utf8(frame)?;
        if text == TEARDOWN_SENTINEL {
            debug!(
                target: CHANNEL_TARGET,
                channel = self.address.name(),
                "peer sent teardown sentinel"
            );
            return Ok(ReadOutcome::PeerTornDown);
        }
        Ok(ReadOutcome::Message(text))
    }

    fn not_connected(&self) -> ChannelError {
        ChannelError::NotConnected {
            name: self.address.name().to_owned(),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the inbound writer and claims the channel for this dialler.
///
/// The writer is dropped again when the channel is already claimed, so a
/// waiting dialler never holds the listener's inbound FIFO open.
fn attach_writer(address: &ChannelAddress) -> io::Result<(File, PeerClaim)> {
    let writer = sys::open_fifo(address.inbound_path(), true, true)?;
    sys::set_nonblocking(writer.as_fd(), false)?;
    let claim = PeerClaim::try_acquire(address)?;
    Ok((writer, claim))
}

/// Opens the outbound reader, giving up at `deadline`.
///
/// The blocking open runs on a helper thread. Returns `None` on expiry.
fn open_reader_by(path: &Path, deadline: Instant) -> io::Result<Option<File>> {
    let (sender, receiver) = mpsc::channel();
    let target = path.to_path_buf();
    drop(
        thread::Builder::new()
            .name("modhost-dial".to_owned())
            .spawn(move || drop(sender.send(sys::open_fifo(&target, false, false))))?,
    );
    match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(opened) => opened.map(Some),
        Err(RecvTimeoutError::Timeout) => {
            release_blocked_open(path, &receiver);
            Ok(None)
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(io::Error::other("reader open helper exited without a result"))
        }
    }
}

fn release_blocked_open(path: &Path, receiver: &Receiver<io::Result<File>>) {
    for _ in 0..RELEASE_ATTEMPTS {
        // A reader blocked in open(2) returns once any writer opens the FIFO.
        drop(sys::open_fifo(path, true, true));
        if !matches!(
            receiver.recv_timeout(ATTACH_POLL_INTERVAL),
            Err(RecvTimeoutError::Timeout)
        ) {
            return;
        }
    }
    warn!(
        target: CHANNEL_TARGET,
        file = %path.display(),
        "dial helper is still blocked opening the reader"
    );
}

fn apply_mode(streams: &Streams, blocking: bool) -> io::Result<()> {
    sys::set_nonblocking(streams.reader.as_fd(), !blocking)?;
    sys::set_nonblocking(streams.writer.as_fd(), !blocking)
}

fn create_fifo(path: &Path) -> Result<(), ChannelError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(target: CHANNEL_TARGET, file = %path.display(), "replaced leftover fifo");
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ChannelError::Create {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    sys::make_fifo(path).map_err(|source| ChannelError::Create {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_artefact(path: &Path) {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => {
            warn!(
                target: CHANNEL_TARGET,
                file = %path.display(),
                error = %error,
                "failed to remove channel fifo"
            );
        }
        _ => {}
    }
}
