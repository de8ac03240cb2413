//! Named duplex message channel between the supervisor and its peer.
//!
//! A channel is a pair of unidirectional FIFOs inside a runtime directory,
//! guarded by a lock file so only one listener can own a name at a time.
//! Messages are whole UTF-8 strings framed with a length prefix, so every
//! [`Endpoint::write`] on one side matches one [`Endpoint::read`] on the
//! other.
//!
//! # Lifecycle
//!
//! The supervisor calls [`Endpoint::listen`] and then [`Endpoint::accept`].
//! A peer calls [`Endpoint::dial`], which attaches its writer first and its
//! reader second, so by the time `accept` returns both directions are live.
//! Each listen admits a single peer: the first dialler marks the claim file
//! `N.peer`, and later diallers wait for a fresh listen. Each reconnect is a
//! fresh endpoint; nothing carries over between them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use modhost_channel::{ChannelAddress, Endpoint, ReadOutcome};
//!
//! let address = ChannelAddress::new("/run/user/1000/modhost", "x4_python_host");
//! let mut endpoint = Endpoint::listen(address, 64 * 1024).expect("listen");
//! endpoint.accept().expect("peer attaches");
//! match endpoint.read_within(Duration::from_millis(250)).expect("read") {
//!     ReadOutcome::Message(text) => println!("{text}"),
//!     ReadOutcome::NoData | ReadOutcome::PeerTornDown => {}
//! }
//! ```

mod address;
mod endpoint;
mod error;
mod frame;
mod lock;
mod sys;

#[cfg(test)]
mod tests;

pub use self::address::ChannelAddress;
pub use self::endpoint::{Endpoint, ReadOutcome, Role};
pub use self::error::{ChannelError, IoFailureKind};

/// Payload a peer sends when its runtime was torn down without closing.
pub const TEARDOWN_SENTINEL: &str = "garbage_collected";

/// Default per-message buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

pub(crate) const CHANNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::channel");
