//! The outer supervisor loop: listen, accept, run a session, decide.
//!
//! Every channel is fresh; only the [`Dispatcher`] survives from one
//! session to the next. Whatever ends the loop, every worker is stopped and
//! joined before [`Runtime::run`] returns.

use std::io;
use std::sync::Arc;

use modhost_channel::{ChannelAddress, ChannelError, Endpoint};
use modhost_config::{Config, RuntimePathsError};
use modhost_workers::{ModuleLoader, ShutdownSummary};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::health::HealthReporter;
use crate::peer::spawn_scripted_peer;
use crate::permissions::{PermissionGate, PermissionsError};
use crate::session::{Dispatcher, Session, SessionEnd};
use crate::shutdown::{ShutdownError, ShutdownFlag};

const RUNTIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runtime");

/// What to do after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Recreate the channel and wait for a peer again.
    Restart,
    /// Stop all workers and exit.
    Shutdown,
}

/// Maps a session end condition to the next step.
///
/// Disconnects restart the channel unless restarts are disabled or the
/// run is scripted, where a hang-up is the normal end of the test.
#[must_use]
pub const fn decide(end: SessionEnd, restart_on_disconnect: bool, test_mode: bool) -> Decision {
    match end {
        SessionEnd::RestartRequested => Decision::Restart,
        SessionEnd::PeerTornDown | SessionEnd::PeerDisconnected => {
            if restart_on_disconnect && !test_mode {
                Decision::Restart
            } else {
                Decision::Shutdown
            }
        }
        SessionEnd::ShutdownRequested => Decision::Shutdown,
    }
}

/// Fatal supervisor errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime directory could not be prepared.
    #[error(transparent)]
    RuntimePaths(#[from] RuntimePathsError),
    /// The permission map could not be loaded.
    #[error(transparent)]
    Permissions(#[from] PermissionsError),
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The channel could not be created, typically because another
    /// supervisor is running.
    #[error("failed to create channel: {source}")]
    Listen {
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// Waiting for a peer failed.
    #[error("failed to accept peer: {source}")]
    Accept {
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// The protocol loop hit an unexpected channel failure.
    #[error("session failed: {source}")]
    Session {
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },
    /// The scripted test peer could not be started.
    #[error("failed to start the test peer: {source}")]
    TestPeer {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Owns the dispatcher and drives sessions until shutdown.
pub struct Runtime<G, L> {
    config: Config,
    address: ChannelAddress,
    dispatcher: Dispatcher<G, L>,
    shutdown: ShutdownFlag,
    reporter: Arc<dyn HealthReporter>,
}

impl<G, L> Runtime<G, L>
where
    G: PermissionGate,
    L: ModuleLoader,
{
    /// Assembles a runtime from its collaborators.
    pub fn new(
        config: Config,
        address: ChannelAddress,
        dispatcher: Dispatcher<G, L>,
        shutdown: ShutdownFlag,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            config,
            address,
            dispatcher,
            shutdown,
            reporter,
        }
    }

    /// Serves sessions until a shutdown decision or a fatal error, then
    /// stops and joins every worker.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`RuntimeError`] that ended the loop. Workers are
    /// shut down either way.
    pub fn run(&mut self) -> Result<ShutdownSummary, RuntimeError> {
        let served = self.serve();
        if let Err(error) = &served {
            self.reporter.runtime_failed(error);
        }
        let summary = self.dispatcher.shutdown(self.config.join_timeout());
        self.reporter.runtime_stopped(&summary);
        served.map(|()| summary)
    }

    fn serve(&mut self) -> Result<(), RuntimeError> {
        loop {
            let end = self.serve_session()?;
            self.reporter.session_ended(end);
            let decision = decide(
                end,
                self.config.restart_on_disconnect(),
                self.config.test_mode().is_some(),
            );
            info!(target: RUNTIME_TARGET, reason = %end, ?decision, "session finished");
            if decision == Decision::Shutdown {
                return Ok(());
            }
        }
    }

    fn serve_session(&mut self) -> Result<SessionEnd, RuntimeError> {
        let capacity = self.config.buffer_size();
        let mut endpoint = Endpoint::listen(self.address.clone(), capacity)
            .map_err(|source| RuntimeError::Listen { source })?;
        self.reporter.channel_listening(self.address.name());

        let peer = match self.config.test_mode() {
            Some(test) => Some(
                spawn_scripted_peer(self.address.clone(), capacity, test)
                    .map_err(|source| RuntimeError::TestPeer { source })?,
            ),
            None => None,
        };

        match endpoint.accept_until(self.shutdown.as_atomic()) {
            Ok(()) => {}
            Err(ChannelError::Interrupted { .. }) => {
                debug!(target: RUNTIME_TARGET, "shutdown requested while waiting for a peer");
                return Ok(SessionEnd::ShutdownRequested);
            }
            Err(source) => return Err(RuntimeError::Accept { source }),
        }
        self.reporter.peer_attached(self.address.name());

        let mut session = Session::new();
        let ended = session.run(&mut endpoint, &mut self.dispatcher, &self.shutdown);
        endpoint.close();

        if let Some(peer) = peer {
            match peer.join() {
                Ok(Ok(reply)) => debug!(target: RUNTIME_TARGET, ?reply, "test peer finished"),
                Ok(Err(error)) => {
                    warn!(target: RUNTIME_TARGET, error = %error, "test peer failed");
                }
                Err(_) => warn!(target: RUNTIME_TARGET, "test peer panicked"),
            }
        }
        ended.map_err(|source| RuntimeError::Session { source })
    }

    /// Process-lifetime dispatch state.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<G, L> {
        &self.dispatcher
    }

    /// Flag that stops the runtime when raised.
    #[must_use]
    pub const fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }
}
