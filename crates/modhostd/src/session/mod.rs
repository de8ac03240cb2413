//! The session protocol: turning peer messages into worker spawns.
//!
//! A [`Session`] lives for one attached channel and only remembers the
//! installation root the peer announced. Everything that must survive a
//! reconnect (the dispatched set and the workers themselves) lives in the
//! [`Dispatcher`], which the runtime keeps for the whole process lifetime.
//! Re-announcing a module that was already dispatched is therefore a no-op,
//! even on a fresh channel.

mod message;
mod root;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use modhost_channel::{ChannelError, Endpoint, ReadOutcome};
use modhost_workers::{ModuleLoader, ProcessSupervisor, ShutdownSummary, worker_name};
use tracing::{debug, info, warn};

use crate::health::HealthReporter;
use crate::permissions::PermissionGate;
use crate::shutdown::ShutdownFlag;

pub use message::Message;
pub use root::resolve_root;

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// How often the protocol loop wakes up to check for a shutdown request.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

const EXTENSIONS_DIR: &str = "extensions";

/// Why a session stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer asked for a fresh channel.
    RestartRequested,
    /// The peer signalled it was torn down.
    PeerTornDown,
    /// The peer closed its end.
    PeerDisconnected,
    /// A shutdown signal arrived.
    ShutdownRequested,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RestartRequested => "restart requested",
            Self::PeerTornDown => "peer torn down",
            Self::PeerDisconnected => "peer disconnected",
            Self::ShutdownRequested => "shutdown requested",
        };
        f.write_str(text)
    }
}

/// Why an announced module was not spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No root has been announced on this session yet.
    RootUnknown,
    /// The path is absolute or climbs out of the root.
    InvalidPath,
    /// The file does not exist under the root.
    Missing(PathBuf),
    /// The path is not under `extensions/`.
    OutsideExtensions,
    /// The permission map does not allow the extension.
    Denied,
    /// The module exports no `main`.
    NoEntryPoint,
    /// The module could not be loaded.
    LoadFailed(String),
    /// The worker process could not be started.
    SpawnFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootUnknown => f.write_str("installation root not known yet"),
            Self::InvalidPath => f.write_str("path must be relative without '..'"),
            Self::Missing(path) => write!(f, "'{}' does not exist", path.display()),
            Self::OutsideExtensions => f.write_str("module is not under extensions/"),
            Self::Denied => f.write_str("permission denied"),
            Self::NoEntryPoint => f.write_str("module has no main function"),
            Self::LoadFailed(message) => write!(f, "failed to load module: {message}"),
            Self::SpawnFailed(message) => write!(f, "failed to start worker: {message}"),
        }
    }
}

/// Result of announcing one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A worker was started.
    Spawned {
        /// Name of the new worker.
        worker: String,
    },
    /// The module was dispatched before; nothing happened.
    AlreadyDispatched,
    /// The module was rejected.
    Skipped(SkipReason),
}

/// Process-lifetime dispatch state: the dispatched set and the workers.
pub struct Dispatcher<G, L> {
    gate: G,
    loader: L,
    supervisor: ProcessSupervisor,
    dispatched: BTreeSet<String>,
    reporter: Arc<dyn HealthReporter>,
}

impl<G, L> Dispatcher<G, L>
where
    G: PermissionGate,
    L: ModuleLoader,
{
    /// Builds a dispatcher with no workers.
    pub fn new(gate: G, loader: L, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            gate,
            loader,
            supervisor: ProcessSupervisor::new(),
            dispatched: BTreeSet::new(),
            reporter,
        }
    }

    /// Resolves, checks, and spawns the module at `relative` under `root`.
    ///
    /// Spellings of one path (`a//b`, `a/./b`) share a single module id. A
    /// module joins the dispatched set once it passes the permission gate,
    /// so a module that later fails to load is not retried.
    pub fn dispatch(&mut self, root: &Path, relative: &str) -> DispatchOutcome {
        let Some(module) = module_id(relative) else {
            let reason = SkipReason::InvalidPath;
            self.reporter.module_skipped(relative, &reason);
            return DispatchOutcome::Skipped(reason);
        };
        if self.dispatched.contains(&module) {
            debug!(target: SESSION_TARGET, module = %module, "module already dispatched");
            return DispatchOutcome::AlreadyDispatched;
        }
        let outcome = match self.admit(root, &module) {
            Ok(path) => {
                self.dispatched.insert(module.clone());
                self.launch(&path, &module)
            }
            Err(reason) => DispatchOutcome::Skipped(reason),
        };
        match &outcome {
            DispatchOutcome::Spawned { worker } => {
                self.reporter.module_dispatched(&module, worker);
            }
            DispatchOutcome::Skipped(reason) => self.reporter.module_skipped(&module, reason),
            DispatchOutcome::AlreadyDispatched => {}
        }
        outcome
    }

    fn admit(&self, root: &Path, module: &str) -> Result<PathBuf, SkipReason> {
        let path = root.join(module);
        if !path.is_file() {
            return Err(SkipReason::Missing(path));
        }
        if module.split('/').next() != Some(EXTENSIONS_DIR) {
            return Err(SkipReason::OutsideExtensions);
        }
        if !self.gate.is_permitted(root, module) {
            return Err(SkipReason::Denied);
        }
        Ok(path)
    }

    fn launch(&mut self, path: &Path, relative: &str) -> DispatchOutcome {
        let entry = match self.loader.load(path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return DispatchOutcome::Skipped(SkipReason::NoEntryPoint),
            Err(error) => return DispatchOutcome::Skipped(SkipReason::LoadFailed(error.to_string())),
        };
        let worker = worker_name(relative);
        match self.supervisor.spawn(worker.clone(), entry) {
            Ok(_) => DispatchOutcome::Spawned { worker },
            Err(error) => DispatchOutcome::Skipped(SkipReason::SpawnFailed(error.to_string())),
        }
    }

    /// Whether `relative` has been dispatched, under any spelling.
    #[must_use]
    pub fn is_dispatched(&self, relative: &str) -> bool {
        module_id(relative).is_some_and(|module| self.dispatched.contains(&module))
    }

    /// Every dispatched module path.
    pub fn dispatched(&self) -> impl Iterator<Item = &str> {
        self.dispatched.iter().map(String::as_str)
    }

    /// Workers started so far.
    #[must_use]
    pub const fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The permission gate, e.g. to reload it.
    pub const fn gate_mut(&mut self) -> &mut G {
        &mut self.gate
    }

    /// Stops all workers, then joins them within `timeout`.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownSummary {
        self.supervisor.shutdown(timeout)
    }
}

/// Protocol state for one attached channel.
#[derive(Debug, Default)]
pub struct Session {
    root: Option<PathBuf>,
}

impl Session {
    /// Starts a session with no known root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installation root announced on this session.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Applies one message. Returns the end condition when the message
    /// finishes the session.
    pub fn handle<G, L>(
        &mut self,
        message: Message,
        dispatcher: &mut Dispatcher<G, L>,
    ) -> Option<SessionEnd>
    where
        G: PermissionGate,
        L: ModuleLoader,
    {
        match message {
            Message::Ping => debug!(target: SESSION_TARGET, "ping"),
            Message::Restart => {
                info!(target: SESSION_TARGET, "peer requested restart");
                return Some(SessionEnd::RestartRequested);
            }
            Message::PackagePath(segments) => self.announce_paths(&segments),
            Message::Modules(modules) => self.announce_modules(&modules, dispatcher),
            Message::Unknown(text) => {
                warn!(target: SESSION_TARGET, message = %text, "ignoring unknown message");
            }
        }
        None
    }

    /// Reads and applies messages until the session ends.
    ///
    /// # Errors
    ///
    /// Channel failures other than a disconnect are returned as-is.
    pub fn run<G, L>(
        &mut self,
        endpoint: &mut Endpoint,
        dispatcher: &mut Dispatcher<G, L>,
        shutdown: &ShutdownFlag,
    ) -> Result<SessionEnd, ChannelError>
    where
        G: PermissionGate,
        L: ModuleLoader,
    {
        loop {
            if shutdown.is_raised() {
                return Ok(SessionEnd::ShutdownRequested);
            }
            match endpoint.read_within(READ_POLL_INTERVAL) {
                Ok(ReadOutcome::Message(text)) => {
                    debug!(target: SESSION_TARGET, message = %text, "received message");
                    if let Some(end) = self.handle(Message::parse(&text), dispatcher) {
                        return Ok(end);
                    }
                }
                Ok(ReadOutcome::NoData) => {}
                Ok(ReadOutcome::PeerTornDown) => return Ok(SessionEnd::PeerTornDown),
                Err(error) if error.is_disconnect() => return Ok(SessionEnd::PeerDisconnected),
                Err(error) => return Err(error),
            }
        }
    }

    fn announce_paths(&mut self, segments: &[String]) {
        match resolve_root(segments) {
            Some(root) => {
                info!(target: SESSION_TARGET, root = %root.display(), "installation root resolved");
                self.root = Some(root);
            }
            None => warn!(
                target: SESSION_TARGET,
                segments = segments.len(),
                "no installation root in announced search paths"
            ),
        }
    }

    fn announce_modules<G, L>(&self, modules: &[String], dispatcher: &mut Dispatcher<G, L>)
    where
        G: PermissionGate,
        L: ModuleLoader,
    {
        let Some(root) = self.root.as_deref() else {
            warn!(
                target: SESSION_TARGET,
                modules = modules.len(),
                "ignoring module announcement before the root is known"
            );
            for module in modules {
                dispatcher.reporter.module_skipped(module, &SkipReason::RootUnknown);
            }
            return;
        };
        for module in modules {
            dispatcher.dispatch(root, module);
        }
    }
}

/// Canonical id for an announced path: `/`-joined segments without empty
/// or `.` parts. Absolute paths and any `..` have no id.
fn module_id(relative: &str) -> Option<String> {
    if relative.starts_with('/') {
        return None;
    }
    let segments: Vec<&str> = relative
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if segments.is_empty() || segments.contains(&"..") {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests;
