//! Host-side supervisor that runs permissioned extension modules as
//! worker processes on behalf of a peer application.
//!
//! The supervisor owns a named duplex channel (see [`modhost_channel`]).
//! The peer announces its script search paths, from which the supervisor
//! infers the installation root, and then the modules it wants running.
//! Each module that exists, lives under `extensions/`, and passes the
//! [`PermissionGate`] is probed for a `main` entry point and started as a
//! worker (see [`modhost_workers`]).
//!
//! Channels are disposable: when the peer disconnects or asks for a
//! restart, the [`Runtime`] recreates the channel and waits again, while
//! the workers and the set of dispatched modules carry over. Fatal errors
//! and shutdown signals end the loop, and every worker is stopped and
//! joined before the process exits.

mod health;
mod peer;
mod permissions;
mod runtime;
mod session;
mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use modhost_channel::ChannelAddress;
use modhost_config::{Config, RuntimePaths};
use modhost_workers::{ScriptModuleLoader, ShutdownSummary};

pub use health::{HealthReporter, StructuredHealthReporter};
pub use peer::{
    PEER_DIAL_TIMEOUT, modules_message, package_path_message, run_scripted_peer,
    spawn_scripted_peer,
};
pub use permissions::{
    ManifestError, PermissionGate, PermissionStore, PermissionsError, extension_id,
};
pub use runtime::{Decision, Runtime, RuntimeError, decide};
pub use session::{
    DispatchOutcome, Dispatcher, Message, READ_POLL_INTERVAL, Session, SessionEnd, SkipReason,
    resolve_root,
};
pub use shutdown::{ShutdownError, ShutdownFlag};
pub use telemetry::{TelemetryError, TelemetryHandle};

/// Runs the supervisor with the production collaborators.
///
/// # Errors
///
/// Returns the fatal [`RuntimeError`] that stopped the supervisor. It has
/// already been reported through the health reporter.
pub fn run_supervisor(config: Config) -> Result<ShutdownSummary, RuntimeError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(
        StructuredHealthReporter::with_developer_mode(config.developer_mode()),
    );
    reporter.runtime_starting(&config);
    let mut runtime = match assemble(config, Arc::clone(&reporter)) {
        Ok(runtime) => runtime,
        Err(error) => {
            reporter.runtime_failed(&error);
            return Err(error);
        }
    };
    runtime.run()
}

fn assemble(
    config: Config,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Runtime<PermissionStore, ScriptModuleLoader>, RuntimeError> {
    let paths = RuntimePaths::from_config(&config)?;
    let gate = PermissionStore::load(paths.permissions_path())?;
    let loader = ScriptModuleLoader::new(config.interpreter());
    let shutdown = ShutdownFlag::from_signals()?;
    let address = ChannelAddress::new(paths.runtime_dir(), config.channel_name());
    let dispatcher = Dispatcher::new(gate, loader, Arc::clone(&reporter));
    Ok(Runtime::new(config, address, dispatcher, shutdown, reporter))
}

#[cfg(test)]
mod tests;
