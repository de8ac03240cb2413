//! Scripted peer used by test mode to drive the protocol end to end.

use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use modhost_channel::{ChannelAddress, ChannelError, Endpoint, ReadOutcome};
use modhost_config::TestMode;
use tracing::{debug, info};

const PEER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::peer");

/// How long the scripted peer keeps dialling before giving up.
pub const PEER_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the search-path announcement a peer installed at `root` sends.
#[must_use]
pub fn package_path_message(root: &Path) -> String {
    let root = root.to_string_lossy().replace('\\', "/");
    format!(
        "package.path:./?.lua;{root}/lua/?.lua;{root}/lua/?/init.lua;{root}/ui/?.lua;{root}/ui/?/init.lua;"
    )
}

/// Builds a module announcement.
#[must_use]
pub fn modules_message<S: AsRef<str>>(modules: &[S]) -> String {
    let mut message = String::from("modules:");
    for module in modules {
        message.push_str(module.as_ref());
        message.push(';');
    }
    message
}

/// Dials the channel, announces the test root and module, waits briefly
/// for a reply, then hangs up.
///
/// # Errors
///
/// Returns the channel error that stopped the script.
pub fn run_scripted_peer(
    address: ChannelAddress,
    capacity: usize,
    test: &TestMode,
) -> Result<Option<String>, ChannelError> {
    let mut endpoint = Endpoint::dial(address, capacity, PEER_DIAL_TIMEOUT)?;
    endpoint.write(&package_path_message(&test.root))?;
    endpoint.write(&modules_message(&[test.module.as_str()]))?;
    debug!(target: PEER_TARGET, module = %test.module, "scripted peer announced module");

    let reply = match endpoint.read_within(test.linger) {
        Ok(ReadOutcome::Message(text)) => Some(text),
        Ok(ReadOutcome::NoData | ReadOutcome::PeerTornDown) => None,
        Err(error) if error.is_disconnect() => None,
        Err(error) => return Err(error),
    };
    info!(
        target: PEER_TARGET,
        replied = reply.is_some(),
        "scripted peer hanging up"
    );
    endpoint.close();
    Ok(reply)
}

/// Runs [`run_scripted_peer`] on its own thread.
///
/// # Errors
///
/// Returns the OS error when the thread cannot be started.
pub fn spawn_scripted_peer(
    address: ChannelAddress,
    capacity: usize,
    test: TestMode,
) -> std::io::Result<JoinHandle<Result<Option<String>, ChannelError>>> {
    thread::Builder::new()
        .name("modhost-test-peer".to_owned())
        .spawn(move || run_scripted_peer(address, capacity, &test))
}
