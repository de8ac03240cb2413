//! Scenario tests that drive sessions over real channels.

pub(crate) mod support;

use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use modhost_channel::{ChannelAddress, Endpoint, TEARDOWN_SENTINEL};
use modhost_workers::ScriptModuleLoader;
use rstest::rstest;

use crate::permissions::{MockPermissionGate, PermissionStore};
use crate::session::{Dispatcher, Session, SessionEnd};
use crate::shutdown::ShutdownFlag;
use crate::{HealthReporter, SkipReason, modules_message, package_path_message};
use support::{Install, MODULE, RecordingHealthReporter, StubLoader, install};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN: Duration = Duration::from_secs(5);

/// Listens on `address`, lets a peer thread send `script` and hang up, and
/// runs one session to its end.
fn serve_once<G, L>(
    address: &ChannelAddress,
    dispatcher: &mut Dispatcher<G, L>,
    script: Vec<String>,
) -> SessionEnd
where
    G: crate::PermissionGate,
    L: modhost_workers::ModuleLoader,
{
    let mut listener = Endpoint::listen(address.clone(), 4096).expect("listen");
    let peer_address = address.clone();
    let peer = thread::spawn(move || {
        let mut dialler = Endpoint::dial(peer_address, 4096, DIAL_TIMEOUT).expect("dial");
        for message in &script {
            dialler.write(message).expect("peer write");
        }
    });
    listener.accept().expect("accept");
    let end = Session::new()
        .run(&mut listener, dispatcher, &ShutdownFlag::new())
        .expect("session");
    listener.close();
    peer.join().expect("peer thread");
    end
}

fn allow_all() -> MockPermissionGate {
    let mut gate = MockPermissionGate::new();
    gate.expect_is_permitted().returning(|_, _| true);
    gate
}

#[rstest]
fn dispatched_set_survives_a_reconnect(install: Install) {
    let address = ChannelAddress::new(install.runtime_dir(), "reconnect");
    let loader = StubLoader::stop_aware();
    let reporter = Arc::new(RecordingHealthReporter::default());
    let shared: Arc<dyn HealthReporter> = reporter.clone();
    let mut dispatcher = Dispatcher::new(allow_all(), loader.clone(), shared);
    let announcement = vec![
        package_path_message(install.root()),
        modules_message(&[MODULE]),
    ];

    let mut first = announcement.clone();
    first.push(TEARDOWN_SENTINEL.to_owned());
    assert_eq!(
        serve_once(&address, &mut dispatcher, first),
        SessionEnd::PeerTornDown
    );

    let mut second = announcement;
    second.push("restart".to_owned());
    assert_eq!(
        serve_once(&address, &mut dispatcher, second),
        SessionEnd::RestartRequested
    );

    assert_eq!(loader.calls().len(), 1);
    assert_eq!(dispatcher.supervisor().len(), 1);
    assert_eq!(reporter.dispatched(), vec![MODULE.to_owned()]);
    let summary = dispatcher.shutdown(JOIN);
    assert_eq!(summary.exited, 1);
}

#[rstest]
fn root_is_forgotten_between_sessions(install: Install) {
    let address = ChannelAddress::new(install.runtime_dir(), "forget");
    let reporter = Arc::new(RecordingHealthReporter::default());
    let shared: Arc<dyn HealthReporter> = reporter.clone();
    let mut dispatcher = Dispatcher::new(allow_all(), StubLoader::stop_aware(), shared);

    serve_once(
        &address,
        &mut dispatcher,
        vec![package_path_message(install.root()), "restart".to_owned()],
    );
    serve_once(&address, &mut dispatcher, vec![modules_message(&[MODULE])]);

    assert!(!dispatcher.is_dispatched(MODULE));
    assert_eq!(
        reporter.skips_for(MODULE),
        vec![SkipReason::RootUnknown]
    );
}

/// Whether `python3` runs here; says so on stderr when the test is skipped.
#[expect(clippy::print_stderr, reason = "skipped tests report why")]
fn python_available() -> bool {
    let available = Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());
    if !available {
        eprintln!("skipping test: python3 not found on PATH");
    }
    available
}

#[rstest]
fn permitted_script_runs_until_shutdown(install: Install) {
    if !python_available() {
        return;
    }
    install.module(
        "extensions/modB/script.py",
        "def main(stop_signal):\n    stop_signal.wait()\n",
    );
    let permissions = install.permissions(r#"{"modA": true}"#);
    let store = PermissionStore::load(permissions).expect("permissions");
    let loader = ScriptModuleLoader::new("python3");
    let reporter = Arc::new(RecordingHealthReporter::default());
    let shared: Arc<dyn HealthReporter> = reporter.clone();
    let mut dispatcher = Dispatcher::new(store, loader, shared);
    let address = ChannelAddress::new(install.runtime_dir(), "scenario");

    let end = serve_once(
        &address,
        &mut dispatcher,
        vec![
            package_path_message(install.root()),
            modules_message(&[MODULE, "extensions/modB/script.py"]),
        ],
    );
    assert_eq!(end, SessionEnd::PeerDisconnected);

    assert_eq!(reporter.dispatched(), vec![MODULE.to_owned()]);
    assert_eq!(
        reporter.skips_for("extensions/modB/script.py"),
        vec![SkipReason::Denied]
    );
    let worker = dispatcher
        .supervisor()
        .get("Proc_extensions_modA_script.py")
        .expect("worker");
    assert!(worker.is_live());

    let summary = dispatcher.shutdown(JOIN);
    assert_eq!(summary.exited, 1);
    assert_eq!(summary.force_killed, 0);
}
