//! Unit tests for dispatch rules and message handling.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use modhost_channel::ChannelAddress;
use rstest::rstest;

use super::*;
use crate::permissions::MockPermissionGate;
use crate::tests::support::{Install, MODULE, RecordingHealthReporter, StubLoader, install};

const JOIN: Duration = Duration::from_secs(2);

fn allow_all() -> MockPermissionGate {
    let mut gate = MockPermissionGate::new();
    gate.expect_is_permitted().returning(|_, _| true);
    gate
}

fn build<G: PermissionGate>(
    gate: G,
    loader: StubLoader,
) -> (Dispatcher<G, StubLoader>, Arc<RecordingHealthReporter>) {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let shared: Arc<dyn HealthReporter> = reporter.clone();
    (Dispatcher::new(gate, loader, shared), reporter)
}

fn announce_root<G: PermissionGate>(
    session: &mut Session,
    root: &Path,
    dispatcher: &mut Dispatcher<G, StubLoader>,
) {
    let message = Message::parse(&crate::peer::package_path_message(root));
    assert_eq!(session.handle(message, dispatcher), None);
}

#[rstest]
fn dispatching_twice_spawns_once(install: Install) {
    let loader = StubLoader::stop_aware();
    let (mut dispatcher, reporter) = build(allow_all(), loader.clone());

    let first = dispatcher.dispatch(install.root(), MODULE);
    assert_eq!(
        first,
        DispatchOutcome::Spawned {
            worker: "Proc_extensions_modA_script.py".to_owned()
        }
    );
    assert_eq!(
        dispatcher.dispatch(install.root(), MODULE),
        DispatchOutcome::AlreadyDispatched
    );

    assert_eq!(loader.calls().len(), 1);
    assert_eq!(dispatcher.supervisor().len(), 1);
    assert_eq!(reporter.dispatched(), vec![MODULE.to_owned()]);
    assert!(dispatcher.is_dispatched(MODULE));

    let summary = dispatcher.shutdown(JOIN);
    assert_eq!(summary.exited, 1);
    assert_eq!(summary.force_killed, 0);
}

#[rstest]
fn equivalent_spellings_share_one_dispatch(install: Install) {
    let loader = StubLoader::stop_aware();
    let (mut dispatcher, reporter) = build(allow_all(), loader.clone());

    assert!(matches!(
        dispatcher.dispatch(install.root(), MODULE),
        DispatchOutcome::Spawned { .. }
    ));
    for spelling in [
        "extensions/modA/./script.py",
        "extensions//modA/script.py",
        "./extensions/modA/script.py",
    ] {
        assert_eq!(
            dispatcher.dispatch(install.root(), spelling),
            DispatchOutcome::AlreadyDispatched,
            "{spelling}"
        );
        assert!(dispatcher.is_dispatched(spelling));
    }

    assert_eq!(loader.calls().len(), 1);
    assert_eq!(dispatcher.supervisor().len(), 1);
    assert_eq!(reporter.dispatched(), vec![MODULE.to_owned()]);
    assert_eq!(dispatcher.shutdown(JOIN).exited, 1);
}

#[rstest]
#[case::parent_escape("../outside.py", SkipReason::InvalidPath)]
#[case::absolute("/etc/passwd", SkipReason::InvalidPath)]
#[case::interior_escape("extensions/../mods/other.py", SkipReason::InvalidPath)]
#[case::empty("", SkipReason::InvalidPath)]
#[case::outside_extensions("mods/other.py", SkipReason::OutsideExtensions)]
fn rejected_paths_are_skipped(
    install: Install,
    #[case] relative: &str,
    #[case] expected: SkipReason,
) {
    install.module("mods/other.py", "def main():\n    pass\n");
    let loader = StubLoader::stop_aware();
    let (mut dispatcher, reporter) = build(allow_all(), loader.clone());

    assert_eq!(
        dispatcher.dispatch(install.root(), relative),
        DispatchOutcome::Skipped(expected.clone())
    );
    assert_eq!(reporter.skips_for(relative), vec![expected]);
    assert!(!dispatcher.is_dispatched(relative));
    assert!(loader.calls().is_empty());
}

#[rstest]
fn missing_module_names_the_resolved_path(install: Install) {
    let (mut dispatcher, _reporter) = build(allow_all(), StubLoader::stop_aware());
    let relative = "extensions/modA/absent.py";

    assert_eq!(
        dispatcher.dispatch(install.root(), relative),
        DispatchOutcome::Skipped(SkipReason::Missing(install.root().join(relative)))
    );
    assert!(!dispatcher.is_dispatched(relative));
}

#[rstest]
fn denied_modules_are_never_loaded(install: Install) {
    let mut gate = MockPermissionGate::new();
    gate.expect_is_permitted()
        .withf(|_, relative| relative == MODULE)
        .times(2)
        .returning(|_, _| false);
    let loader = StubLoader::stop_aware();
    let (mut dispatcher, _reporter) = build(gate, loader.clone());

    for _ in 0..2 {
        assert_eq!(
            dispatcher.dispatch(install.root(), MODULE),
            DispatchOutcome::Skipped(SkipReason::Denied)
        );
    }
    assert!(loader.calls().is_empty());
    assert!(dispatcher.supervisor().is_empty());
}

#[rstest]
fn module_without_main_is_marked_dispatched(install: Install) {
    let loader = StubLoader::without_main();
    let (mut dispatcher, _reporter) = build(allow_all(), loader.clone());

    assert_eq!(
        dispatcher.dispatch(install.root(), MODULE),
        DispatchOutcome::Skipped(SkipReason::NoEntryPoint)
    );
    assert_eq!(
        dispatcher.dispatch(install.root(), MODULE),
        DispatchOutcome::AlreadyDispatched
    );
    assert_eq!(loader.calls().len(), 1);
    assert!(dispatcher.supervisor().is_empty());
}

#[rstest]
fn modules_before_root_are_skipped(install: Install) {
    let loader = StubLoader::stop_aware();
    let (mut dispatcher, reporter) = build(allow_all(), loader.clone());
    let mut session = Session::new();

    let end = session.handle(Message::Modules(vec![MODULE.to_owned()]), &mut dispatcher);
    assert_eq!(end, None);
    assert_eq!(reporter.skips_for(MODULE), vec![SkipReason::RootUnknown]);
    assert!(!dispatcher.is_dispatched(MODULE));

    announce_root(&mut session, install.root(), &mut dispatcher);
    session.handle(Message::Modules(vec![MODULE.to_owned()]), &mut dispatcher);
    assert!(dispatcher.is_dispatched(MODULE));
    assert_eq!(loader.calls(), vec![install.root().join(MODULE)]);
    dispatcher.shutdown(JOIN);
}

#[rstest]
fn unresolvable_search_paths_keep_the_previous_root(install: Install) {
    let (mut dispatcher, _reporter) = build(allow_all(), StubLoader::stop_aware());
    let mut session = Session::new();
    announce_root(&mut session, install.root(), &mut dispatcher);

    session.handle(Message::parse("package.path:./?.lua;/usr/share/?.lua;"), &mut dispatcher);
    assert_eq!(session.root(), Some(install.root()));
}

#[test]
fn restart_ends_the_session() {
    let (mut dispatcher, _reporter) = build(allow_all(), StubLoader::stop_aware());
    let mut session = Session::new();

    assert_eq!(session.handle(Message::Ping, &mut dispatcher), None);
    assert_eq!(
        session.handle(Message::Unknown("hello".to_owned()), &mut dispatcher),
        None
    );
    assert_eq!(
        session.handle(Message::Restart, &mut dispatcher),
        Some(SessionEnd::RestartRequested)
    );
}

#[rstest]
fn raised_flag_stops_the_loop(install: Install) {
    let address = ChannelAddress::new(install.runtime_dir(), "session_flag");
    let mut endpoint = Endpoint::listen(address, 1024).expect("listen");
    let (mut dispatcher, _reporter) = build(allow_all(), StubLoader::stop_aware());
    let flag = ShutdownFlag::new();
    flag.raise();

    let end = Session::new()
        .run(&mut endpoint, &mut dispatcher, &flag)
        .expect("session");
    assert_eq!(end, SessionEnd::ShutdownRequested);
}

#[rstest]
#[case(SessionEnd::RestartRequested, "restart requested")]
#[case(SessionEnd::PeerTornDown, "peer torn down")]
#[case(SessionEnd::PeerDisconnected, "peer disconnected")]
#[case(SessionEnd::ShutdownRequested, "shutdown requested")]
fn session_end_display(#[case] end: SessionEnd, #[case] expected: &str) {
    assert_eq!(end.to_string(), expected);
}
