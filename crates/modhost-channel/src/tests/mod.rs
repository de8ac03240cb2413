//! Behaviour tests that drive a listener and a dialler across threads.

use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::{ChannelAddress, ChannelError, Endpoint, ReadOutcome, Role, TEARDOWN_SENTINEL};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: TempDir,
    address: ChannelAddress,
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let address = ChannelAddress::new(dir.path(), "modhost_test");
    Harness { _dir: dir, address }
}

/// Listens, dials from a helper thread, and returns both attached ends.
fn connect(address: &ChannelAddress, capacity: usize, peer_capacity: usize) -> (Endpoint, Endpoint) {
    let mut listener = Endpoint::listen(address.clone(), capacity).expect("listen");
    let peer_address = address.clone();
    let peer = thread::spawn(move || {
        Endpoint::dial(peer_address, peer_capacity, DIAL_TIMEOUT).expect("dial")
    });
    listener.accept().expect("accept");
    let dialler = peer.join().expect("dialler thread");
    (listener, dialler)
}

#[rstest]
fn messages_flow_in_both_directions(harness: Harness) {
    let (mut listener, mut dialler) = connect(&harness.address, 1024, 1024);
    assert_eq!(listener.role(), Role::Listener);
    assert_eq!(dialler.role(), Role::Dialler);

    dialler.write("ping").expect("peer write");
    dialler
        .write("package.path:./?.lua;/root/lua/?.lua;")
        .expect("peer write");
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("ping".to_owned())
    );
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("package.path:./?.lua;/root/lua/?.lua;".to_owned())
    );

    listener.write("ack").expect("write");
    assert_eq!(
        dialler.read().expect("peer read"),
        ReadOutcome::Message("ack".to_owned())
    );
}

#[rstest]
fn sentinel_is_reported_as_teardown(harness: Harness) {
    let (mut listener, mut dialler) = connect(&harness.address, 1024, 1024);
    dialler.write(TEARDOWN_SENTINEL).expect("peer write");
    assert_eq!(listener.read().expect("read"), ReadOutcome::PeerTornDown);
}

#[rstest]
fn closed_peer_is_a_disconnect(harness: Harness) {
    let (mut listener, dialler) = connect(&harness.address, 1024, 1024);
    drop(dialler);
    let error = listener.read().expect_err("disconnect");
    assert!(error.is_disconnect(), "unexpected error: {error:?}");
    assert_eq!(error.code(), Some(libc::EPIPE));
}

#[rstest]
fn second_listener_is_refused(harness: Harness) {
    let _first = Endpoint::listen(harness.address.clone(), 1024).expect("listen");
    let error = Endpoint::listen(harness.address.clone(), 1024).expect_err("in use");
    assert!(error.is_create_failure());
    assert!(matches!(error, ChannelError::InUse { .. }));
}

#[rstest]
fn dial_without_listener_times_out(harness: Harness) {
    let started = Instant::now();
    let error = Endpoint::dial(harness.address.clone(), 1024, Duration::from_millis(100))
        .expect_err("timeout");
    assert!(matches!(error, ChannelError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[rstest]
fn second_dial_waits_for_a_fresh_listen(harness: Harness) {
    let (mut listener, mut dialler) = connect(&harness.address, 1024, 1024);

    let error = Endpoint::dial(harness.address.clone(), 1024, Duration::from_millis(300))
        .expect_err("channel already claimed");
    assert!(matches!(error, ChannelError::Timeout { .. }));

    dialler.write("still here").expect("peer write");
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("still here".to_owned())
    );
    drop(dialler);
    let error = listener.read().expect_err("disconnect");
    assert!(error.is_disconnect(), "unexpected error: {error:?}");

    drop(listener);
    let (mut listener, mut dialler) = connect(&harness.address, 1024, 1024);
    dialler.write("again").expect("peer write");
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("again".to_owned())
    );
}

#[rstest]
fn dial_against_idle_listener_times_out(harness: Harness) {
    let mut listener = Endpoint::listen(harness.address.clone(), 1024).expect("listen");
    let started = Instant::now();
    let error = Endpoint::dial(harness.address.clone(), 1024, Duration::from_millis(200))
        .expect_err("never accepted");
    assert!(matches!(error, ChannelError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));

    let peer_address = harness.address.clone();
    let peer = thread::spawn(move || {
        Endpoint::dial(peer_address, 1024, DIAL_TIMEOUT).expect("dial after timeout")
    });
    listener.accept().expect("accept");
    let mut dialler = peer.join().expect("dialler thread");
    dialler.write("late").expect("peer write");
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("late".to_owned())
    );
}

#[rstest]
fn non_blocking_read_returns_no_data(harness: Harness) {
    let (mut listener, mut dialler) = connect(&harness.address, 1024, 1024);
    listener.set_blocking(false).expect("non-blocking");
    listener.set_blocking(false).expect("idempotent");
    assert!(!listener.is_blocking());
    assert_eq!(listener.read().expect("read"), ReadOutcome::NoData);

    dialler.write("ping").expect("peer write");
    listener.set_blocking(true).expect("blocking");
    assert_eq!(
        listener.read().expect("read"),
        ReadOutcome::Message("ping".to_owned())
    );
}

#[rstest]
fn bounded_read_expires_without_traffic(harness: Harness) {
    let (mut listener, _dialler) = connect(&harness.address, 1024, 1024);
    let started = Instant::now();
    let outcome = listener
        .read_within(Duration::from_millis(50))
        .expect("read");
    assert_eq!(outcome, ReadOutcome::NoData);
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[rstest]
fn oversized_frames_are_refused(harness: Harness) {
    let (mut listener, mut dialler) = connect(&harness.address, 16, 1024);
    dialler.write(&"x".repeat(64)).expect("peer write");
    let error = listener.read().expect_err("too large");
    assert!(matches!(
        error,
        ChannelError::FrameTooLarge {
            len: 64,
            capacity: 16
        }
    ));

    let error = listener.write(&"y".repeat(17)).expect_err("too large");
    assert!(matches!(error, ChannelError::FrameTooLarge { .. }));
}

#[rstest]
fn close_releases_artefacts_and_allows_relisten(harness: Harness) {
    let (mut listener, _dialler) = connect(&harness.address, 1024, 1024);
    listener.close();
    listener.close();
    assert!(!listener.is_connected());
    assert!(!harness.address.inbound_path().exists());
    assert!(!harness.address.lock_path().exists());
    assert!(!harness.address.claim_path().exists());
    assert!(matches!(
        listener.read(),
        Err(ChannelError::NotConnected { .. })
    ));

    let relisten = Endpoint::listen(harness.address.clone(), 1024).expect("relisten");
    assert!(!relisten.is_connected());
}

#[rstest]
fn accept_is_idempotent_once_attached(harness: Harness) {
    let (mut listener, _dialler) = connect(&harness.address, 1024, 1024);
    listener.accept().expect("second accept");
    assert!(listener.is_connected());
}

#[rstest]
fn cancelled_accept_is_interrupted(harness: Harness) {
    let mut listener = Endpoint::listen(harness.address.clone(), 1024).expect("listen");
    let cancel = AtomicBool::new(true);
    let error = listener.accept_until(&cancel).expect_err("interrupted");
    assert!(matches!(error, ChannelError::Interrupted { .. }));
}
