//! Crate-level tests running real script workers through the supervisor.

use std::fs;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use rstest::rstest;
use tempfile::TempDir;

use crate::{
    EntryKind, ModuleLoader, ProcessSupervisor, ScriptModuleLoader, WorkerState, worker_name,
};

/// Whether `python3` runs here; says so on stderr when the test is skipped.
#[expect(clippy::print_stderr, reason = "skipped tests report why")]
fn python_available() -> bool {
    let available = Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if !available {
        eprintln!("skipping test: python3 not found on PATH");
    }
    available
}

const POLITE_WORKER: &str = "\
def main(stop_signal):
    while not stop_signal.is_set():
        stop_signal.wait(0.05)
";

const STUBBORN_WORKER: &str = "\
import time

def main():
    while True:
        time.sleep(1)
";

#[rstest]
#[case::stop_aware(POLITE_WORKER, EntryKind::StopSignal, false)]
#[case::no_arg(STUBBORN_WORKER, EntryKind::NoArg, true)]
fn script_workers_shut_down_within_the_bound(
    #[case] source: &str,
    #[case] kind: EntryKind,
    #[case] expect_kill: bool,
) {
    if !python_available() {
        return;
    }
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("script.py");
    fs::write(&path, source).expect("write module");

    let entry = ScriptModuleLoader::new("python3")
        .load(&path)
        .expect("load")
        .expect("main export");
    assert_eq!(entry.kind(), kind);

    let mut supervisor = ProcessSupervisor::new();
    let name = worker_name("extensions/modA/script.py");
    supervisor.spawn(name.clone(), entry).expect("spawn");

    let timeout = Duration::from_secs(3);
    let started = Instant::now();
    let summary = supervisor.shutdown(timeout);
    assert!(started.elapsed() < timeout + Duration::from_secs(1));
    assert_eq!(summary.force_killed == 1, expect_kill);
    assert_eq!(supervisor.live_count(), 0);

    let state = supervisor.get(&name).expect("tracked").state();
    let expected = if expect_kill {
        WorkerState::ForceKilled
    } else {
        WorkerState::Joined
    };
    assert_eq!(state, expected);
}

#[test]
fn worker_names_flatten_the_relative_path() {
    assert_eq!(
        worker_name("extensions/modA/script.py"),
        "Proc_extensions_modA_script.py"
    );
    assert_eq!(worker_name("script.py"), "Proc_script.py");
}
