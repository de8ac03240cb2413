//! Lifecycle of a single worker process.
//!
//! A handle moves through `Created → Running → StopRequested` and ends in
//! `Joined` or `ForceKilled`. [`WorkerHandle::join`] never waits longer than
//! its timeout: a worker still alive at the deadline is killed and reaped.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::WORKER_TARGET;
use crate::entry::EntryPoint;
use crate::error::WorkerError;
use crate::stop::StopSignal;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started yet.
    Created,
    /// Process is running.
    Running,
    /// Stop was requested; the process may still be running.
    StopRequested,
    /// Process exited and was reaped.
    Joined,
    /// Process outlived its join timeout and was killed.
    ForceKilled,
}

/// How a join ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The process was never started.
    NotStarted,
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The process was killed after the timeout.
    ForceKilled,
}

/// A worker process owned by the supervisor.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    entry: EntryPoint,
    stop: StopSignal,
    state: WorkerState,
    child: Option<Child>,
    pid: Option<u32>,
    outcome: Option<JoinOutcome>,
}

impl WorkerHandle {
    pub(crate) fn new(name: impl Into<String>, entry: EntryPoint) -> Self {
        Self {
            name: name.into(),
            entry,
            stop: StopSignal::new(),
            state: WorkerState::Created,
            child: None,
            pid: None,
            outcome: None,
        }
    }

    /// Launches the worker process.
    pub(crate) fn start(&mut self) -> Result<(), WorkerError> {
        if self.state != WorkerState::Created {
            return Ok(());
        }
        let command = self.entry.command();
        let mut process = command.to_command();
        process.stdout(Stdio::piped()).stderr(Stdio::piped());
        if self.entry.is_stoppable() {
            process.stdin(Stdio::piped());
        } else {
            process.stdin(Stdio::null());
            warn!(
                target: WORKER_TARGET,
                worker = %self.name,
                "entry point takes no stop signal; worker can only be stopped by force"
            );
        }

        let mut child = process.spawn().map_err(|source| WorkerError::Spawn {
            name: self.name.clone(),
            program: command.program().to_path_buf(),
            source: Arc::new(source),
        })?;
        if let Some(stdin) = child.stdin.take() {
            self.stop.attach(stdin);
        }
        if let Some(stdout) = child.stdout.take() {
            forward_output(&self.name, "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(&self.name, "stderr", stderr);
        }

        let pid = child.id();
        info!(
            target: WORKER_TARGET,
            worker = %self.name,
            pid,
            program = %command.program().display(),
            kind = ?self.entry.kind(),
            "worker started"
        );
        self.pid = Some(pid);
        self.child = Some(child);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Sets the stop signal. Non-blocking and safe to repeat.
    pub fn request_stop(&mut self) {
        self.stop.set();
        if self.state == WorkerState::Running {
            debug!(target: WORKER_TARGET, worker = %self.name, "stop requested");
            self.state = WorkerState::StopRequested;
        }
    }

    /// Waits up to `timeout` for the process to exit, then kills it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Wait`] or [`WorkerError::Kill`] when the OS
    /// refuses to report on or terminate the process.
    pub fn join(&mut self, timeout: Duration) -> Result<JoinOutcome, WorkerError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(JoinOutcome::NotStarted);
        };
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(
                        target: WORKER_TARGET,
                        worker = %self.name,
                        ?status,
                        "worker exited"
                    );
                    return Ok(self.finish(WorkerState::Joined, JoinOutcome::Exited(status)));
                }
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep(JOIN_POLL_INTERVAL.min(deadline - now));
                }
                Err(source) => {
                    return Err(WorkerError::Wait {
                        name: self.name.clone(),
                        source: Arc::new(source),
                    });
                }
            }
        }

        warn!(
            target: WORKER_TARGET,
            worker = %self.name,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "worker did not exit in time; killing process"
        );
        if let Err(source) = child.kill() {
            // The process may have exited between the last poll and the kill.
            if let Ok(Some(status)) = child.try_wait() {
                return Ok(self.finish(WorkerState::Joined, JoinOutcome::Exited(status)));
            }
            return Err(WorkerError::Kill {
                name: self.name.clone(),
                source: Arc::new(source),
            });
        }
        child.wait().map_err(|source| WorkerError::Wait {
            name: self.name.clone(),
            source: Arc::new(source),
        })?;
        Ok(self.finish(WorkerState::ForceKilled, JoinOutcome::ForceKilled))
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry point the worker runs.
    #[must_use]
    pub const fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// OS process id once started.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The worker's stop signal.
    #[must_use]
    pub const fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Whether the process has been started and not yet joined.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self.state,
            WorkerState::Running | WorkerState::StopRequested
        )
    }

    fn finish(&mut self, state: WorkerState, outcome: JoinOutcome) -> JoinOutcome {
        self.child = None;
        self.state = state;
        self.outcome = Some(outcome);
        outcome
    }
}

/// Relays a worker's output stream into the log, one line per event.
fn forward_output(worker: &str, stream: &'static str, source: impl Read + Send + 'static) {
    let name = worker.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("{worker}-{stream}"))
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                match line {
                    Ok(text) => info!(target: WORKER_TARGET, worker = %name, stream, "{text}"),
                    Err(error) => {
                        debug!(
                            target: WORKER_TARGET,
                            worker = %name,
                            stream,
                            error = %error,
                            "stopped forwarding worker output"
                        );
                        break;
                    }
                }
            }
        });
    if let Err(error) = spawned {
        warn!(
            target: WORKER_TARGET,
            worker,
            stream,
            error = %error,
            "failed to start output forwarder"
        );
    }
}
