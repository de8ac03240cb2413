//! Owner of every worker process the host starts.
//!
//! Shutdown always sets every stop signal before joining any worker, so all
//! workers begin winding down together and the whole sequence is bounded by
//! one timeout.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::WORKER_TARGET;
use crate::entry::EntryPoint;
use crate::error::WorkerError;
use crate::handle::{JoinOutcome, WorkerHandle};

const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Counts of how workers ended during a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Workers that exited on their own.
    pub exited: usize,
    /// Workers killed after the timeout.
    pub force_killed: usize,
    /// Workers the OS would not report on.
    pub failed: usize,
}

/// Spawns, tracks, and shuts down worker processes.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    workers: BTreeMap<String, WorkerHandle>,
}

impl ProcessSupervisor {
    /// Creates a supervisor with no workers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `entry` in a new process tracked under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::DuplicateName`] when `name` is taken and
    /// [`WorkerError::Spawn`] when the process cannot be started.
    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        entry: EntryPoint,
    ) -> Result<&WorkerHandle, WorkerError> {
        let name = name.into();
        match self.workers.entry(name) {
            Entry::Occupied(occupied) => Err(WorkerError::DuplicateName {
                name: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                let mut handle = WorkerHandle::new(vacant.key().clone(), entry);
                handle.start()?;
                Ok(vacant.insert(handle))
            }
        }
    }

    /// Sets the stop signal of every worker.
    pub fn request_stop_all(&mut self) {
        for handle in self.workers.values_mut() {
            handle.request_stop();
        }
    }

    /// Joins every worker against one shared deadline.
    pub fn join_all(&mut self, timeout: Duration) -> ShutdownSummary {
        let deadline = Instant::now() + timeout;
        let mut summary = ShutdownSummary::default();
        for handle in self.workers.values_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match handle.join(remaining) {
                Ok(JoinOutcome::Exited(_)) => summary.exited += 1,
                Ok(JoinOutcome::ForceKilled) => summary.force_killed += 1,
                Ok(JoinOutcome::NotStarted) => {}
                Err(error) => {
                    warn!(
                        target: WORKER_TARGET,
                        worker = handle.name(),
                        error = %error,
                        "failed to join worker"
                    );
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Stops all workers, then joins all workers.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownSummary {
        self.request_stop_all();
        let summary = self.join_all(timeout);
        info!(
            target: WORKER_TARGET,
            workers = self.workers.len(),
            exited = summary.exited,
            force_killed = summary.force_killed,
            failed = summary.failed,
            "workers shut down"
        );
        summary
    }

    /// Looks up a worker by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkerHandle> {
        self.workers.get(name)
    }

    /// Whether a worker with `name` is tracked.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Names of all tracked workers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    /// Number of tracked workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no workers are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of workers whose process has not been joined yet.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.workers.values().filter(|handle| handle.is_live()).count()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.live_count() > 0 {
            warn!(
                target: WORKER_TARGET,
                live = self.live_count(),
                "supervisor dropped with live workers; shutting them down"
            );
            self.shutdown(DROP_JOIN_TIMEOUT);
        }
    }
}
