//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use modhost_config::Config;
use modhost_workers::ShutdownSummary;

use crate::health::HealthReporter;
use crate::runtime::RuntimeError;
use crate::session::{SessionEnd, SkipReason};

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// The runtime started.
    RuntimeStarting,
    /// A channel is listening.
    ChannelListening(String),
    /// A peer attached.
    PeerAttached(String),
    /// A session ended.
    SessionEnded(SessionEnd),
    /// A module was spawned under the given worker name.
    ModuleDispatched { module: String, worker: String },
    /// A module was skipped.
    ModuleSkipped { module: String, reason: SkipReason },
    /// The runtime failed with an error description.
    RuntimeFailed(String),
    /// Workers were shut down.
    RuntimeStopped(ShutdownSummary),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Modules reported as dispatched, in order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ModuleDispatched { module, .. } => Some(module),
                _ => None,
            })
            .collect()
    }

    /// Skip reasons reported for `module`.
    #[must_use]
    pub fn skips_for(&self, module: &str) -> Vec<SkipReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ModuleSkipped {
                    module: skipped,
                    reason,
                } if skipped == module => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn runtime_starting(&self, _config: &Config) {
        self.record(HealthEvent::RuntimeStarting);
    }

    fn channel_listening(&self, channel: &str) {
        self.record(HealthEvent::ChannelListening(channel.to_owned()));
    }

    fn peer_attached(&self, channel: &str) {
        self.record(HealthEvent::PeerAttached(channel.to_owned()));
    }

    fn session_ended(&self, end: SessionEnd) {
        self.record(HealthEvent::SessionEnded(end));
    }

    fn module_dispatched(&self, module: &str, worker: &str) {
        self.record(HealthEvent::ModuleDispatched {
            module: module.to_owned(),
            worker: worker.to_owned(),
        });
    }

    fn module_skipped(&self, module: &str, reason: &SkipReason) {
        self.record(HealthEvent::ModuleSkipped {
            module: module.to_owned(),
            reason: reason.clone(),
        });
    }

    fn runtime_failed(&self, error: &RuntimeError) {
        self.record(HealthEvent::RuntimeFailed(error.to_string()));
    }

    fn runtime_stopped(&self, summary: &ShutdownSummary) {
        self.record(HealthEvent::RuntimeStopped(*summary));
    }
}
