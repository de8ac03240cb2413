//! Structured health reporting for supervisor lifecycle events.

use std::sync::Arc;

use modhost_config::Config;
use modhost_workers::ShutdownSummary;

use crate::runtime::RuntimeError;
use crate::session::{SessionEnd, SkipReason};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked once the configuration is loaded and the runtime starts.
    fn runtime_starting(&self, config: &Config);

    /// Invoked when a fresh channel is listening for a peer.
    fn channel_listening(&self, channel: &str);

    /// Invoked when a peer attaches.
    fn peer_attached(&self, channel: &str);

    /// Invoked when a session stops reading.
    fn session_ended(&self, end: SessionEnd);

    /// Invoked after a worker is spawned for a module.
    fn module_dispatched(&self, module: &str, worker: &str);

    /// Invoked when an announced module is not spawned.
    fn module_skipped(&self, module: &str, reason: &SkipReason);

    /// Invoked when the runtime hits a fatal error.
    fn runtime_failed(&self, error: &RuntimeError);

    /// Invoked after all workers have been stopped and joined.
    fn runtime_stopped(&self, summary: &ShutdownSummary);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn runtime_starting(&self, config: &Config) {
        (**self).runtime_starting(config);
    }

    fn channel_listening(&self, channel: &str) {
        (**self).channel_listening(channel);
    }

    fn peer_attached(&self, channel: &str) {
        (**self).peer_attached(channel);
    }

    fn session_ended(&self, end: SessionEnd) {
        (**self).session_ended(end);
    }

    fn module_dispatched(&self, module: &str, worker: &str) {
        (**self).module_dispatched(module, worker);
    }

    fn module_skipped(&self, module: &str, reason: &SkipReason) {
        (**self).module_skipped(module, reason);
    }

    fn runtime_failed(&self, error: &RuntimeError) {
        (**self).runtime_failed(error);
    }

    fn runtime_stopped(&self, summary: &ShutdownSummary) {
        (**self).runtime_stopped(summary);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter {
    developer_mode: bool,
}

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            developer_mode: false,
        }
    }

    /// Builds a reporter that logs fatal errors with full debug detail.
    #[must_use]
    pub const fn with_developer_mode(developer_mode: bool) -> Self {
        Self { developer_mode }
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn runtime_starting(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "runtime_starting",
            channel = config.channel_name(),
            runtime_dir = %config.runtime_dir().display(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            test_mode = config.test_mode().is_some(),
            "supervisor starting"
        );
    }

    fn channel_listening(&self, channel: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "channel_listening",
            channel,
            "waiting for peer"
        );
    }

    fn peer_attached(&self, channel: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "peer_attached",
            channel,
            "peer attached"
        );
    }

    fn session_ended(&self, end: SessionEnd) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_ended",
            reason = %end,
            "session ended"
        );
    }

    fn module_dispatched(&self, module: &str, worker: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "module_dispatched",
            module,
            worker,
            "module dispatched"
        );
    }

    fn module_skipped(&self, module: &str, reason: &SkipReason) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "module_skipped",
            module,
            reason = %reason,
            "module skipped"
        );
    }

    fn runtime_failed(&self, error: &RuntimeError) {
        if self.developer_mode {
            tracing::error!(
                target: HEALTH_TARGET,
                event = "runtime_failed",
                error = ?error,
                "supervisor failed"
            );
        } else {
            tracing::error!(
                target: HEALTH_TARGET,
                event = "runtime_failed",
                error = %error,
                "supervisor failed"
            );
        }
    }

    fn runtime_stopped(&self, summary: &ShutdownSummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "runtime_stopped",
            exited = summary.exited,
            force_killed = summary.force_killed,
            failed = summary.failed,
            "supervisor stopped"
        );
    }
}
