//! Tracing setup for the supervisor process.
//!
//! Worker stdout and stderr are relayed as events through the same
//! subscriber, so one `--log-format` governs everything the process prints.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use modhost_config::{Config, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Proof that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The log filter directive did not parse.
    #[error("invalid log filter '{directive}': {message}")]
    Filter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Installs the global subscriber on first use; later calls are no-ops.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or a foreign
/// subscriber already owns the global slot.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| {
        let subscriber = build_subscriber(config)?;
        tracing::subscriber::set_global_default(subscriber)?;
        Ok::<(), TelemetryError>(())
    })?;
    Ok(TelemetryHandle)
}

fn build_subscriber(config: &Config) -> Result<BoxedSubscriber, TelemetryError> {
    let directive = config.log_filter();
    let filter = EnvFilter::try_new(directive).map_err(|error| TelemetryError::Filter {
        directive: directive.to_owned(),
        message: error.to_string(),
    })?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());
    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config(args: &[&str]) -> Config {
        Config::load_from_iter(std::iter::once("modhostd").chain(args.iter().copied()))
            .expect("config parses")
    }

    #[test]
    fn invalid_directive_is_named_in_the_error() {
        let error = build_subscriber(&config(&["--log-filter", "modhostd=notalevel"]))
            .err()
            .expect("invalid filter");
        assert!(matches!(
            &error,
            TelemetryError::Filter { directive, .. } if directive == "modhostd=notalevel"
        ));
        assert!(error.to_string().contains("modhostd=notalevel"));
    }

    #[rstest]
    #[case::compact(&["--log-format", "compact"])]
    #[case::json(&["--log-format", "json"])]
    #[case::verbose(&["--verbose"])]
    fn valid_settings_build_a_subscriber(#[case] args: &[&str]) {
        assert!(build_subscriber(&config(args)).is_ok());
    }
}
