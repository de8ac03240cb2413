//! Shared configuration for the module host supervisor.
//!
//! Configuration is layered the usual way: explicit command-line flags win
//! over `MODHOST_*` environment variables, which win over the built-in
//! defaults in [`defaults`]. Parsing is handled by `clap`; this crate adds the
//! cross-field validation (test mode needs both a root and a module) and the
//! derived values the runtime consumes, such as the resolved runtime
//! directory and the effective log filter.

mod defaults;
mod logging;
mod runtime;

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

pub use defaults::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CHANNEL_NAME, DEFAULT_INTERPRETER, DEFAULT_JOIN_TIMEOUT_MS,
    DEFAULT_LOG_FILTER, DEFAULT_TEST_LINGER_MS, MIN_BUFFER_SIZE, PERMISSIONS_FILE_NAME,
    VERBOSE_LOG_FILTER, default_permissions_path, default_runtime_directory,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command-line or environment input could not be parsed. This also
    /// carries `--help` and `--version` requests.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// Test mode was requested without both a root and a module.
    #[error("test mode requires both --root and --module")]
    IncompleteTestMode,
    /// The channel buffer is too small to carry a frame.
    #[error("buffer size {size} is below the minimum of {minimum} bytes")]
    BufferTooSmall {
        /// Requested buffer size.
        size: usize,
        /// Smallest accepted size.
        minimum: usize,
    },
}

/// Settings for the self-driving test mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMode {
    /// Installation root announced by the scripted peer.
    pub root: PathBuf,
    /// Module path, relative to the root, announced by the scripted peer.
    pub module: String,
    /// How long the scripted peer waits for a reply before hanging up.
    pub linger: Duration,
}

/// Resolved supervisor configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "modhostd",
    version,
    about = "Host-side supervisor running permissioned extension modules as worker processes."
)]
pub struct Config {
    /// Base name of the duplex channel shared with the peer.
    #[arg(long, env = "MODHOST_CHANNEL_NAME", default_value = DEFAULT_CHANNEL_NAME)]
    channel_name: String,

    /// Directory holding the channel FIFOs and lock file.
    #[arg(long, env = "MODHOST_RUNTIME_DIR")]
    runtime_dir: Option<PathBuf>,

    /// Bytes reserved for each channel direction; also the largest message.
    #[arg(long, env = "MODHOST_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Path to permissions.json.
    #[arg(short = 'p', long, env = "MODHOST_PERMISSIONS_PATH")]
    permissions_path: Option<PathBuf>,

    /// Interpreter used to probe and run extension modules.
    #[arg(long, env = "MODHOST_INTERPRETER", default_value = DEFAULT_INTERPRETER)]
    interpreter: PathBuf,

    /// Milliseconds a stopped worker may take before it is killed.
    #[arg(long, env = "MODHOST_JOIN_TIMEOUT_MS", default_value_t = DEFAULT_JOIN_TIMEOUT_MS)]
    join_timeout_ms: u64,

    /// Tracing filter directive, e.g. `info` or `modhostd=debug`.
    #[arg(long, env = "MODHOST_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    /// Log output format: `compact` or `json`.
    #[arg(long, env = "MODHOST_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Verbose output; overrides the log filter with `debug`.
    #[arg(short, long)]
    verbose: bool,

    /// Log fatal errors with their full debug representation.
    #[arg(long)]
    developer_mode: bool,

    /// Shut down instead of waiting for a new peer after a disconnect.
    #[arg(long)]
    no_restart: bool,

    /// Enable test mode: drive the protocol with a scripted peer.
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Installation root announced in test mode.
    #[arg(short = 'x', long = "root")]
    test_root: Option<PathBuf>,

    /// Module path announced in test mode, relative to the root.
    #[arg(short = 'm', long = "module")]
    test_module: Option<String>,

    /// Milliseconds the scripted peer waits for a reply in test mode.
    #[arg(long, default_value_t = DEFAULT_TEST_LINGER_MS)]
    test_linger_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_owned(),
            runtime_dir: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            permissions_path: None,
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
            verbose: false,
            developer_mode: false,
            no_restart: false,
            test: false,
            test_root: None,
            test_module: None,
            test_linger_ms: DEFAULT_TEST_LINGER_MS,
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration from an explicit argument list. The first item is
    /// the program name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::try_parse_from(args)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall {
                size: self.buffer_size,
                minimum: MIN_BUFFER_SIZE,
            });
        }
        if self.test && (self.test_root.is_none() || self.test_module.is_none()) {
            return Err(ConfigError::IncompleteTestMode);
        }
        Ok(())
    }

    /// Base name of the channel.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        self.channel_name.as_str()
    }

    /// Directory holding channel artefacts, falling back to the platform
    /// default.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(default_runtime_directory)
    }

    /// Buffer capacity of each channel direction.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Location of the permission map.
    #[must_use]
    pub fn permissions_path(&self) -> PathBuf {
        self.permissions_path
            .clone()
            .unwrap_or_else(default_permissions_path)
    }

    /// Interpreter used for extension modules.
    #[must_use]
    pub fn interpreter(&self) -> &std::path::Path {
        self.interpreter.as_path()
    }

    /// Time a stopped worker may take before it is killed.
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Effective tracing filter; verbose mode forces `debug`.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        if self.verbose {
            VERBOSE_LOG_FILTER
        } else {
            self.log_filter.as_str()
        }
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether fatal errors are logged with full detail.
    #[must_use]
    pub const fn developer_mode(&self) -> bool {
        self.developer_mode
    }

    /// Whether the channel is recreated after a peer disconnects.
    #[must_use]
    pub const fn restart_on_disconnect(&self) -> bool {
        !self.no_restart
    }

    /// Test mode settings, when enabled.
    #[must_use]
    pub fn test_mode(&self) -> Option<TestMode> {
        if !self.test {
            return None;
        }
        let root = self.test_root.clone()?;
        let module = self.test_module.clone()?;
        Some(TestMode {
            root,
            module,
            linger: Duration::from_millis(self.test_linger_ms),
        })
    }
}
