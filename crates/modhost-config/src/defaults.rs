use std::env;
use std::path::PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Base name of the channel the peer dials when none is configured.
pub const DEFAULT_CHANNEL_NAME: &str = "x4_python_host";

/// Buffer capacity reserved for each channel direction (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Smallest accepted channel buffer capacity.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Filter applied when verbose output is requested.
pub const VERBOSE_LOG_FILTER: &str = "debug";

/// Interpreter used to probe and run extension modules.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Milliseconds a worker is given to exit after its stop signal is set.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 5_000;

/// Milliseconds the scripted test peer waits for a reply before hanging up.
pub const DEFAULT_TEST_LINGER_MS: u64 = 5_000;

/// File name of the permission map.
pub const PERMISSIONS_FILE_NAME: &str = "permissions.json";

/// Computes the default runtime directory holding channel artefacts.
#[must_use]
pub fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("modhost");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("modhost");
        // SAFETY: geteuid() has no preconditions and cannot fail.
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("modhost");
        dir
    }
}

/// Computes the default permission file location: next to the running
/// executable, falling back to the working directory.
#[must_use]
pub fn default_permissions_path() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PERMISSIONS_FILE_NAME)
}
