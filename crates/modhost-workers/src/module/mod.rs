//! Turning a module file into a worker entry point.
//!
//! Loading happens in two steps: a short-lived probe process imports the
//! module and reports whether it exports `main` and what that callable
//! accepts; the report then picks an [`EntryKind`] once, up front. Workers
//! later run a bootstrap that calls `main` in the chosen shape.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::MODULE_TARGET;
use crate::command::WorkerCommand;
use crate::entry::{EntryKind, EntryPoint};
use crate::error::ModuleError;

const PROBE_SOURCE: &str = include_str!("../../shims/probe.py");
const BOOTSTRAP_SOURCE: &str = include_str!("../../shims/bootstrap.py");
const PROBE_MARKER: &str = "MODHOST_PROBE ";
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on how long a module probe may run.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability that loads a module and reports its entry point.
///
/// The production implementation is [`ScriptModuleLoader`]; tests inject
/// loaders that return canned entry points.
pub trait ModuleLoader {
    /// Loads the module at `path`.
    ///
    /// Returns `Ok(None)` when the module has no `main` export.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] when the module is missing, fails to load,
    /// or exports a `main` that cannot be called with zero or one argument.
    fn load(&self, path: &Path) -> Result<Option<EntryPoint>, ModuleError>;
}

/// What the probe learned about a module's `main` export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProbeReport {
    /// Whether a callable `main` exists.
    pub main: bool,
    /// Whether `main` takes a positional argument.
    pub accepts_signal: bool,
    /// Number of parameters without defaults.
    pub required: usize,
}

impl ProbeReport {
    /// Picks the calling shape for this report.
    ///
    /// Returns `Ok(None)` when there is no `main`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnsupportedSignature`] when `main` can be
    /// called with neither zero nor one argument.
    pub fn entry_kind(&self, path: &Path) -> Result<Option<EntryKind>, ModuleError> {
        if !self.main {
            return Ok(None);
        }
        match (self.accepts_signal, self.required) {
            (true, 0 | 1) => Ok(Some(EntryKind::StopSignal)),
            (false, 0) => Ok(Some(EntryKind::NoArg)),
            (accepts_signal, required) => Err(ModuleError::UnsupportedSignature {
                path: path.to_path_buf(),
                required,
                accepts_signal,
            }),
        }
    }
}

/// Loads script modules through an external interpreter.
#[derive(Debug, Clone)]
pub struct ScriptModuleLoader {
    interpreter: PathBuf,
    probe_timeout: Duration,
}

impl ScriptModuleLoader {
    /// Creates a loader that runs modules with `interpreter`.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Overrides the probe timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Interpreter used for probes and workers.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    fn probe(&self, path: &Path) -> Result<ProbeReport, ModuleError> {
        let mut child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(PROBE_SOURCE)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ModuleError::Probe {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;
        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());

        let status = self.wait_for_probe(path, &mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(ModuleError::ImportFailed {
                path: path.to_path_buf(),
                status: status.code(),
                stderr: stderr.trim().to_owned(),
            });
        }
        parse_report(path, &stdout)
    }

    fn wait_for_probe(&self, path: &Path, child: &mut Child) -> Result<ExitStatus, ModuleError> {
        let deadline = Instant::now() + self.probe_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        target: MODULE_TARGET,
                        module = %path.display(),
                        "module probe timed out, killing process"
                    );
                    drop(child.kill());
                    drop(child.wait());
                    return Err(ModuleError::ProbeTimeout {
                        path: path.to_path_buf(),
                        timeout: self.probe_timeout,
                    });
                }
                Ok(None) => thread::sleep(PROBE_POLL_INTERVAL),
                Err(source) => {
                    return Err(ModuleError::Probe {
                        path: path.to_path_buf(),
                        source: Arc::new(source),
                    });
                }
            }
        }
    }

    fn worker_command(&self, path: &Path, kind: EntryKind) -> WorkerCommand {
        let mode = match kind {
            EntryKind::NoArg => "noarg",
            EntryKind::StopSignal => "signal",
        };
        let command = WorkerCommand::new(&self.interpreter)
            .args(["-u", "-c", BOOTSTRAP_SOURCE])
            .arg(path)
            .arg(mode);
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => command.current_dir(dir),
            _ => command,
        }
    }
}

impl ModuleLoader for ScriptModuleLoader {
    fn load(&self, path: &Path) -> Result<Option<EntryPoint>, ModuleError> {
        if !path.is_file() {
            return Err(ModuleError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let report = self.probe(path)?;
        debug!(
            target: MODULE_TARGET,
            module = %path.display(),
            main = report.main,
            accepts_signal = report.accepts_signal,
            required = report.required,
            "module probed"
        );
        let Some(kind) = report.entry_kind(path)? else {
            return Ok(None);
        };
        Ok(Some(EntryPoint::new(kind, self.worker_command(path, kind))))
    }
}

fn collect(stream: Option<impl Read + Send + 'static>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut reader) = stream
            && let Err(error) = reader.read_to_string(&mut buffer)
        {
            debug!(target: MODULE_TARGET, error = %error, "probe output truncated");
        }
        buffer
    })
}

fn parse_report(path: &Path, stdout: &str) -> Result<ProbeReport, ModuleError> {
    let line = stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(PROBE_MARKER))
        .ok_or_else(|| ModuleError::MalformedReport {
            path: path.to_path_buf(),
            message: String::from("probe printed no report"),
        })?;
    serde_json::from_str(line).map_err(|error| ModuleError::MalformedReport {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}
