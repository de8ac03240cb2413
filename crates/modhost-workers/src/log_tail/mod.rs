//! Incremental reader for a log file another process appends to.
//!
//! A tail starts at the end of the file, hands back complete lines as they
//! appear, and keeps any partial trailing line until its newline arrives.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::TAIL_TARGET;
use crate::error::TailError;

const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default size a trimmed log is cut down to.
pub const DEFAULT_TRIM_BYTES: u64 = 1024 * 1024;

/// Follows appended lines of one log file.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    file: File,
    position: u64,
    partial: Vec<u8>,
}

impl LogTail {
    /// Opens `path` positioned at its current end.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or measured.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TailError> {
        let path = path.into();
        let mut file = File::open(&path).map_err(|source| io_error(&path, source))?;
        let position = file
            .seek(SeekFrom::End(0))
            .map_err(|source| io_error(&path, source))?;
        Ok(Self {
            path,
            file,
            position,
            partial: Vec::new(),
        })
    }

    /// Returns the next complete line, without its newline.
    ///
    /// Waits at most `timeout`, or indefinitely when `timeout` is `None`,
    /// polling for new data. Returns `Ok(None)` when the wait expires.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read.
    pub fn read_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>, TailError> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.fill()? > 0 {
                continue;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    TAIL_POLL_INTERVAL.min(deadline - now)
                }
                None => TAIL_POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    /// Cuts the file down to its last `max_bytes` bytes once the read
    /// position has passed `max_bytes`.
    ///
    /// Returns whether the file was rewritten. The read position moves to
    /// the new end of the file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or rewritten.
    pub fn trim(&mut self, max_bytes: u64) -> Result<bool, TailError> {
        if self.position <= max_bytes {
            return Ok(false);
        }
        let mut source = File::open(&self.path).map_err(|error| self.error(error))?;
        let length = source
            .seek(SeekFrom::End(0))
            .map_err(|error| self.error(error))?;
        let keep_from = length.saturating_sub(max_bytes);
        source
            .seek(SeekFrom::Start(keep_from))
            .map_err(|error| self.error(error))?;
        let mut retained = Vec::new();
        source
            .read_to_end(&mut retained)
            .map_err(|error| self.error(error))?;

        let mut target = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|error| self.error(error))?;
        target
            .write_all(&retained)
            .and_then(|()| target.flush())
            .map_err(|error| self.error(error))?;

        self.position = fs::metadata(&self.path)
            .map_err(|error| self.error(error))?
            .len();
        debug!(
            target: TAIL_TARGET,
            file = %self.path.display(),
            before = length,
            after = self.position,
            "log trimmed"
        );
        Ok(true)
    }

    /// Path being followed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next read.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    fn take_line(&mut self) -> Option<String> {
        let newline = self.partial.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.partial.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn fill(&mut self) -> Result<usize, TailError> {
        let length = fs::metadata(&self.path)
            .map_err(|error| self.error(error))?
            .len();
        if length < self.position {
            debug!(
                target: TAIL_TARGET,
                file = %self.path.display(),
                "log shrank underneath the tail; restarting from the top"
            );
            self.position = 0;
            self.partial.clear();
        }
        self.file
            .seek(SeekFrom::Start(self.position))
            .map_err(|error| io_error(&self.path, error))?;
        let read = self
            .file
            .read_to_end(&mut self.partial)
            .map_err(|error| io_error(&self.path, error))?;
        self.position += u64::try_from(read).unwrap_or(u64::MAX);
        Ok(read)
    }

    fn error(&self, source: io::Error) -> TailError {
        io_error(&self.path, source)
    }
}

fn io_error(path: &Path, source: io::Error) -> TailError {
    TailError::Io {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}
