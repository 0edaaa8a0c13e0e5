#![forbid(unsafe_code)]

//! Message sinks for checker output.
//!
//! The checker writes its findings through [`Log`] rather than straight to
//! `tracing` so the same stream can be duplicated into a durable report file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::Level;

/// A sink for human-readable checker messages.
pub trait Log: Send + Sync {
    /// Records `message` at `level`.
    fn log(&self, level: Level, message: &str);

    /// Records a debug message.
    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    /// Records an informational message.
    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    /// Records a warning.
    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    /// Records an error.
    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

/// Forwards messages to `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;

impl Log for TracingLog {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "sombra_consistency::check", "{message}"),
            Level::WARN => tracing::warn!(target: "sombra_consistency::check", "{message}"),
            Level::INFO => tracing::info!(target: "sombra_consistency::check", "{message}"),
            Level::DEBUG => tracing::debug!(target: "sombra_consistency::check", "{message}"),
            _ => tracing::trace!(target: "sombra_consistency::check", "{message}"),
        }
    }
}

/// Discards every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLog;

impl Log for NullLog {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Sends every message to two logs.
pub struct DuplicatingLog {
    first: Arc<dyn Log>,
    second: Arc<dyn Log>,
}

impl DuplicatingLog {
    /// Fans out to `first` then `second`.
    pub fn new(first: Arc<dyn Log>, second: Arc<dyn Log>) -> Self {
        Self { first, second }
    }
}

impl Log for DuplicatingLog {
    fn log(&self, level: Level, message: &str) {
        self.first.log(level, message);
        self.second.log(level, message);
    }
}

enum FileState {
    Pending,
    Open(BufWriter<File>),
    Failed,
    Closed,
}

/// File-backed log that creates its file on the first accepted message.
///
/// Messages less severe than the minimum level are dropped and never cause
/// the file to be created. After [`close`](Self::close) messages are dropped.
pub struct FileLog {
    path: PathBuf,
    min_level: Level,
    state: Mutex<FileState>,
}

impl FileLog {
    /// Creates an on-demand log at `path` accepting `min_level` and above.
    pub fn on_demand(path: impl Into<PathBuf>, min_level: Level) -> Self {
        Self {
            path: path.into(),
            min_level,
            state: Mutex::new(FileState::Pending),
        }
    }

    /// Path the log writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the file has been created.
    pub fn is_created(&self) -> bool {
        matches!(*self.state.lock(), FileState::Open(_)) || self.path.exists()
    }

    /// Flushes and closes the file. Later calls do nothing.
    pub fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, FileState::Closed);
        if let FileState::Open(mut writer) = previous {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn open_file(&self) -> io::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(BufWriter::new(file))
    }
}

impl Log for FileLog {
    fn log(&self, level: Level, message: &str) {
        if level > self.min_level {
            return;
        }
        let mut state = self.state.lock();
        if matches!(*state, FileState::Pending) {
            *state = match self.open_file() {
                Ok(writer) => FileState::Open(writer),
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        "report.open_failed"
                    );
                    FileState::Failed
                }
            };
        }
        if let FileState::Open(writer) = &mut *state {
            let line = format!("{} {:<5} {message}\n", timestamp(), level);
            if let Err(err) = writer.write_all(line.as_bytes()) {
                tracing::warn!(path = %self.path.display(), error = %err, "report.write_failed");
            }
        }
    }
}

impl Drop for FileLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn timestamp() -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]+0000"
    );
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| String::from("????-??-?? ??:??:??.???+0000"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Level, String)>>);

    impl Log for Capture {
        fn log(&self, level: Level, message: &str) {
            self.0.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn file_is_created_only_on_first_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("check.report");
        let log = FileLog::on_demand(&path, Level::INFO);
        log.debug("below threshold");
        assert!(!path.exists());

        log.warn("something broke");
        log.close().unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("WARN  something broke"), "{contents}");
        assert!(!contents.contains("below threshold"));
    }

    #[test]
    fn closed_log_drops_messages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("check.report");
        let log = FileLog::on_demand(&path, Level::INFO);
        log.close().unwrap();
        log.error("late");
        assert!(!path.exists());
        log.close().unwrap();
    }

    #[test]
    fn duplicating_log_reaches_both_sinks() {
        let first = Arc::new(Capture::default());
        let second = Arc::new(Capture::default());
        let log = DuplicatingLog::new(first.clone(), second.clone());
        log.info("hello");
        log.error("boom");
        assert_eq!(first.0.lock().len(), 2);
        assert_eq!(*first.0.lock(), *second.0.lock());
        assert_eq!(second.0.lock()[1], (Level::ERROR, "boom".to_string()));
    }
}
