#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::Level;

use crate::logging::{DuplicatingLog, FileLog, Log};

/// Report file name for a check started at `timestamp`, e.g.
/// `inconsistencies-2024-03-09.14.05.59.report`.
pub fn report_file_name(timestamp: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day].[hour].[minute].[second]");
    let stamp = timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string());
    format!("inconsistencies-{stamp}.report")
}

/// Full report path inside `report_dir`.
pub fn report_path(report_dir: &Path, timestamp: OffsetDateTime) -> PathBuf {
    report_dir.join(report_file_name(timestamp))
}

/// The caller's log and the on-demand report file, joined.
///
/// Everything the check says goes to both; the report file only appears if
/// something at INFO or above is written.
pub struct ReportPipeline {
    path: PathBuf,
    report_log: Arc<FileLog>,
    out_log: Arc<dyn Log>,
    log: Arc<DuplicatingLog>,
}

impl ReportPipeline {
    /// Pipeline writing to `path` and `out_log`.
    pub fn open(path: PathBuf, out_log: Arc<dyn Log>) -> Self {
        let report_log = Arc::new(FileLog::on_demand(&path, Level::INFO));
        let log = Arc::new(DuplicatingLog::new(
            Arc::clone(&out_log),
            Arc::clone(&report_log) as Arc<dyn Log>,
        ));
        Self {
            path,
            report_log,
            out_log,
            log,
        }
    }

    /// Log reaching both sinks.
    pub fn log(&self) -> Arc<dyn Log> {
        Arc::clone(&self.log) as Arc<dyn Log>
    }

    /// The caller's log alone.
    pub fn out(&self) -> &Arc<dyn Log> {
        &self.out_log
    }

    /// Report file path, whether or not it was created.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the report file exists.
    pub fn is_created(&self) -> bool {
        self.report_log.is_created()
    }

    /// Flushes and closes the report file.
    pub fn close(&self) -> std::io::Result<()> {
        self.report_log.close()
    }
}
