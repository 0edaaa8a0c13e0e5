#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::summary::SummarySnapshot;

/// Outcome of a check that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    successful: bool,
    report_path: PathBuf,
    summary: SummarySnapshot,
}

impl CheckResult {
    /// No inconsistencies were found.
    pub fn success(report_path: PathBuf, summary: SummarySnapshot) -> Self {
        Self {
            successful: true,
            report_path,
            summary,
        }
    }

    /// Inconsistencies were found; details are in the report.
    pub fn failure(report_path: PathBuf, summary: SummarySnapshot) -> Self {
        Self {
            successful: false,
            report_path,
            summary,
        }
    }

    /// Returns true when the store is consistent.
    pub fn is_successful(&self) -> bool {
        self.successful
    }

    /// Report file. It may not exist when nothing was written to it.
    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Findings by category.
    pub fn summary(&self) -> &SummarySnapshot {
        &self.summary
    }
}
