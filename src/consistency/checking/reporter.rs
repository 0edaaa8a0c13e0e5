#![forbid(unsafe_code)]

use std::fmt::Display;

use crate::logging::Log;
use crate::types::{Result, SombraError};

use super::super::summary::{ConsistencySummaryStatistics, InconsistencyCategory};

/// Counts a finding and writes it to the check log.
pub(crate) struct Reporter<'a> {
    summary: &'a ConsistencySummaryStatistics,
    log: &'a dyn Log,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(summary: &'a ConsistencySummaryStatistics, log: &'a dyn Log) -> Self {
        Self { summary, log }
    }

    pub(crate) fn error(&self, category: InconsistencyCategory, message: impl Display) {
        self.summary.add_error(category);
        self.log.error(&format!("{category}: {message}"));
    }

    pub(crate) fn warning(&self, category: InconsistencyCategory, message: impl Display) {
        self.summary.add_warning(category);
        self.log.warn(&format!("{category}: {message}"));
    }
}

/// Separates broken data, which the scan reports, from environmental
/// failures, which abort it.
pub(crate) fn finding<T>(result: Result<T>) -> Result<std::result::Result<T, SombraError>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(err) if err.is_structural() => Ok(Err(err)),
        Err(err) => Err(err),
    }
}
