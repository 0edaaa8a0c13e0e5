#![forbid(unsafe_code)]

//! Offline consistency checking.
//!
//! [`ConsistencyCheckService`] refuses to check a store whose write-ahead log
//! still holds unapplied transactions, opens every store read-only (derived
//! stores that would need a rebuild are reported instead of rebuilt), scans
//! on a bounded worker pool, and writes findings to a timestamped report.

mod budget;
mod checking;
mod debug;
mod error;
mod flags;
mod managers;
mod recovery;
mod report;
mod result;
mod service;
mod store_access;
mod summary;

/// Thread and memory budgeting for the scan.
pub use budget::{default_consistency_check_threads_number, HostResources, MemoryLimiter, ScanBudget};

pub use checking::FullCheck;

pub use debug::DebugContext;

/// Check-level errors.
pub use error::{ConsistencyCheckIncomplete, IncompleteCause, Result, UNRECOVERED_GUIDANCE};

pub use flags::ConsistencyFlags;

/// Lazily opened derived stores that refuse to rebuild.
pub use managers::{
    AuxiliaryStoreManager, CountsStoreManager, DegreesStoreManager, RebuildPreventingRebuilder,
};

/// Recovery precondition.
pub use recovery::{assert_recovered, recovery_required};

/// Report naming and the duplicated report log.
pub use report::{report_file_name, report_path, ReportPipeline};

pub use result::CheckResult;

/// Entry points.
pub use service::{CheckOptions, ConsistencyCheckService};

pub use store_access::DirectStoreAccess;

/// Findings tallies.
pub use summary::{
    CategoryCount, ConsistencySummaryStatistics, InconsistencyCategory, SummarySnapshot,
};
