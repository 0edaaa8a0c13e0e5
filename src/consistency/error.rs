#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::SombraError;

/// Operator guidance attached to an unrecovered-store failure.
pub const UNRECOVERED_GUIDANCE: [&str; 3] = [
    "Active logical log detected, this might be a source of inconsistencies.",
    "Please recover database.",
    "To perform recovery please start database in single mode and perform clean shutdown.",
];

/// Root cause of an incomplete check.
#[derive(Debug, Error)]
pub enum IncompleteCause {
    /// The write-ahead log holds transactions the store has not applied.
    #[error("{}\n(log {} has {unapplied} unapplied transactions)", UNRECOVERED_GUIDANCE.join("\n"), .wal.display())]
    Unrecovered {
        /// Log that needs replaying.
        wal: PathBuf,
        /// Number of unapplied frames.
        unapplied: usize,
    },
    /// A store could not be opened or read.
    #[error(transparent)]
    Store(#[from] SombraError),
    /// Filesystem failure outside the stores, e.g. the report file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The check could not run to completion.
///
/// Distinct from a completed check that found inconsistencies, which is
/// reported through a failed [`CheckResult`](super::CheckResult).
#[derive(Debug, Error)]
#[error("consistency check incomplete: {cause}")]
pub struct ConsistencyCheckIncomplete {
    #[source]
    cause: IncompleteCause,
}

impl ConsistencyCheckIncomplete {
    /// Wraps `cause`.
    pub fn new(cause: impl Into<IncompleteCause>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    pub(crate) fn unrecovered(wal: &Path, unapplied: usize) -> Self {
        Self::new(IncompleteCause::Unrecovered {
            wal: wal.to_path_buf(),
            unapplied,
        })
    }

    /// Root cause.
    pub fn cause(&self) -> &IncompleteCause {
        &self.cause
    }

    /// Consumes the error, returning its root cause.
    pub fn into_cause(self) -> IncompleteCause {
        self.cause
    }

    /// Returns true when the check was refused because recovery is needed.
    pub fn is_unrecovered(&self) -> bool {
        matches!(self.cause, IncompleteCause::Unrecovered { .. })
    }
}

impl From<IncompleteCause> for ConsistencyCheckIncomplete {
    fn from(cause: IncompleteCause) -> Self {
        Self { cause }
    }
}

impl From<SombraError> for ConsistencyCheckIncomplete {
    fn from(err: SombraError) -> Self {
        Self::new(err)
    }
}

impl From<std::io::Error> for ConsistencyCheckIncomplete {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<ConfigError> for ConsistencyCheckIncomplete {
    fn from(err: ConfigError) -> Self {
        Self::new(err)
    }
}

/// Result alias for check entry points.
pub type Result<T> = std::result::Result<T, ConsistencyCheckIncomplete>;
