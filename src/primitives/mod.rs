//! Low-level primitives the checker is built on.
//!
//! Includes positioned file I/O, the shared page cache, write-ahead log
//! inspection, memory accounting, and the worker pool.

/// Worker pool used by the multi-threaded scan.
pub mod concurrency;

/// Read-only positioned file access.
pub mod io;

/// Memory accounting for scan work.
pub mod memory;

/// Shared page cache for store files.
pub mod pager;

/// Write-ahead log format and recovery detection.
///
/// Determines whether a log holds transactions the store has not applied.
pub mod wal;
