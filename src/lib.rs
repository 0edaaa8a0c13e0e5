//! Offline consistency checking for Sombra graph stores.
//!
//! The entry point is [`consistency::ConsistencyCheckService`], which refuses
//! to run against an unrecovered store, opens every store read-only, scans it
//! on a bounded worker pool and writes findings to a timestamped report.

#![warn(missing_docs)]

pub mod config;
pub mod consistency;
pub mod lifecycle;
pub mod logging;
pub mod primitives;
pub mod progress;
pub mod storage;
pub mod types;
