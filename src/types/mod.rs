#![forbid(unsafe_code)]

//! Shared identifiers and the store-level error type.

use std::fmt;
use std::path::PathBuf;

/// Record checksums used by every on-disk format.
pub mod checksum;

pub use checksum::{record_crc32, Checksum, Crc32Fast};

/// Identifier of a node record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);
/// Identifier of an edge (relationship) record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);
/// Identifier of a committed transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub u64);
/// Identifier of a label, property key or relationship type token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TokenId(pub u32);

/// Pointer value meaning "no record".
pub const NIL: u64 = u64::MAX;
/// Token value meaning "no token".
pub const NO_TOKEN: u32 = u32::MAX;

impl NodeId {
    /// Returns true when the id is the nil pointer.
    pub fn is_nil(self) -> bool {
        self.0 == NIL
    }
}

impl EdgeId {
    /// Returns true when the id is the nil pointer.
    pub fn is_nil(self) -> bool {
        self.0 == NIL
    }
}

impl TokenId {
    /// Returns true when the token slot is empty.
    pub fn is_none(self) -> bool {
        self.0 == NO_TOKEN
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the storage layer and its primitives.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes do not decode to a valid structure.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Caller supplied an invalid argument or used a handle in the wrong state.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// A required store file does not exist.
    #[error("missing store file: {}", .0.display())]
    MissingFile(PathBuf),
    /// An auxiliary store needed regeneration and regeneration was refused.
    #[error("{store} needed rebuild (last committed tx {last_committed_tx}), consistency checker will instead report broken or missing {store}")]
    RebuildRequired {
        /// Human-readable store name.
        store: &'static str,
        /// Last committed transaction captured when the rebuild was refused.
        last_committed_tx: TxId,
    },
    /// A resource was requested after it failed, closed or before it started.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl SombraError {
    /// Returns true for findings that describe broken on-disk data rather than
    /// an environmental failure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SombraError::Corruption(_)
                | SombraError::MissingFile(_)
                | SombraError::RebuildRequired { .. }
        )
    }
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, SombraError>;
