#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::storage::{
    IdGeneratorFactory, IndexProviderMap, IndexStatisticsStore, PrimaryStore, TokenHolders,
};

/// Read-only view over every store the scan reads, assembled once the
/// lifecycle has started.
#[derive(Clone)]
pub struct DirectStoreAccess {
    /// Node, edge, token and schema records.
    pub primary: Arc<PrimaryStore>,
    /// Label and property indexes.
    pub indexes: Arc<IndexProviderMap>,
    /// Loaded tokens.
    pub tokens: Arc<TokenHolders>,
    /// Sampled index statistics.
    pub statistics: Arc<IndexStatisticsStore>,
    /// High ids per record store.
    pub ids: IdGeneratorFactory,
}
