#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::types::{EdgeId, NodeId, Result, SombraError, TokenId, TxId, NO_TOKEN};

use super::auxiliary::{AuxFile, AuxUpdater, AuxiliaryStore, Rebuilder};
use super::layout::DatabaseLayout;
use super::primary::PrimaryStore;

const NODE_SPACE: u64 = 1 << 56;
const EDGE_SPACE: u64 = 2 << 56;
const TOKEN_MASK: u64 = 0xFFFF_FFFF;

/// What a counts entry counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CountsKey {
    /// In-use nodes, in total or with one label.
    Nodes {
        /// `None` counts every node.
        label: Option<TokenId>,
    },
    /// In-use edges, in total or of one type.
    Edges {
        /// `None` counts every edge.
        edge_type: Option<TokenId>,
    },
}

impl CountsKey {
    /// Key for all nodes.
    pub const ALL_NODES: CountsKey = CountsKey::Nodes { label: None };
    /// Key for all edges.
    pub const ALL_EDGES: CountsKey = CountsKey::Edges { edge_type: None };

    /// Packs the key into the store's `u64` key space.
    pub fn encode(self) -> u64 {
        let token = |id: Option<TokenId>| u64::from(id.map_or(NO_TOKEN, |t| t.0));
        match self {
            CountsKey::Nodes { label } => NODE_SPACE | token(label),
            CountsKey::Edges { edge_type } => EDGE_SPACE | token(edge_type),
        }
    }

    /// Unpacks a stored key.
    pub fn decode(raw: u64) -> Result<Self> {
        let token = (raw & TOKEN_MASK) as u32;
        let token = (token != NO_TOKEN).then_some(TokenId(token));
        match raw & !TOKEN_MASK {
            NODE_SPACE => Ok(CountsKey::Nodes { label: token }),
            EDGE_SPACE => Ok(CountsKey::Edges { edge_type: token }),
            _ => Err(SombraError::Corruption(format!(
                "counts key 0x{raw:016X} is not a node or edge count"
            ))),
        }
    }
}

impl fmt::Display for CountsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountsKey::Nodes { label: None } => f.write_str("(:*)"),
            CountsKey::Nodes { label: Some(label) } => write!(f, "(:{label})"),
            CountsKey::Edges { edge_type: None } => f.write_str("()-[:*]->()"),
            CountsKey::Edges {
                edge_type: Some(edge_type),
            } => write!(f, "()-[:{edge_type}]->()"),
        }
    }
}

/// Node and edge counts maintained alongside the primary store.
pub struct CountsStore {
    file: AuxFile,
}

impl CountsStore {
    /// Count stored under `key`; absent keys count zero.
    pub fn count(&self, key: CountsKey) -> Result<u64> {
        Ok(self.file.get(key.encode())?.unwrap_or(0))
    }

    /// Every stored count.
    pub fn entries(&self) -> Result<Vec<(CountsKey, u64)>> {
        self.file
            .entries()?
            .into_iter()
            .map(|(key, value)| Ok((CountsKey::decode(key)?, value)))
            .collect()
    }

    /// Transaction the counts were derived at.
    pub fn tx_id(&self) -> TxId {
        self.file.header().tx
    }
}

impl AuxiliaryStore for CountsStore {
    const NAME: &'static str = "counts store";
    const KIND: [u8; 4] = *b"CNTS";

    fn store_path(layout: &DatabaseLayout) -> PathBuf {
        layout.counts_store()
    }

    fn from_file(file: AuxFile) -> Self {
        Self { file }
    }

    fn file(&self) -> &AuxFile {
        &self.file
    }
}

/// Regenerates counts by scanning the primary store.
pub struct PrimaryCountsRebuilder {
    store: Arc<PrimaryStore>,
}

impl PrimaryCountsRebuilder {
    /// Rebuilder reading from `store`.
    pub fn new(store: Arc<PrimaryStore>) -> Self {
        Self { store }
    }
}

impl Rebuilder for PrimaryCountsRebuilder {
    fn last_committed_tx_id(&self) -> TxId {
        self.store.last_committed_tx_id()
    }

    fn rebuild(&self, updater: &mut AuxUpdater) -> Result<()> {
        updater.put(CountsKey::ALL_NODES.encode(), 0);
        updater.put(CountsKey::ALL_EDGES.encode(), 0);
        for id in 0..self.store.node_slots() {
            let node = self.store.read_node(NodeId(id))?;
            if !node.in_use {
                continue;
            }
            updater.increment(CountsKey::ALL_NODES.encode(), 1);
            if !node.label.is_none() {
                let key = CountsKey::Nodes {
                    label: Some(node.label),
                };
                updater.increment(key.encode(), 1);
            }
        }
        for id in 0..self.store.edge_slots() {
            let edge = self.store.read_edge(EdgeId(id))?;
            if !edge.in_use {
                continue;
            }
            updater.increment(CountsKey::ALL_EDGES.encode(), 1);
            let key = CountsKey::Edges {
                edge_type: Some(edge.edge_type),
            };
            updater.increment(key.encode(), 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_keep_their_namespace() {
        for key in [
            CountsKey::ALL_NODES,
            CountsKey::ALL_EDGES,
            CountsKey::Nodes {
                label: Some(TokenId(7)),
            },
            CountsKey::Edges {
                edge_type: Some(TokenId(0)),
            },
        ] {
            assert_eq!(CountsKey::decode(key.encode()).unwrap(), key);
        }
        assert!(CountsKey::decode(3 << 56).is_err());
        assert_eq!(
            CountsKey::Nodes {
                label: Some(TokenId(2))
            }
            .to_string(),
            "(:2)"
        );
    }
}
