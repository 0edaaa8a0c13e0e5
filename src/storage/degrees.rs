#![forbid(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{EdgeId, NodeId, Result, SombraError, TokenId, TxId};

use super::auxiliary::{AuxFile, AuxUpdater, AuxiliaryStore, Rebuilder};
use super::layout::DatabaseLayout;
use super::primary::PrimaryStore;

const TYPE_BITS: u32 = 23;
const MAX_NODE: u64 = (1 << 40) - 1;

/// Edge direction relative to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    /// The node is the source.
    Out,
    /// The node is the target.
    In,
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dir::Out => "out",
            Dir::In => "in",
        })
    }
}

/// Degree of one dense node for one relationship type and direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DegreeKey {
    /// Dense node.
    pub node: NodeId,
    /// Relationship type.
    pub edge_type: TokenId,
    /// Direction.
    pub dir: Dir,
}

impl DegreeKey {
    /// Packs as `node << 24 | type << 1 | dir`.
    pub fn encode(self) -> Result<u64> {
        if self.node.0 > MAX_NODE || self.edge_type.0 >= 1 << TYPE_BITS {
            return Err(SombraError::Invalid(format!(
                "degree key out of range: node {} type {}",
                self.node, self.edge_type
            )));
        }
        let dir = match self.dir {
            Dir::Out => 0,
            Dir::In => 1,
        };
        Ok(self.node.0 << (TYPE_BITS + 1) | u64::from(self.edge_type.0) << 1 | dir)
    }

    /// Unpacks a stored key.
    pub fn decode(raw: u64) -> Self {
        Self {
            node: NodeId(raw >> (TYPE_BITS + 1)),
            edge_type: TokenId(((raw >> 1) & ((1 << TYPE_BITS) - 1)) as u32),
            dir: if raw & 1 == 0 { Dir::Out } else { Dir::In },
        }
    }
}

impl fmt::Display for DegreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} type {} {}", self.node, self.edge_type, self.dir)
    }
}

/// Per-type degrees of dense nodes.
pub struct DegreesStore {
    file: AuxFile,
}

impl DegreesStore {
    /// Stored degree; absent keys are zero.
    pub fn degree(&self, key: DegreeKey) -> Result<u64> {
        Ok(self.file.get(key.encode()?)?.unwrap_or(0))
    }

    /// Every stored degree.
    pub fn entries(&self) -> Result<Vec<(DegreeKey, u64)>> {
        Ok(self
            .file
            .entries()?
            .into_iter()
            .map(|(key, value)| (DegreeKey::decode(key), value))
            .collect())
    }
}

impl AuxiliaryStore for DegreesStore {
    const NAME: &'static str = "degrees store";
    const KIND: [u8; 4] = *b"DEGS";

    fn store_path(layout: &DatabaseLayout) -> PathBuf {
        layout.degrees_store()
    }

    fn from_file(file: AuxFile) -> Self {
        Self { file }
    }

    fn file(&self) -> &AuxFile {
        &self.file
    }
}

/// Regenerates degrees by scanning edges of the primary store.
pub struct PrimaryDegreesRebuilder {
    store: Arc<PrimaryStore>,
}

impl PrimaryDegreesRebuilder {
    /// Rebuilder reading from `store`.
    pub fn new(store: Arc<PrimaryStore>) -> Self {
        Self { store }
    }

    fn is_dense(&self, node: NodeId) -> Result<bool> {
        let record = self.store.read_node(node)?;
        Ok(record.in_use && record.dense)
    }
}

impl Rebuilder for PrimaryDegreesRebuilder {
    fn last_committed_tx_id(&self) -> TxId {
        self.store.last_committed_tx_id()
    }

    fn rebuild(&self, updater: &mut AuxUpdater) -> Result<()> {
        for id in 0..self.store.edge_slots() {
            let edge = self.store.read_edge(EdgeId(id))?;
            if !edge.in_use {
                continue;
            }
            if self.is_dense(edge.src)? {
                let key = DegreeKey {
                    node: edge.src,
                    edge_type: edge.edge_type,
                    dir: Dir::Out,
                };
                updater.increment(key.encode()?, 1);
            }
            if self.is_dense(edge.dst)? {
                let key = DegreeKey {
                    node: edge.dst,
                    edge_type: edge.edge_type,
                    dir: Dir::In,
                };
                updater.increment(key.encode()?, 1);
            }
        }
        Ok(())
    }
}
