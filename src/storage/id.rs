#![forbid(unsafe_code)]

use std::fmt;

use super::meta::StoreMeta;

/// Record kinds that allocate ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdType {
    /// Node records.
    Node,
    /// Edge records.
    Edge,
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdType::Node => "node",
            IdType::Edge => "edge",
        })
    }
}

/// Read-only id generators. The checker never allocates ids; it only
/// compares each store's high id with the records actually present.
#[derive(Clone, Copy, Debug)]
pub struct IdGeneratorFactory {
    node_high_id: u64,
    edge_high_id: u64,
}

impl IdGeneratorFactory {
    /// Generators seeded from the meta store.
    pub fn read_only(meta: &StoreMeta) -> Self {
        Self {
            node_high_id: meta.node_high_id,
            edge_high_id: meta.edge_high_id,
        }
    }

    /// One past the highest id allocated for `id_type`.
    pub fn high_id(&self, id_type: IdType) -> u64 {
        match id_type {
            IdType::Node => self.node_high_id,
            IdType::Edge => self.edge_high_id,
        }
    }
}
