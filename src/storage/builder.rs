#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::primitives::pager::{PageCache, PageCacheOptions, PageCacheTracer};
use crate::primitives::wal::LogWriter;
use crate::types::{EdgeId, NodeId, Result, SombraError, TokenId, TxId, NIL};

use super::auxiliary::{write_aux, AuxiliaryStore, OpenMode};
use super::codec::write_atomically;
use super::counts::{CountsStore, PrimaryCountsRebuilder};
use super::degrees::{DegreesStore, PrimaryDegreesRebuilder};
use super::index::{INDEX_STATS_KIND, LABEL_INDEX_KIND, NATIVE_BTREE_PROVIDER, PROPERTY_INDEX_KIND};
use super::layout::DatabaseLayout;
use super::meta::{write_meta, StoreMeta};
use super::primary::PrimaryStore;
use super::records::{EdgeRecord, NodeRecord};
use super::schema::{encode_schema, IndexDescriptor};
use super::tokens::{encode_tokens, TokenKind, TokenRecord};

/// Writes a complete, consistent database directory.
///
/// Derived stores (label and property indexes, statistics, counts, degrees)
/// are generated from the records added, the last two through their normal
/// rebuild path.
#[derive(Debug)]
pub struct StoreBuilder {
    tokens: Vec<TokenRecord>,
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
    indexes: Vec<IndexDescriptor>,
    last_committed_tx: TxId,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            indexes: Vec::new(),
            last_committed_tx: TxId(1),
        }
    }
}

impl StoreBuilder {
    /// Empty database at transaction 1.
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self, kind: TokenKind, name: &str) -> TokenId {
        if let Some(existing) = self
            .tokens
            .iter()
            .find(|token| token.kind == kind && token.name == name)
        {
            return existing.id;
        }
        let id = TokenId(self.tokens.iter().filter(|token| token.kind == kind).count() as u32);
        self.tokens.push(TokenRecord {
            kind,
            id,
            name: name.to_string(),
        });
        id
    }

    /// Registers (or looks up) a label.
    pub fn label(&mut self, name: &str) -> TokenId {
        self.token(TokenKind::Label, name)
    }

    /// Registers (or looks up) a property key.
    pub fn property_key(&mut self, name: &str) -> TokenId {
        self.token(TokenKind::PropertyKey, name)
    }

    /// Registers (or looks up) a relationship type.
    pub fn relationship_type(&mut self, name: &str) -> TokenId {
        self.token(TokenKind::RelationshipType, name)
    }

    fn push_node(&mut self, record: NodeRecord) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(record);
        id
    }

    /// Adds a node with an optional label.
    pub fn node(&mut self, label: Option<TokenId>) -> NodeId {
        let mut record = NodeRecord::unused();
        record.in_use = true;
        record.label = label.unwrap_or(TokenId(crate::types::NO_TOKEN));
        self.push_node(record)
    }

    /// Adds a node carrying one property.
    pub fn node_with_property(&mut self, label: Option<TokenId>, key: TokenId, value: u64) -> NodeId {
        let id = self.node(label);
        let record = &mut self.nodes[id.0 as usize];
        record.prop_key = key;
        record.prop_value = value;
        id
    }

    /// Adds a dense node, whose degrees are kept in the degrees store.
    pub fn dense_node(&mut self, label: Option<TokenId>) -> NodeId {
        let id = self.node(label);
        self.nodes[id.0 as usize].dense = true;
        id
    }

    /// Adds an unused node slot, as left behind by a deletion.
    pub fn deleted_node(&mut self) -> NodeId {
        self.push_node(NodeRecord::unused())
    }

    /// Adds an edge and links it into both endpoints' chains.
    pub fn edge(&mut self, src: NodeId, dst: NodeId, edge_type: TokenId) -> Result<EdgeId> {
        for node in [src, dst] {
            match self.nodes.get(node.0 as usize) {
                Some(record) if record.in_use => {}
                _ => {
                    return Err(SombraError::Invalid(format!(
                        "edge endpoint {node} is not a live node"
                    )))
                }
            }
        }
        let id = EdgeId(self.edges.len() as u64);
        let src_next = self.nodes[src.0 as usize].first_edge;
        let dst_next = if src == dst {
            EdgeId(NIL)
        } else {
            self.nodes[dst.0 as usize].first_edge
        };
        self.nodes[src.0 as usize].first_edge = id;
        self.nodes[dst.0 as usize].first_edge = id;
        self.edges.push(EdgeRecord {
            in_use: true,
            edge_type,
            src,
            dst,
            src_next,
            dst_next,
        });
        Ok(id)
    }

    /// Declares a property index on `(label, key)` and returns its id.
    pub fn property_index(&mut self, label: TokenId, property_key: TokenId) -> u32 {
        let id = self.indexes.len() as u32 + 1;
        self.indexes.push(IndexDescriptor {
            id,
            label,
            property_key,
            provider: NATIVE_BTREE_PROVIDER.to_string(),
        });
        id
    }

    /// Sets the transaction the store is stamped with.
    pub fn last_committed_tx(&mut self, tx: TxId) -> &mut Self {
        self.last_committed_tx = tx;
        self
    }

    /// Writes every store file into `layout`, replacing what is there.
    pub fn write(&self, layout: &DatabaseLayout) -> Result<StoreMeta> {
        fs::create_dir_all(layout.dir())?;
        let mut nodes = Vec::new();
        for (id, record) in self.nodes.iter().enumerate() {
            nodes.extend_from_slice(&record.encode(NodeId(id as u64)));
        }
        write_atomically(&layout.nodes_store(), &nodes)?;
        let mut edges = Vec::new();
        for (id, record) in self.edges.iter().enumerate() {
            edges.extend_from_slice(&record.encode(EdgeId(id as u64)));
        }
        write_atomically(&layout.edges_store(), &edges)?;
        write_atomically(&layout.tokens_store(), &encode_tokens(&self.tokens)?)?;
        write_atomically(&layout.schema_store(), &encode_schema(&self.indexes)?)?;

        let meta = StoreMeta {
            last_committed_tx: self.last_committed_tx,
            node_high_id: self.nodes.len() as u64,
            edge_high_id: self.edges.len() as u64,
        };
        write_meta(&layout.meta_store(), &meta)?;
        self.write_indexes(layout)?;
        write_derived_stores(layout)?;
        LogWriter::create(&layout.wal(), TxId(meta.last_committed_tx.0.saturating_add(1)))?.sync()?;
        info!(
            db = %layout.dir().display(),
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            indexes = self.indexes.len(),
            "builder.written"
        );
        Ok(meta)
    }

    fn live_nodes(&self) -> impl Iterator<Item = (u64, &NodeRecord)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, record)| record.in_use)
            .map(|(id, record)| (id as u64, record))
    }

    fn write_indexes(&self, layout: &DatabaseLayout) -> Result<()> {
        let tx = self.last_committed_tx;
        let labels: BTreeMap<u64, u64> = self
            .live_nodes()
            .filter(|(_, record)| !record.label.is_none())
            .map(|(id, record)| (id, u64::from(record.label.0)))
            .collect();
        write_aux(&layout.label_index_store(), LABEL_INDEX_KIND, tx, false, &labels)?;

        let mut samples = BTreeMap::new();
        for index in &self.indexes {
            let entries: BTreeMap<u64, u64> = self
                .live_nodes()
                .filter(|(_, record)| {
                    record.label == index.label && record.prop_key == index.property_key
                })
                .map(|(id, record)| (id, record.prop_value))
                .collect();
            samples.insert(u64::from(index.id), entries.len() as u64);
            write_aux(
                &layout.property_index_store(index.id),
                PROPERTY_INDEX_KIND,
                tx,
                false,
                &entries,
            )?;
        }
        write_aux(&layout.index_statistics_store(), INDEX_STATS_KIND, tx, false, &samples)
    }
}

/// Regenerates the counts and degrees stores of `layout` from its primary
/// store, the way a normal startup would.
pub fn write_derived_stores(layout: &DatabaseLayout) -> Result<()> {
    for path in [layout.counts_store(), layout.degrees_store()] {
        remove_if_present(&path)?;
    }
    let cache = PageCache::new(PageCacheOptions::default(), Arc::new(PageCacheTracer::new()))?;
    {
        let primary = Arc::new(PrimaryStore::open(layout, &cache)?);
        let counts = CountsStore::open(
            &cache,
            &CountsStore::store_path(layout),
            &PrimaryCountsRebuilder::new(Arc::clone(&primary)),
            OpenMode::ReadWrite,
        )?;
        counts.close();
        let degrees = DegreesStore::open(
            &cache,
            &DegreesStore::store_path(layout),
            &PrimaryDegreesRebuilder::new(Arc::clone(&primary)),
            OpenMode::ReadWrite,
        )?;
        degrees.close();
        primary.close();
    }
    cache.close()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::meta::read_meta;
    use tempfile::tempdir;

    #[test]
    fn written_database_reopens_with_derived_stores() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path().join("db"));
        let mut builder = StoreBuilder::new();
        let person = builder.label("Person");
        let knows = builder.relationship_type("KNOWS");
        let a = builder.dense_node(Some(person));
        let b = builder.node(Some(person));
        builder.edge(a, b, knows).unwrap();
        builder.edge(a, a, knows).unwrap();
        builder.last_committed_tx(TxId(7));
        let meta = builder.write(&layout).unwrap();
        assert_eq!(read_meta(&layout.meta_store()).unwrap(), meta);

        let cache =
            PageCache::new(PageCacheOptions::default(), Arc::new(PageCacheTracer::new())).unwrap();
        let primary = PrimaryStore::open(&layout, &cache).unwrap();
        assert_eq!(primary.last_committed_tx_id(), TxId(7));
        let node_a = primary.read_node(a).unwrap();
        assert_eq!(node_a.first_edge, EdgeId(1));
        let self_loop = primary.read_edge(EdgeId(1)).unwrap();
        assert_eq!(self_loop.src_next, EdgeId(0));
        assert!(layout.counts_store().exists());
        assert!(layout.degrees_store().exists());
    }

    #[test]
    fn edges_need_live_endpoints() {
        let mut builder = StoreBuilder::new();
        let knows = builder.relationship_type("KNOWS");
        let a = builder.node(None);
        let gone = builder.deleted_node();
        assert!(builder.edge(a, gone, knows).is_err());
        assert!(builder.edge(a, NodeId(99), knows).is_err());
    }
}
