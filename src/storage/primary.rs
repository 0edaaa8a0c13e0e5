#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::primitives::pager::{PageCache, PagedFile};
use crate::types::{EdgeId, NodeId, Result, SombraError, TxId};

use super::layout::DatabaseLayout;
use super::meta::{StoreMeta, META_LEN};
use super::records::{EdgeRecord, NodeRecord, EDGE_RECORD_LEN, NODE_RECORD_LEN};
use super::schema::{decode_schema, IndexDescriptor};
use super::tokens::{decode_tokens, TokenRecord};

/// Read-only view of the primary record stores.
///
/// Record files stay mapped in the page cache until [`close`](Self::close).
/// Meta and schema are small and decoded eagerly at open.
pub struct PrimaryStore {
    layout: DatabaseLayout,
    meta: StoreMeta,
    schema: Vec<IndexDescriptor>,
    nodes: PagedFile,
    edges: PagedFile,
    tokens: PagedFile,
    closed: AtomicBool,
}

impl PrimaryStore {
    /// Opens every primary store file of `layout` through `cache`.
    pub fn open(layout: &DatabaseLayout, cache: &Arc<PageCache>) -> Result<Self> {
        let meta = {
            let file = cache.map(layout.meta_store())?;
            let bytes = read_all(&file)?;
            if bytes.len() != META_LEN {
                return Err(SombraError::Corruption(format!(
                    "meta store is {} bytes, expected {META_LEN}",
                    bytes.len()
                )));
            }
            StoreMeta::decode(&bytes)?
        };
        let schema = {
            let file = cache.map(layout.schema_store())?;
            decode_schema(&read_all(&file)?)?
        };
        let nodes = cache.map(layout.nodes_store())?;
        let edges = cache.map(layout.edges_store())?;
        let tokens = cache.map(layout.tokens_store())?;
        debug!(
            db = %layout.dir().display(),
            last_tx = meta.last_committed_tx.0,
            node_slots = nodes.len() / NODE_RECORD_LEN as u64,
            edge_slots = edges.len() / EDGE_RECORD_LEN as u64,
            "primary.opened"
        );
        Ok(Self {
            layout: layout.clone(),
            meta,
            schema,
            nodes,
            edges,
            tokens,
            closed: AtomicBool::new(false),
        })
    }

    /// Layout the store was opened from.
    pub fn layout(&self) -> &DatabaseLayout {
        &self.layout
    }

    /// Decoded meta store.
    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Last transaction applied to the store files.
    pub fn last_committed_tx_id(&self) -> TxId {
        self.meta.last_committed_tx
    }

    /// Property index definitions.
    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.schema
    }

    /// Number of whole node slots in `nodes.store`.
    pub fn node_slots(&self) -> u64 {
        self.nodes.len() / NODE_RECORD_LEN as u64
    }

    /// Number of whole edge slots in `edges.store`.
    pub fn edge_slots(&self) -> u64 {
        self.edges.len() / EDGE_RECORD_LEN as u64
    }

    /// Bytes after the last whole node record.
    pub fn node_store_tail(&self) -> u64 {
        self.nodes.len() % NODE_RECORD_LEN as u64
    }

    /// Bytes after the last whole edge record.
    pub fn edge_store_tail(&self) -> u64 {
        self.edges.len() % EDGE_RECORD_LEN as u64
    }

    /// Reads node slot `id`.
    pub fn read_node(&self, id: NodeId) -> Result<NodeRecord> {
        if id.0 >= self.node_slots() {
            return Err(SombraError::Corruption(format!(
                "node {id} is beyond the end of nodes.store ({} slots)",
                self.node_slots()
            )));
        }
        let mut buf = [0u8; NODE_RECORD_LEN];
        self.nodes.read_at(id.0 * NODE_RECORD_LEN as u64, &mut buf)?;
        NodeRecord::decode(id, &buf)
    }

    /// Reads edge slot `id`.
    pub fn read_edge(&self, id: EdgeId) -> Result<EdgeRecord> {
        if id.0 >= self.edge_slots() {
            return Err(SombraError::Corruption(format!(
                "edge {id} is beyond the end of edges.store ({} slots)",
                self.edge_slots()
            )));
        }
        let mut buf = [0u8; EDGE_RECORD_LEN];
        self.edges.read_at(id.0 * EDGE_RECORD_LEN as u64, &mut buf)?;
        EdgeRecord::decode(id, &buf)
    }

    /// Decodes the whole token store.
    pub fn read_tokens(&self) -> Result<Vec<TokenRecord>> {
        decode_tokens(&read_all(&self.tokens)?)
    }

    /// Unmaps every store file. Later reads fail as unavailable.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.nodes.close();
        self.edges.close();
        self.tokens.close();
        debug!(db = %self.layout.dir().display(), "primary.closed");
    }
}

impl Drop for PrimaryStore {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn read_all(file: &PagedFile) -> Result<Vec<u8>> {
    let len = usize::try_from(file.len())
        .map_err(|_| SombraError::Invalid(format!("{} too large", file.path().display())))?;
    let mut buf = vec![0u8; len];
    file.read_at(0, &mut buf)?;
    Ok(buf)
}
