#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sombra_consistency::consistency::{CheckOptions, ConsistencyCheckService, HostResources};
use sombra_consistency::logging::Log;
use sombra_consistency::primitives::pager::{PageCache, PageCacheOptions, PageCacheTracer};
use sombra_consistency::storage::{
    AuxFile, DatabaseLayout, EdgeRecord, NodeRecord, StoreBuilder, StoreMeta, EDGE_RECORD_LEN,
    NODE_RECORD_LEN,
};
use sombra_consistency::types::{EdgeId, NodeId, TxId};
use tempfile::TempDir;
use time::macros::datetime;
use tracing::Level;

pub const LAST_TX: TxId = TxId(12);

pub struct Fixture {
    pub dir: TempDir,
    pub layout: DatabaseLayout,
    pub meta: StoreMeta,
    pub report_dir: PathBuf,
}

/// Nodes 0..=3 are `Person` (0 dense, 1..=3 with a `name`), 4 is an unlabeled
/// dense hub, 5 is a deleted slot. Index 1 covers `(Person, name)`.
pub fn social_graph() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let layout = DatabaseLayout::new(dir.path().join("graph.db"));
    let mut builder = StoreBuilder::new();
    let person = builder.label("Person");
    let name = builder.property_key("name");
    let knows = builder.relationship_type("KNOWS");
    let likes = builder.relationship_type("LIKES");

    let alice = builder.dense_node(Some(person));
    let bob = builder.node_with_property(Some(person), name, 2);
    let carol = builder.node_with_property(Some(person), name, 3);
    let dave = builder.node_with_property(Some(person), name, 4);
    let hub = builder.dense_node(None);
    builder.deleted_node();
    for (src, dst, ty) in [
        (alice, bob, knows),
        (bob, carol, knows),
        (carol, alice, likes),
        (dave, hub, likes),
        (hub, alice, knows),
        (alice, alice, likes),
    ] {
        builder.edge(src, dst, ty).expect("edge");
    }
    builder.property_index(person, name);
    builder.last_committed_tx(LAST_TX);
    let meta = builder.write(&layout).expect("write fixture");
    let report_dir = dir.path().join("reports");
    Fixture {
        dir,
        layout,
        meta,
        report_dir,
    }
}

pub fn host() -> HostResources {
    HostResources {
        available_processors: 4,
        available_memory: 1 << 30,
    }
}

pub fn service() -> ConsistencyCheckService {
    ConsistencyCheckService::with_timestamp(datetime!(2024-05-17 08:30:00 UTC))
}

pub fn options(fixture: &Fixture, log: Arc<dyn Log>) -> CheckOptions {
    CheckOptions::new()
        .log(log)
        .report_dir(&fixture.report_dir)
        .host_resources(host())
}

pub fn cache() -> Arc<PageCache> {
    PageCache::new(PageCacheOptions::default(), Arc::new(PageCacheTracer::new())).expect("cache")
}

#[derive(Default)]
pub struct CaptureLog(Mutex<Vec<(Level, String)>>);

impl CaptureLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.0.lock().clone()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.0
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl Log for CaptureLog {
    fn log(&self, level: Level, message: &str) {
        self.0.lock().push((level, message.to_string()));
    }
}

/// Rewrites a node with a valid checksum.
pub fn rewrite_node(layout: &DatabaseLayout, id: u64, edit: impl FnOnce(&mut NodeRecord)) {
    let path = layout.nodes_store();
    let mut bytes = fs::read(&path).expect("read nodes");
    let at = id as usize * NODE_RECORD_LEN;
    let mut record =
        NodeRecord::decode(NodeId(id), &bytes[at..at + NODE_RECORD_LEN]).expect("decode node");
    edit(&mut record);
    bytes[at..at + NODE_RECORD_LEN].copy_from_slice(&record.encode(NodeId(id)));
    fs::write(&path, bytes).expect("write nodes");
}

/// Rewrites an edge with a valid checksum.
pub fn rewrite_edge(layout: &DatabaseLayout, id: u64, edit: impl FnOnce(&mut EdgeRecord)) {
    let path = layout.edges_store();
    let mut bytes = fs::read(&path).expect("read edges");
    let at = id as usize * EDGE_RECORD_LEN;
    let mut record =
        EdgeRecord::decode(EdgeId(id), &bytes[at..at + EDGE_RECORD_LEN]).expect("decode edge");
    edit(&mut record);
    bytes[at..at + EDGE_RECORD_LEN].copy_from_slice(&record.encode(EdgeId(id)));
    fs::write(&path, bytes).expect("write edges");
}

/// Flips a byte inside a node record without fixing its checksum.
pub fn smash_node(layout: &DatabaseLayout, id: u64) {
    let path = layout.nodes_store();
    let mut bytes = fs::read(&path).expect("read nodes");
    bytes[id as usize * NODE_RECORD_LEN + 20] ^= 0xFF;
    fs::write(&path, bytes).expect("write nodes");
}

/// Entries of an auxiliary file.
pub fn aux_entries(path: &Path, kind: [u8; 4]) -> BTreeMap<u64, u64> {
    let cache = cache();
    let file = AuxFile::open(&cache, path, kind).expect("open aux file");
    let entries = file.entries().expect("entries").into_iter().collect();
    file.close();
    entries
}

pub fn report_files(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.expect("dir entry").path())
            .collect(),
        Err(_) => Vec::new(),
    }
}
