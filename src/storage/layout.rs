#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

/// File names making up one database directory.
///
/// The layout only computes paths; it never touches the filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseLayout {
    dir: PathBuf,
}

impl DatabaseLayout {
    /// Layout rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name, used to label reports and logs.
    pub fn database_name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph".to_string())
    }

    /// Store metadata: last committed transaction and high ids.
    pub fn meta_store(&self) -> PathBuf {
        self.dir.join("meta.store")
    }

    /// Fixed-size node records.
    pub fn nodes_store(&self) -> PathBuf {
        self.dir.join("nodes.store")
    }

    /// Fixed-size edge records.
    pub fn edges_store(&self) -> PathBuf {
        self.dir.join("edges.store")
    }

    /// Label, property key and relationship type names.
    pub fn tokens_store(&self) -> PathBuf {
        self.dir.join("tokens.store")
    }

    /// Property index definitions.
    pub fn schema_store(&self) -> PathBuf {
        self.dir.join("schema.store")
    }

    /// Write-ahead log.
    pub fn wal(&self) -> PathBuf {
        self.dir.join("graph.wal")
    }

    /// Node and edge counts derived from the primary store.
    pub fn counts_store(&self) -> PathBuf {
        self.dir.join("counts.store")
    }

    /// Per-type degrees of dense nodes.
    pub fn degrees_store(&self) -> PathBuf {
        self.dir.join("degrees.store")
    }

    /// Node to label index.
    pub fn label_index_store(&self) -> PathBuf {
        self.dir.join("label-index.store")
    }

    /// Entries of the property index with the given id.
    pub fn property_index_store(&self, index_id: u32) -> PathBuf {
        self.dir.join(format!("index-{index_id}.store"))
    }

    /// Sampled entry counts per property index.
    pub fn index_statistics_store(&self) -> PathBuf {
        self.dir.join("index-stats.store")
    }
}
