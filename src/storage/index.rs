#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::lifecycle::Lifecycle;
use crate::logging::Log;
use crate::primitives::pager::PageCache;
use crate::types::{NodeId, Result, SombraError};

use super::auxiliary::AuxFile;
use super::layout::DatabaseLayout;
use super::schema::IndexDescriptor;

/// Provider name of the built-in index implementation.
pub const NATIVE_BTREE_PROVIDER: &str = "native-btree-1.0";
/// Kind tag of the label index file.
pub const LABEL_INDEX_KIND: [u8; 4] = *b"LBLX";
/// Kind tag of property index files.
pub const PROPERTY_INDEX_KIND: [u8; 4] = *b"PIDX";
/// Kind tag of the index statistics file.
pub const INDEX_STATS_KIND: [u8; 4] = *b"ISTA";

/// How the extensions are being run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    /// A single offline tool owns the database; nothing else runs.
    SingleTool,
}

/// What an index maps nodes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Node id to label.
    Label,
    /// Node id to property value.
    Property,
}

/// Read-only access to one index file. Keys are node ids.
pub struct IndexReader {
    file: AuxFile,
}

impl IndexReader {
    /// Number of entries.
    pub fn entry_count(&self) -> u64 {
        self.file.entry_count()
    }

    /// Indexed value for `node`.
    pub fn get(&self, node: NodeId) -> Result<Option<u64>> {
        self.file.get(node.0)
    }

    /// Every entry in file order.
    pub fn entries(&self) -> Result<Vec<(NodeId, u64)>> {
        Ok(self
            .file
            .entries()?
            .into_iter()
            .map(|(node, value)| (NodeId(node), value))
            .collect())
    }

    /// Validates the entry checksum.
    pub fn verify_checksum(&self) -> Result<()> {
        self.file.verify_checksum()
    }

    /// File backing the index.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Unmaps the file.
    pub fn close(&self) {
        self.file.close();
    }
}

/// A named index implementation.
pub trait IndexProvider: Send + Sync {
    /// Name matched against schema descriptors.
    fn name(&self) -> &str;

    /// What indexes of this provider map to.
    fn kind(&self) -> IndexKind;

    /// Opens an index file read-only.
    fn open(&self, path: &Path) -> Result<IndexReader>;
}

struct NativeIndexProvider {
    kind: IndexKind,
    cache: Arc<PageCache>,
}

impl IndexProvider for NativeIndexProvider {
    fn name(&self) -> &str {
        NATIVE_BTREE_PROVIDER
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn open(&self, path: &Path) -> Result<IndexReader> {
        let tag = match self.kind {
            IndexKind::Label => LABEL_INDEX_KIND,
            IndexKind::Property => PROPERTY_INDEX_KIND,
        };
        Ok(IndexReader {
            file: AuxFile::open(&self.cache, path, tag)?,
        })
    }
}

/// Extension modules loaded for a database.
pub struct DatabaseExtensions {
    mode: OperatingMode,
    providers: Vec<Arc<dyn IndexProvider>>,
    started: AtomicBool,
    log: Arc<dyn Log>,
    database: String,
}

/// Loads the extensions available for `layout`.
pub fn instantiate_extensions(
    layout: &DatabaseLayout,
    cache: &Arc<PageCache>,
    log: Arc<dyn Log>,
    mode: OperatingMode,
) -> DatabaseExtensions {
    let providers: Vec<Arc<dyn IndexProvider>> = vec![
        Arc::new(NativeIndexProvider {
            kind: IndexKind::Label,
            cache: Arc::clone(cache),
        }),
        Arc::new(NativeIndexProvider {
            kind: IndexKind::Property,
            cache: Arc::clone(cache),
        }),
    ];
    DatabaseExtensions {
        mode,
        providers,
        started: AtomicBool::new(false),
        log,
        database: layout.database_name(),
    }
}

impl DatabaseExtensions {
    /// Mode the extensions were loaded in.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Returns true between start and stop.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Provider of `kind` registered under `name`.
    pub fn provider(&self, name: &str, kind: IndexKind) -> Option<Arc<dyn IndexProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name && provider.kind() == kind)
            .map(Arc::clone)
    }
}

impl Lifecycle for DatabaseExtensions {
    fn name(&self) -> &str {
        "extensions"
    }

    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        self.log.debug(&format!(
            "Loaded {} index providers for {} in {:?} mode",
            self.providers.len(),
            self.database,
            self.mode
        ));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }
}

/// Whether an index could be brought online.
#[derive(Clone)]
pub enum IndexState {
    /// Opened and readable.
    Online(Arc<IndexReader>),
    /// Could not be opened; the message says why.
    Failed(String),
}

/// A property index together with its state.
#[derive(Clone)]
pub struct PropertyIndexHandle {
    /// Schema definition.
    pub descriptor: IndexDescriptor,
    /// Open reader or failure.
    pub state: IndexState,
}

struct LoadedIndexes {
    label: IndexState,
    properties: Vec<PropertyIndexHandle>,
}

/// Resolves every index to its provider and opens it at start.
///
/// An index that fails to open is recorded as failed rather than failing
/// startup, so the check can report it.
pub struct IndexProviderMap {
    extensions: Arc<DatabaseExtensions>,
    layout: DatabaseLayout,
    descriptors: Vec<IndexDescriptor>,
    loaded: RwLock<Option<LoadedIndexes>>,
}

impl IndexProviderMap {
    /// Map over the indexes in `descriptors`.
    pub fn new(
        extensions: Arc<DatabaseExtensions>,
        layout: &DatabaseLayout,
        descriptors: Vec<IndexDescriptor>,
    ) -> Self {
        Self {
            extensions,
            layout: layout.clone(),
            descriptors,
            loaded: RwLock::new(None),
        }
    }

    /// State of the label index.
    pub fn label_index(&self) -> Result<IndexState> {
        self.loaded
            .read()
            .as_ref()
            .map(|loaded| loaded.label.clone())
            .ok_or_else(not_started)
    }

    /// Every property index with its state.
    pub fn property_indexes(&self) -> Result<Vec<PropertyIndexHandle>> {
        self.loaded
            .read()
            .as_ref()
            .map(|loaded| loaded.properties.clone())
            .ok_or_else(not_started)
    }

    fn open_index(&self, provider: &str, kind: IndexKind, path: PathBuf) -> IndexState {
        let Some(provider) = self.extensions.provider(provider, kind) else {
            return IndexState::Failed(format!("no {kind:?} index provider named '{provider}'"));
        };
        match provider.open(&path) {
            Ok(reader) => IndexState::Online(Arc::new(reader)),
            Err(err) => IndexState::Failed(err.to_string()),
        }
    }
}

fn not_started() -> SombraError {
    SombraError::Unavailable("index providers have not been started".into())
}

impl Lifecycle for IndexProviderMap {
    fn name(&self) -> &str {
        "index-providers"
    }

    fn start(&self) -> Result<()> {
        if !self.extensions.is_started() {
            return Err(SombraError::Unavailable(
                "extensions must start before index providers".into(),
            ));
        }
        let label = self.open_index(
            NATIVE_BTREE_PROVIDER,
            IndexKind::Label,
            self.layout.label_index_store(),
        );
        let properties: Vec<PropertyIndexHandle> = self
            .descriptors
            .iter()
            .map(|descriptor| PropertyIndexHandle {
                descriptor: descriptor.clone(),
                state: self.open_index(
                    &descriptor.provider,
                    IndexKind::Property,
                    self.layout.property_index_store(descriptor.id),
                ),
            })
            .collect();
        let failed = properties
            .iter()
            .filter(|handle| matches!(handle.state, IndexState::Failed(_)))
            .count();
        debug!(
            property_indexes = properties.len(),
            failed,
            label_online = matches!(label, IndexState::Online(_)),
            "indexes.started"
        );
        *self.loaded.write() = Some(LoadedIndexes { label, properties });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(loaded) = self.loaded.write().take() {
            let readers = std::iter::once(&loaded.label)
                .chain(loaded.properties.iter().map(|handle| &handle.state));
            for state in readers {
                if let IndexState::Online(reader) = state {
                    reader.close();
                }
            }
        }
        Ok(())
    }
}

/// Loaded index statistics, or why they are not available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatisticsState {
    /// Sampled entry count per index id.
    Loaded(BTreeMap<u32, u64>),
    /// The statistics file does not exist.
    Missing,
    /// The file exists but could not be read.
    Unreadable(String),
}

/// Per-index sampled entry counts, read at start.
pub struct IndexStatisticsStore {
    cache: Arc<PageCache>,
    path: PathBuf,
    state: RwLock<Option<StatisticsState>>,
}

impl IndexStatisticsStore {
    /// Store reading `layout`'s statistics file through `cache`.
    pub fn new(cache: Arc<PageCache>, layout: &DatabaseLayout) -> Self {
        Self {
            cache,
            path: layout.index_statistics_store(),
            state: RwLock::new(None),
        }
    }

    /// Loaded state; unavailable before start.
    pub fn state(&self) -> Result<StatisticsState> {
        self.state.read().clone().ok_or_else(|| {
            SombraError::Unavailable("index statistics have not been loaded".into())
        })
    }

    fn load(&self) -> Result<BTreeMap<u32, u64>> {
        let file = AuxFile::open(&self.cache, &self.path, INDEX_STATS_KIND)?;
        file.verify_checksum()?;
        let mut samples = BTreeMap::new();
        for (key, value) in file.entries()? {
            let index_id = u32::try_from(key).map_err(|_| {
                SombraError::Corruption(format!("index statistics key {key} is not an index id"))
            })?;
            samples.insert(index_id, value);
        }
        file.close();
        Ok(samples)
    }
}

impl Lifecycle for IndexStatisticsStore {
    fn name(&self) -> &str {
        "index-statistics"
    }

    fn start(&self) -> Result<()> {
        let state = match self.load() {
            Ok(samples) => StatisticsState::Loaded(samples),
            Err(SombraError::MissingFile(_)) => StatisticsState::Missing,
            Err(err) if err.is_structural() => StatisticsState::Unreadable(err.to_string()),
            Err(err) => return Err(err),
        };
        if !matches!(state, StatisticsState::Loaded(_)) {
            info!(path = %self.path.display(), state = ?state, "index_stats.unavailable");
        }
        *self.state.write() = Some(state);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.state.write().take();
        Ok(())
    }
}
