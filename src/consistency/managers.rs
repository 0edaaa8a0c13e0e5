#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::lifecycle::Lifecycle;
use crate::primitives::pager::PageCache;
use crate::storage::{
    AuxUpdater, AuxiliaryStore, CountsStore, DatabaseLayout, DegreesStore, OpenMode, Rebuilder,
};
use crate::types::{Result, SombraError, TxId};

/// Rebuild callback that refuses to rebuild.
///
/// Handing this to an auxiliary store turns "needs regeneration" into an
/// open failure, so the check reports a broken store instead of repairing it.
#[derive(Clone, Copy, Debug)]
pub struct RebuildPreventingRebuilder {
    store: &'static str,
    last_committed_tx: TxId,
}

impl RebuildPreventingRebuilder {
    /// Sentinel for `store`, reporting `last_committed_tx` as current.
    pub fn new(store: &'static str, last_committed_tx: TxId) -> Self {
        Self {
            store,
            last_committed_tx,
        }
    }
}

impl Rebuilder for RebuildPreventingRebuilder {
    fn last_committed_tx_id(&self) -> TxId {
        self.last_committed_tx
    }

    fn rebuild(&self, _updater: &mut AuxUpdater) -> Result<()> {
        Err(SombraError::RebuildRequired {
            store: self.store,
            last_committed_tx: self.last_committed_tx,
        })
    }
}

enum ManagerState<S> {
    Unopened,
    Open(Arc<S>),
    Failed(String),
    Closed,
}

/// Opens an auxiliary store lazily, at most once, and closes it on shutdown.
///
/// The store is opened read-only with a [`RebuildPreventingRebuilder`]; an
/// open failure is remembered and handed back to later callers rather than
/// retried.
pub struct AuxiliaryStoreManager<S: AuxiliaryStore> {
    cache: Arc<PageCache>,
    path: PathBuf,
    last_committed_tx: TxId,
    state: Mutex<ManagerState<S>>,
    attempts: AtomicUsize,
    _store: PhantomData<fn() -> S>,
}

/// Manager of the counts store.
pub type CountsStoreManager = AuxiliaryStoreManager<CountsStore>;
/// Manager of the degrees store.
pub type DegreesStoreManager = AuxiliaryStoreManager<DegreesStore>;

impl<S: AuxiliaryStore> AuxiliaryStoreManager<S> {
    /// Manager for `S` in `layout`, expecting it stamped with `last_committed_tx`.
    pub fn new(cache: Arc<PageCache>, layout: &DatabaseLayout, last_committed_tx: TxId) -> Self {
        Self {
            cache,
            path: S::store_path(layout),
            last_committed_tx,
            state: Mutex::new(ManagerState::Unopened),
            attempts: AtomicUsize::new(0),
            _store: PhantomData,
        }
    }

    /// Opens and starts the store on first use; later calls return the same
    /// store or the same failure.
    pub fn open(&self) -> Result<Arc<S>> {
        let mut state = self.state.lock();
        match &*state {
            ManagerState::Open(store) => return Ok(Arc::clone(store)),
            ManagerState::Failed(reason) => {
                return Err(SombraError::Unavailable(format!(
                    "{} failed to open: {reason}",
                    S::NAME
                )))
            }
            ManagerState::Closed => {
                return Err(SombraError::Unavailable(format!("{} is shut down", S::NAME)))
            }
            ManagerState::Unopened => {}
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
        let sentinel = RebuildPreventingRebuilder::new(S::NAME, self.last_committed_tx);
        let opened = S::open(&self.cache, &self.path, &sentinel, OpenMode::ReadOnly).and_then(
            |store| match store.start() {
                Ok(()) => Ok(store),
                Err(err) => {
                    store.close();
                    Err(err)
                }
            },
        );
        match opened {
            Ok(store) => {
                debug!(store = S::NAME, path = %self.path.display(), "aux.opened");
                let store = Arc::new(store);
                *state = ManagerState::Open(Arc::clone(&store));
                Ok(store)
            }
            Err(err) => {
                warn!(store = S::NAME, path = %self.path.display(), error = %err, "aux.open_failed");
                *state = ManagerState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Returns true while an opened store is held.
    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), ManagerState::Open(_))
    }

    /// How many times an open was actually attempted.
    pub fn open_attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Closes the store if it was opened. Later calls do nothing.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ManagerState::Closed);
        if let ManagerState::Open(store) = previous {
            store.close();
            debug!(store = S::NAME, "aux.closed");
        }
    }
}

impl<S: AuxiliaryStore> Lifecycle for AuxiliaryStoreManager<S> {
    fn name(&self) -> &str {
        S::NAME
    }

    fn stop(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageCacheOptions, PageCacheTracer};
    use crate::storage::{write_aux, AuxFile, StoreBuilder};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    static CLOSES: AtomicUsize = AtomicUsize::new(0);

    struct Probe {
        file: AuxFile,
    }

    impl AuxiliaryStore for Probe {
        const NAME: &'static str = "probe store";
        const KIND: [u8; 4] = *b"PRBE";

        fn store_path(layout: &DatabaseLayout) -> PathBuf {
            layout.dir().join("probe.store")
        }

        fn from_file(file: AuxFile) -> Self {
            Self { file }
        }

        fn file(&self) -> &AuxFile {
            &self.file
        }

        fn close(&self) {
            CLOSES.fetch_add(1, Ordering::SeqCst);
            self.file.close();
        }
    }

    fn cache() -> Arc<PageCache> {
        PageCache::new(PageCacheOptions::default(), Arc::new(PageCacheTracer::new())).unwrap()
    }

    fn write_probe(path: &Path, tx: u64) {
        let mut entries = BTreeMap::new();
        entries.insert(1, 2);
        write_aux(path, Probe::KIND, TxId(tx), false, &entries).unwrap();
    }

    #[test]
    fn sentinel_reports_the_store_and_transaction() {
        let sentinel = RebuildPreventingRebuilder::new("counts store", TxId(9));
        let err = sentinel.rebuild(&mut AuxUpdater::new()).unwrap_err();
        assert!(matches!(
            err,
            SombraError::RebuildRequired {
                store: "counts store",
                last_committed_tx: TxId(9)
            }
        ));
        assert!(err
            .to_string()
            .contains("consistency checker will instead report broken or missing counts store"));
    }

    #[test]
    fn store_is_opened_once_and_closed_once() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path());
        write_probe(&Probe::store_path(&layout), 3);
        let manager = AuxiliaryStoreManager::<Probe>::new(cache(), &layout, TxId(3));

        let first = manager.open().unwrap();
        let second = manager.open().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.open_attempts(), 1);

        let before = CLOSES.load(Ordering::SeqCst);
        manager.shutdown();
        manager.shutdown();
        assert_eq!(CLOSES.load(Ordering::SeqCst), before + 1);
        assert!(manager.open().is_err());
    }

    #[test]
    fn stale_store_fails_without_being_rewritten() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path());
        let path = Probe::store_path(&layout);
        write_probe(&path, 2);
        let original = std::fs::read(&path).unwrap();
        let manager = AuxiliaryStoreManager::<Probe>::new(cache(), &layout, TxId(3));

        let err = manager.open().err().expect("stale store is refused");
        assert!(matches!(err, SombraError::RebuildRequired { .. }));
        assert!(matches!(manager.open(), Err(SombraError::Unavailable(_))));
        assert_eq!(manager.open_attempts(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn missing_counts_store_is_not_regenerated() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path().join("db"));
        let mut builder = StoreBuilder::new();
        builder.node(None);
        builder.write(&layout).unwrap();
        std::fs::remove_file(layout.counts_store()).unwrap();

        let manager = CountsStoreManager::new(cache(), &layout, TxId(1));
        assert!(manager.open().is_err());
        assert!(!layout.counts_store().exists());
        manager.shutdown();
    }
}
