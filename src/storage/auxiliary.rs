#![forbid(unsafe_code)]

//! Shared format for stores derived from the primary records.
//!
//! Layout: a 40-byte header (magic, version, flags, store kind, stamped
//! transaction id, entry count, header crc), sorted `(key, value)` pairs of
//! big-endian `u64`s, and a trailing crc over the entry region.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::primitives::pager::{PageCache, PagedFile};
use crate::types::{Result, SombraError, TxId};

use super::codec::{be_u16, be_u32, be_u64, crc32, write_atomically};
use super::layout::DatabaseLayout;

const AUX_MAGIC: [u8; 4] = *b"SOMX";
const AUX_VERSION: u16 = 1;
const FLAG_NEEDS_REBUILD: u16 = 0x0001;

/// Header size.
pub const AUX_HEADER_LEN: usize = 40;
/// Size of one `(key, value)` entry.
pub const AUX_ENTRY_LEN: usize = 16;

/// Decoded header of an auxiliary store file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuxHeader {
    /// Four-byte tag naming the store kind.
    pub kind: [u8; 4],
    /// Set when the store knows its contents are stale.
    pub needs_rebuild: bool,
    /// Transaction the contents were derived at.
    pub tx: TxId,
    /// Number of entries.
    pub entries: u64,
}

impl AuxHeader {
    fn encode(&self) -> [u8; AUX_HEADER_LEN] {
        let mut buf = [0u8; AUX_HEADER_LEN];
        buf[0..4].copy_from_slice(&AUX_MAGIC);
        buf[4..6].copy_from_slice(&AUX_VERSION.to_be_bytes());
        let flags = if self.needs_rebuild { FLAG_NEEDS_REBUILD } else { 0 };
        buf[6..8].copy_from_slice(&flags.to_be_bytes());
        buf[8..12].copy_from_slice(&self.kind);
        buf[12..20].copy_from_slice(&self.tx.0.to_be_bytes());
        buf[20..28].copy_from_slice(&self.entries.to_be_bytes());
        let crc = crc32(&buf[..36]);
        buf[36..40].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn decode(src: &[u8; AUX_HEADER_LEN], path: &Path) -> Result<Self> {
        if src[0..4] != AUX_MAGIC {
            return Err(SombraError::Corruption(format!(
                "{}: magic mismatch",
                path.display()
            )));
        }
        if crc32(&src[..36]) != be_u32(&src[36..40]) {
            return Err(SombraError::Corruption(format!(
                "{}: header crc mismatch",
                path.display()
            )));
        }
        let version = be_u16(&src[4..6]);
        if version != AUX_VERSION {
            return Err(SombraError::Corruption(format!(
                "{}: version {version} unsupported",
                path.display()
            )));
        }
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&src[8..12]);
        Ok(Self {
            kind,
            needs_rebuild: be_u16(&src[6..8]) & FLAG_NEEDS_REBUILD != 0,
            tx: TxId(be_u64(&src[12..20])),
            entries: be_u64(&src[20..28]),
        })
    }
}

/// An auxiliary store file mapped through the page cache.
pub struct AuxFile {
    file: PagedFile,
    header: AuxHeader,
}

impl AuxFile {
    /// Maps and validates the header of the file at `path`.
    pub fn open(cache: &Arc<PageCache>, path: &Path, kind: [u8; 4]) -> Result<Self> {
        let file = cache.map(path)?;
        if file.len() < AUX_HEADER_LEN as u64 {
            return Err(SombraError::Corruption(format!(
                "{}: header truncated ({} bytes)",
                path.display(),
                file.len()
            )));
        }
        let mut raw = [0u8; AUX_HEADER_LEN];
        file.read_at(0, &mut raw)?;
        let header = AuxHeader::decode(&raw, path)?;
        if header.kind != kind {
            return Err(SombraError::Corruption(format!(
                "{}: store kind {:?} where {:?} was expected",
                path.display(),
                String::from_utf8_lossy(&header.kind),
                String::from_utf8_lossy(&kind)
            )));
        }
        let expected = header
            .entries
            .checked_mul(AUX_ENTRY_LEN as u64)
            .and_then(|body| body.checked_add(AUX_HEADER_LEN as u64 + 4));
        if expected != Some(file.len()) {
            return Err(SombraError::Corruption(format!(
                "{}: {} entries do not fit a {} byte file",
                path.display(),
                header.entries,
                file.len()
            )));
        }
        Ok(Self { file, header })
    }

    /// Decoded header.
    pub fn header(&self) -> &AuxHeader {
        &self.header
    }

    /// File path.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of entries.
    pub fn entry_count(&self) -> u64 {
        self.header.entries
    }

    /// Reads the entry at position `index`.
    pub fn entry(&self, index: u64) -> Result<(u64, u64)> {
        if index >= self.header.entries {
            return Err(SombraError::Invalid(format!(
                "entry {index} out of range for {}",
                self.path().display()
            )));
        }
        let mut raw = [0u8; AUX_ENTRY_LEN];
        self.file
            .read_at(AUX_HEADER_LEN as u64 + index * AUX_ENTRY_LEN as u64, &mut raw)?;
        Ok((be_u64(&raw[0..8]), be_u64(&raw[8..16])))
    }

    /// Binary-searches for `key`. Assumes sorted keys.
    pub fn get(&self, key: u64) -> Result<Option<u64>> {
        let (mut low, mut high) = (0u64, self.header.entries);
        while low < high {
            let mid = low + (high - low) / 2;
            let (probe, value) = self.entry(mid)?;
            match probe.cmp(&key) {
                std::cmp::Ordering::Equal => return Ok(Some(value)),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Ok(None)
    }

    /// Reads every entry in file order.
    pub fn entries(&self) -> Result<Vec<(u64, u64)>> {
        let body = self.read_body()?;
        Ok(body
            .chunks_exact(AUX_ENTRY_LEN)
            .map(|chunk| (be_u64(&chunk[0..8]), be_u64(&chunk[8..16])))
            .collect())
    }

    /// Checks the trailing crc against the entry region.
    pub fn verify_checksum(&self) -> Result<()> {
        let body = self.read_body()?;
        let mut trailer = [0u8; 4];
        self.file
            .read_at(AUX_HEADER_LEN as u64 + body.len() as u64, &mut trailer)?;
        if crc32(&body) != u32::from_be_bytes(trailer) {
            return Err(SombraError::Corruption(format!(
                "{}: entry crc mismatch",
                self.path().display()
            )));
        }
        Ok(())
    }

    /// Unmaps the file.
    pub fn close(&self) {
        self.file.close();
    }

    fn read_body(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.header.entries * AUX_ENTRY_LEN as u64)
            .map_err(|_| SombraError::Invalid("auxiliary store too large".into()))?;
        let mut body = vec![0u8; len];
        self.file.read_at(AUX_HEADER_LEN as u64, &mut body)?;
        Ok(body)
    }
}

/// Writes an auxiliary store file.
pub fn write_aux(
    path: &Path,
    kind: [u8; 4],
    tx: TxId,
    needs_rebuild: bool,
    entries: &BTreeMap<u64, u64>,
) -> Result<()> {
    let header = AuxHeader {
        kind,
        needs_rebuild,
        tx,
        entries: entries.len() as u64,
    };
    let mut body = Vec::with_capacity(entries.len() * AUX_ENTRY_LEN);
    for (key, value) in entries {
        body.extend_from_slice(&key.to_be_bytes());
        body.extend_from_slice(&value.to_be_bytes());
    }
    let mut bytes = Vec::with_capacity(AUX_HEADER_LEN + body.len() + 4);
    bytes.extend_from_slice(&header.encode());
    bytes.extend_from_slice(&body);
    bytes.extend_from_slice(&crc32(&body).to_be_bytes());
    write_atomically(path, &bytes)?;
    Ok(())
}

/// Collects entries produced by a [`Rebuilder`].
#[derive(Debug, Default)]
pub struct AuxUpdater {
    entries: BTreeMap<u64, u64>,
}

impl AuxUpdater {
    /// Empty updater.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    pub fn put(&mut self, key: u64, value: u64) {
        self.entries.insert(key, value);
    }

    /// Adds `delta` to `key`, starting from zero.
    pub fn increment(&mut self, key: u64, delta: u64) {
        *self.entries.entry(key).or_insert(0) += delta;
    }

    /// Entries collected so far.
    pub fn entries(&self) -> &BTreeMap<u64, u64> {
        &self.entries
    }
}

/// Regenerates an auxiliary store from primary data.
pub trait Rebuilder: Send + Sync {
    /// Transaction the regenerated contents are stamped with.
    fn last_committed_tx_id(&self) -> TxId;

    /// Writes the regenerated entries into `updater`.
    fn rebuild(&self, updater: &mut AuxUpdater) -> Result<()>;
}

/// How an auxiliary store may be opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Never write; a store that needs rebuilding fails to open.
    ReadOnly,
    /// Regenerated contents are written back to disk.
    ReadWrite,
}

/// Why a store was considered stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    /// The file does not exist.
    Missing,
    /// The header carries the needs-rebuild flag.
    Flagged,
    /// The stamped transaction differs from the primary store's.
    TxMismatch {
        /// Transaction in the file.
        stored: TxId,
        /// Transaction of the primary store.
        expected: TxId,
    },
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::Missing => f.write_str("file is missing"),
            RebuildReason::Flagged => f.write_str("file is flagged for rebuild"),
            RebuildReason::TxMismatch { stored, expected } => {
                write!(f, "file is at tx {stored} but the store is at tx {expected}")
            }
        }
    }
}

/// Opens the store at `path`, regenerating it through `rebuilder` when it is
/// missing, flagged, or stamped with another transaction.
///
/// Corrupt headers are returned as errors without consulting the rebuilder.
pub fn open_aux_file(
    cache: &Arc<PageCache>,
    path: &Path,
    name: &str,
    kind: [u8; 4],
    rebuilder: &dyn Rebuilder,
    mode: OpenMode,
) -> Result<AuxFile> {
    let expected = rebuilder.last_committed_tx_id();
    let reason = match AuxFile::open(cache, path, kind) {
        Ok(file) => {
            let header = *file.header();
            if header.needs_rebuild {
                file.close();
                RebuildReason::Flagged
            } else if header.tx != expected {
                file.close();
                RebuildReason::TxMismatch {
                    stored: header.tx,
                    expected,
                }
            } else {
                return Ok(file);
            }
        }
        Err(SombraError::MissingFile(_)) => RebuildReason::Missing,
        Err(err) => return Err(err),
    };
    info!(store = name, path = %path.display(), reason = %reason, "aux.rebuild_needed");

    let mut updater = AuxUpdater::new();
    rebuilder.rebuild(&mut updater)?;
    if mode == OpenMode::ReadOnly {
        return Err(SombraError::Invalid(format!(
            "{name} at {} needs rebuild ({reason}) but was opened read-only",
            path.display()
        )));
    }
    write_aux(path, kind, expected, false, updater.entries())?;
    info!(
        store = name,
        path = %path.display(),
        entries = updater.entries().len(),
        "aux.rebuilt"
    );
    AuxFile::open(cache, path, kind)
}

/// A derived store with rebuild-on-open semantics.
pub trait AuxiliaryStore: Sized + Send + Sync + 'static {
    /// Human-readable name used in errors and reports.
    const NAME: &'static str;
    /// Kind tag stored in the header.
    const KIND: [u8; 4];

    /// Where the store lives in `layout`.
    fn store_path(layout: &DatabaseLayout) -> PathBuf;

    /// Wraps an opened file.
    fn from_file(file: AuxFile) -> Self;

    /// The underlying file.
    fn file(&self) -> &AuxFile;

    /// Opens or regenerates the store.
    fn open(
        cache: &Arc<PageCache>,
        path: &Path,
        rebuilder: &dyn Rebuilder,
        mode: OpenMode,
    ) -> Result<Self> {
        open_aux_file(cache, path, Self::NAME, Self::KIND, rebuilder, mode).map(Self::from_file)
    }

    /// Brings an opened store to a queryable state by validating its entries.
    fn start(&self) -> Result<()> {
        self.file().verify_checksum()
    }

    /// Releases the store's pages.
    fn close(&self) {
        self.file().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageCacheOptions, PageCacheTracer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const KIND: [u8; 4] = *b"TEST";

    struct Counting {
        tx: TxId,
        calls: AtomicUsize,
    }

    impl Rebuilder for Counting {
        fn last_committed_tx_id(&self) -> TxId {
            self.tx
        }

        fn rebuild(&self, updater: &mut AuxUpdater) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            updater.put(3, 30);
            updater.increment(1, 5);
            updater.increment(1, 5);
            Ok(())
        }
    }

    fn cache() -> Arc<PageCache> {
        PageCache::new(PageCacheOptions::default(), Arc::new(PageCacheTracer::new())).unwrap()
    }

    fn rebuilder(tx: u64) -> Counting {
        Counting {
            tx: TxId(tx),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn missing_store_is_rebuilt_once_in_read_write_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aux.store");
        let cache = cache();
        let rebuilder = rebuilder(4);

        let file = open_aux_file(&cache, &path, "test store", KIND, &rebuilder, OpenMode::ReadWrite)
            .unwrap();
        assert_eq!(file.entries().unwrap(), vec![(1, 10), (3, 30)]);
        assert_eq!(file.get(3).unwrap(), Some(30));
        assert_eq!(file.get(2).unwrap(), None);
        file.verify_checksum().unwrap();
        drop(file);

        open_aux_file(&cache, &path, "test store", KIND, &rebuilder, OpenMode::ReadWrite).unwrap();
        assert_eq!(rebuilder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flagged_or_stale_store_triggers_rebuild() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aux.store");
        let cache = cache();
        write_aux(&path, KIND, TxId(4), true, &BTreeMap::new()).unwrap();
        let rebuilder = rebuilder(4);
        let err = open_aux_file(&cache, &path, "test store", KIND, &rebuilder, OpenMode::ReadOnly)
            .err()
            .unwrap();
        assert!(matches!(err, SombraError::Invalid(_)), "{err:?}");

        write_aux(&path, KIND, TxId(2), false, &BTreeMap::new()).unwrap();
        open_aux_file(&cache, &path, "test store", KIND, &rebuilder, OpenMode::ReadWrite).unwrap();
        assert_eq!(rebuilder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn corrupt_header_is_not_rebuilt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aux.store");
        std::fs::write(&path, [0u8; 64]).unwrap();
        let rebuilder = rebuilder(1);
        let err = open_aux_file(&cache(), &path, "test store", KIND, &rebuilder, OpenMode::ReadWrite)
            .err()
            .unwrap();
        assert!(matches!(err, SombraError::Corruption(_)), "{err:?}");
        assert_eq!(rebuilder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn damaged_entries_fail_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aux.store");
        let mut entries = BTreeMap::new();
        entries.insert(1, 2);
        write_aux(&path, KIND, TxId(1), false, &entries).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[AUX_HEADER_LEN + 15] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let file = AuxFile::open(&cache(), &path, KIND).unwrap();
        assert!(file.verify_checksum().is_err());
    }
}
