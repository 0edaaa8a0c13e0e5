use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, SombraError};

use super::tracer::PageCacheTracer;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Default number of pages kept in memory.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Sizing options for a [`PageCache`].
#[derive(Clone, Debug)]
pub struct PageCacheOptions {
    /// Size of one cached page in bytes.
    pub page_size: usize,
    /// Maximum number of pages held before the least recently used is evicted.
    pub max_pages: usize,
}

impl Default for PageCacheOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_CACHE_PAGES,
        }
    }
}

impl PageCacheOptions {
    /// Total bytes the cache may hold once full.
    pub fn capacity_bytes(&self) -> u64 {
        (self.page_size as u64).saturating_mul(self.max_pages as u64)
    }
}

type PageKey = (u64, u64);

/// Read-only page cache shared by every store opened for a check.
///
/// Pages are immutable once loaded, so concurrent readers only contend on the
/// LRU bookkeeping; disk reads happen outside the lock.
pub struct PageCache {
    options: PageCacheOptions,
    pages: Mutex<LruCache<PageKey, Arc<[u8]>>>,
    next_file_id: AtomicU64,
    mapped: AtomicUsize,
    closed: AtomicBool,
    tracer: Arc<PageCacheTracer>,
}

impl PageCache {
    /// Creates an empty cache. The cache always starts cold.
    pub fn new(options: PageCacheOptions, tracer: Arc<PageCacheTracer>) -> Result<Arc<Self>> {
        if options.page_size == 0 {
            return Err(SombraError::Invalid("page size must be non-zero".into()));
        }
        let capacity = NonZeroUsize::new(options.max_pages)
            .ok_or_else(|| SombraError::Invalid("page cache needs at least one page".into()))?;
        Ok(Arc::new(Self {
            options,
            pages: Mutex::new(LruCache::new(capacity)),
            next_file_id: AtomicU64::new(1),
            mapped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            tracer,
        }))
    }

    /// Returns the sizing options the cache was created with.
    pub fn options(&self) -> &PageCacheOptions {
        &self.options
    }

    /// Returns the tracer counting this cache's activity.
    pub fn tracer(&self) -> &Arc<PageCacheTracer> {
        &self.tracer
    }

    /// Number of files currently mapped.
    pub fn mapped_files(&self) -> usize {
        self.mapped.load(Ordering::Acquire)
    }

    /// Returns true once [`PageCache::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Maps an existing file for paged reads.
    pub fn map(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<PagedFile> {
        let path = path.as_ref();
        self.ensure_open()?;
        let io = StdFileIo::open_read_only(path)?;
        self.map_io(path.to_path_buf(), Arc::new(io))
    }

    /// Maps an already opened file handle.
    pub fn map_io(self: &Arc<Self>, path: PathBuf, io: Arc<dyn FileIo>) -> Result<PagedFile> {
        self.ensure_open()?;
        let len = io.len()?;
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.mapped.fetch_add(1, Ordering::AcqRel);
        debug!(file = %path.display(), len, "pagecache.map");
        Ok(PagedFile {
            cache: Arc::clone(self),
            id,
            path,
            io,
            len,
            closed: AtomicBool::new(false),
        })
    }

    /// Drops every cached page and rejects further reads.
    ///
    /// Closing while files are still mapped is reported as an error, but the
    /// cache is closed regardless.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SombraError::Invalid("page cache already closed".into()));
        }
        self.pages.lock().clear();
        let still_mapped = self.mapped_files();
        if still_mapped > 0 {
            return Err(SombraError::Invalid(format!(
                "page cache closed with {still_mapped} files still mapped"
            )));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SombraError::Unavailable("page cache is closed".into()));
        }
        Ok(())
    }

    fn page(&self, file: &PagedFile, page_no: u64) -> Result<Arc<[u8]>> {
        self.ensure_open()?;
        let key = (file.id, page_no);
        if let Some(page) = self.pages.lock().get(&key) {
            self.tracer.hit();
            return Ok(Arc::clone(page));
        }

        let page_size = self.options.page_size as u64;
        let start = page_no * page_size;
        let len = page_size.min(file.len.saturating_sub(start)) as usize;
        let mut buf = vec![0u8; len];
        file.io.read_at(start, &mut buf)?;
        self.tracer.fault(len);

        let page: Arc<[u8]> = Arc::from(buf.into_boxed_slice());
        let mut pages = self.pages.lock();
        if let Some((evicted, _)) = pages.push(key, Arc::clone(&page)) {
            if evicted != key {
                self.tracer.evicted();
            }
        }
        Ok(page)
    }

    fn unmap(&self, file_id: u64) {
        let mut pages = self.pages.lock();
        let keys: Vec<PageKey> = pages
            .iter()
            .filter(|((id, _), _)| *id == file_id)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            pages.pop(&key);
        }
        drop(pages);
        self.mapped.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A file mapped into a [`PageCache`].
pub struct PagedFile {
    cache: Arc<PageCache>,
    id: u64,
    path: PathBuf,
    io: Arc<dyn FileIo>,
    len: u64,
    closed: AtomicBool,
}

impl PagedFile {
    /// Path the file was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length captured when the file was mapped.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for a zero-length file.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads `dst.len()` bytes at `off`, spanning pages as needed.
    ///
    /// Reading past the end of the file is corruption: every caller reads
    /// offsets derived from on-disk headers.
    pub fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SombraError::Unavailable(format!(
                "{} is no longer mapped",
                self.path.display()
            )));
        }
        let end = off
            .checked_add(dst.len() as u64)
            .ok_or_else(|| SombraError::Invalid("read offset overflow".into()))?;
        if end > self.len {
            return Err(SombraError::Corruption(format!(
                "read of {} bytes at offset {off} runs past end of {} ({} bytes)",
                dst.len(),
                self.path.display(),
                self.len
            )));
        }

        let page_size = self.cache.options.page_size as u64;
        let mut cursor = off;
        let mut written = 0usize;
        while written < dst.len() {
            let page_no = cursor / page_size;
            let in_page = (cursor % page_size) as usize;
            let page = self.cache.page(self, page_no)?;
            let take = (page.len() - in_page).min(dst.len() - written);
            dst[written..written + take].copy_from_slice(&page[in_page..in_page + take]);
            written += take;
            cursor += take as u64;
        }
        Ok(())
    }

    /// Unmaps the file and evicts its pages. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cache.unmap(self.id);
        }
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_cache(max_pages: usize) -> Arc<PageCache> {
        PageCache::new(
            PageCacheOptions {
                page_size: 16,
                max_pages,
            },
            Arc::new(PageCacheTracer::new()),
        )
        .unwrap()
    }

    #[test]
    fn reads_span_page_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let bytes: Vec<u8> = (0..100u8).collect();
        std::fs::write(&path, &bytes).unwrap();

        let cache = small_cache(8);
        let file = cache.map(&path).unwrap();
        let mut buf = [0u8; 40];
        file.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf[..], &bytes[10..50]);

        file.read_at(12, &mut buf[..4]).unwrap();
        let stats = cache.tracer().snapshot();
        assert!(stats.hits >= 1, "second read should hit: {stats:?}");
        assert_eq!(stats.faults, 4);
    }

    #[test]
    fn lru_evicts_when_full() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        let cache = small_cache(2);
        let file = cache.map(&path).unwrap();
        let mut buf = [0u8; 64];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(cache.tracer().snapshot().evictions, 2);
    }

    #[test]
    fn read_past_end_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [1u8; 10]).unwrap();

        let cache = small_cache(4);
        let file = cache.map(&path).unwrap();
        let mut buf = [0u8; 4];
        let err = file.read_at(8, &mut buf).unwrap_err();
        assert!(matches!(err, SombraError::Corruption(_)), "{err:?}");
    }

    #[test]
    fn close_reports_files_still_mapped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [0u8; 32]).unwrap();

        let cache = small_cache(4);
        let file = cache.map(&path).unwrap();
        assert_eq!(cache.mapped_files(), 1);
        assert!(cache.close().is_err());
        let mut buf = [0u8; 1];
        assert!(matches!(
            file.read_at(0, &mut buf),
            Err(SombraError::Unavailable(_))
        ));
        assert!(cache.map(&path).is_err());
    }

    #[test]
    fn closing_a_file_unmaps_it_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [0u8; 32]).unwrap();

        let cache = small_cache(4);
        let file = cache.map(&path).unwrap();
        file.close();
        file.close();
        drop(file);
        assert_eq!(cache.mapped_files(), 0);
        cache.close().unwrap();
    }
}
