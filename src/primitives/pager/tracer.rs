use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe counters describing page cache activity.
///
/// One tracer is shared by everything reading through a cache, including
/// every scan worker, so all counters are relaxed atomics.
#[derive(Debug, Default)]
pub struct PageCacheTracer {
    hits: AtomicU64,
    faults: AtomicU64,
    evictions: AtomicU64,
    bytes_read: AtomicU64,
}

/// Point-in-time copy of [`PageCacheTracer`] counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PageCacheStats {
    /// Page requests served from memory.
    pub hits: u64,
    /// Page requests that had to read from disk.
    pub faults: u64,
    /// Pages dropped to make room for others.
    pub evictions: u64,
    /// Bytes read from disk on faults.
    pub bytes_read: u64,
}

impl PageCacheTracer {
    /// Creates a tracer with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fault(&self, bytes: usize) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> PageCacheStats {
        PageCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}
