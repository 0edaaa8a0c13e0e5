#![forbid(unsafe_code)]

mod cache;
mod tracer;

pub use cache::{PageCache, PageCacheOptions, PagedFile, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
pub use tracer::{PageCacheStats, PageCacheTracer};
