#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::CheckConfig;
use crate::lifecycle::LifeSupport;
use crate::logging::{Log, TracingLog};
use crate::primitives::concurrency::JobScheduler;
use crate::primitives::memory::MemoryTracker;
use crate::primitives::pager::{PageCache, PageCacheTracer};
use crate::progress::{NoProgress, ProgressMonitorFactory};
use crate::storage::{
    instantiate_extensions, DatabaseLayout, IdGeneratorFactory, IndexProviderMap,
    IndexStatisticsStore, OperatingMode, PrimaryStore, TokenHolders,
};

use super::budget::{HostResources, MemoryLimiter, ScanBudget};
use super::checking::FullCheck;
use super::debug::DebugContext;
use super::error::{ConsistencyCheckIncomplete, Result};
use super::flags::ConsistencyFlags;
use super::managers::{CountsStoreManager, DegreesStoreManager};
use super::recovery::assert_recovered;
use super::report::{report_path, ReportPipeline};
use super::result::CheckResult;
use super::store_access::DirectStoreAccess;
use super::summary::ConsistencySummaryStatistics;

/// Everything about one check run besides the database and its config.
///
/// Defaults: no progress output, findings logged through `tracing`, a page
/// cache owned by the check, reports under the configured logs directory,
/// every check enabled, and the detected host resources.
#[derive(Clone)]
pub struct CheckOptions {
    progress: Arc<dyn ProgressMonitorFactory>,
    log: Arc<dyn Log>,
    page_cache: Option<Arc<PageCache>>,
    debug: DebugContext,
    report_dir: Option<PathBuf>,
    flags: ConsistencyFlags,
    memory: Option<Arc<MemoryTracker>>,
    host: Option<HostResources>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            progress: Arc::new(NoProgress),
            log: Arc::new(TracingLog),
            page_cache: None,
            debug: DebugContext::disabled(),
            report_dir: None,
            flags: ConsistencyFlags::default(),
            memory: None,
            host: None,
        }
    }
}

impl CheckOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress reporting for scan tasks.
    pub fn progress(mut self, progress: Arc<dyn ProgressMonitorFactory>) -> Self {
        self.progress = progress;
        self
    }

    /// Log receiving findings alongside the report file.
    pub fn log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    /// Reads through `cache`, which the caller keeps ownership of.
    pub fn page_cache(mut self, cache: Arc<PageCache>) -> Self {
        self.page_cache = Some(cache);
        self
    }

    /// Verbose scan output.
    pub fn debug(mut self, debug: DebugContext) -> Self {
        self.debug = debug;
        self
    }

    /// Directory receiving the report instead of the configured one.
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    /// Which checks run.
    pub fn flags(mut self, flags: ConsistencyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Tracker charged for scan working sets and log inspection.
    pub fn memory_tracker(mut self, memory: Arc<MemoryTracker>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Host resources to budget against instead of probing the machine.
    pub fn host_resources(mut self, host: HostResources) -> Self {
        self.host = Some(host);
        self
    }
}

/// Runs offline consistency checks.
///
/// The timestamp fixed at construction names the report file, so one service
/// reuses the same report name across runs.
#[derive(Clone, Copy, Debug)]
pub struct ConsistencyCheckService {
    timestamp: OffsetDateTime,
}

impl Default for ConsistencyCheckService {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistencyCheckService {
    /// Service stamped with the current time.
    pub fn new() -> Self {
        Self::with_timestamp(OffsetDateTime::now_utc())
    }

    /// Service stamped with `timestamp`.
    pub fn with_timestamp(timestamp: OffsetDateTime) -> Self {
        Self { timestamp }
    }

    /// Timestamp used in report names.
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    /// Checks `layout` with default options and verbose output to stdout
    /// when `verbose` is set.
    pub fn run_with_verbose(
        &self,
        layout: &DatabaseLayout,
        config: &CheckConfig,
        progress: Arc<dyn ProgressMonitorFactory>,
        log: Arc<dyn Log>,
        verbose: bool,
    ) -> Result<CheckResult> {
        let options = CheckOptions::new()
            .progress(progress)
            .log(log)
            .debug(DebugContext::verbose(verbose));
        self.run_full_consistency_check(layout, config, options)
    }

    /// Checks `layout`.
    ///
    /// Returns a failed [`CheckResult`] when inconsistencies were found and
    /// an error when the check could not complete, including when the store
    /// needs recovery first.
    pub fn run_full_consistency_check(
        &self,
        layout: &DatabaseLayout,
        config: &CheckConfig,
        options: CheckOptions,
    ) -> Result<CheckResult> {
        config.validate()?;
        if let Some(cache) = options.page_cache.clone() {
            return self.check_with_cache(layout, config, &options, &cache);
        }
        let cache = PageCache::new(config.page_cache_options(), Arc::new(PageCacheTracer::new()))?;
        let outcome = self.check_with_cache(layout, config, &options, &cache);
        if let Err(err) = cache.close() {
            warn!(error = %err, "consistency.page_cache.close_failed");
            options
                .log
                .error(&format!("Failure during shutdown of the page cache: {err}"));
        }
        outcome
    }

    fn check_with_cache(
        &self,
        layout: &DatabaseLayout,
        config: &CheckConfig,
        options: &CheckOptions,
        cache: &Arc<PageCache>,
    ) -> Result<CheckResult> {
        let memory = options
            .memory
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryTracker::unlimited()));
        assert_recovered(layout, &memory)?;

        let report_dir = options
            .report_dir
            .clone()
            .unwrap_or_else(|| config.logs_directory_for(layout));
        let pipeline = ReportPipeline::open(
            report_path(&report_dir, self.timestamp),
            Arc::clone(&options.log),
        );
        let host = options.host.unwrap_or_else(HostResources::detect);
        let budget = ScanBudget::compute(&host, config);
        info!(
            db = %layout.dir().display(),
            threads = budget.threads,
            memory_ceiling = budget.memory_ceiling,
            report = %pipeline.path().display(),
            "consistency.check.begin"
        );

        let outcome = self.run_check(layout, config, options, cache, &memory, &pipeline, budget);
        if let Err(err) = pipeline.close() {
            warn!(path = %pipeline.path().display(), error = %err, "consistency.report.close_failed");
        }
        let summary = outcome?;
        let snapshot = summary.snapshot();
        info!(
            db = %layout.dir().display(),
            consistent = snapshot.consistent,
            errors = snapshot.total_errors,
            warnings = snapshot.total_warnings,
            "consistency.check.finished"
        );
        let path = pipeline.path().to_path_buf();
        if summary.is_consistent() {
            Ok(CheckResult::success(path, snapshot))
        } else {
            pipeline.out().warn(&format!(
                "See '{}' for a detailed consistency report.",
                path.display()
            ));
            Ok(CheckResult::failure(path, snapshot))
        }
    }

    /// Assembles the lifecycle, runs the scan and tears everything down
    /// whether or not the scan succeeded.
    #[allow(clippy::too_many_arguments)]
    fn run_check(
        &self,
        layout: &DatabaseLayout,
        config: &CheckConfig,
        options: &CheckOptions,
        cache: &Arc<PageCache>,
        memory: &MemoryTracker,
        pipeline: &ReportPipeline,
        budget: ScanBudget,
    ) -> Result<ConsistencySummaryStatistics> {
        let log = pipeline.log();
        let mut life = LifeSupport::new(Arc::clone(&log));
        let outcome = assemble_and_scan(&mut life, layout, config, options, cache, memory, &log, budget);
        let failures = life.shutdown();
        if !failures.is_empty() {
            warn!(failures = failures.len(), "consistency.lifecycle.stop_failed");
        }
        outcome.map_err(ConsistencyCheckIncomplete::new)
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_and_scan(
    life: &mut LifeSupport,
    layout: &DatabaseLayout,
    config: &CheckConfig,
    options: &CheckOptions,
    cache: &Arc<PageCache>,
    memory: &MemoryTracker,
    log: &Arc<dyn Log>,
    budget: ScanBudget,
) -> crate::types::Result<ConsistencySummaryStatistics> {
    let scheduler = life.add(Arc::new(JobScheduler::new(budget.threads)))?;
    let extensions = life.add(Arc::new(instantiate_extensions(
        layout,
        cache,
        Arc::clone(log),
        OperatingMode::SingleTool,
    )))?;

    let primary = Arc::new(PrimaryStore::open(layout, cache)?);
    let outcome = (|| -> crate::types::Result<ConsistencySummaryStatistics> {
        let indexes = life.add(Arc::new(IndexProviderMap::new(
            extensions,
            layout,
            primary.indexes().to_vec(),
        )))?;
        let last_committed_tx = primary.last_committed_tx_id();
        let counts = life.add(Arc::new(CountsStoreManager::new(
            Arc::clone(cache),
            layout,
            last_committed_tx,
        )))?;
        let degrees = life.add(Arc::new(DegreesStoreManager::new(
            Arc::clone(cache),
            layout,
            last_committed_tx,
        )))?;
        let tokens = life.add(Arc::new(TokenHolders::new(Arc::clone(&primary))))?;
        life.start()?;
        let statistics = life.add(Arc::new(IndexStatisticsStore::new(Arc::clone(cache), layout)))?;

        let stores = DirectStoreAccess {
            primary: Arc::clone(&primary),
            indexes,
            tokens,
            statistics,
            ids: IdGeneratorFactory::read_only(primary.meta()),
        };
        let check = FullCheck::new(
            Arc::clone(&options.progress),
            scheduler,
            options.flags,
            options.debug.clone(),
            MemoryLimiter::new(budget, config.record_memory_bytes),
        );
        check.execute(cache, &stores, &counts, &degrees, cache.tracer(), memory, log)
    })();
    primary.close();
    outcome
}
