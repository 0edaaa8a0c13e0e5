#![forbid(unsafe_code)]

//! The full scan: every record, chain, derived store and index, checked
//! read-only on the check's worker pool.

mod auxiliary;
mod graph;
mod indexes;
mod reporter;

use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::logging::Log;
use crate::primitives::concurrency::JobScheduler;
use crate::primitives::memory::MemoryTracker;
use crate::primitives::pager::{PageCache, PageCacheTracer};
use crate::progress::ProgressMonitorFactory;
use crate::storage::{IdType, PrimaryStore, TokenSet};
use crate::types::{Result, SombraError};

use super::budget::MemoryLimiter;
use super::debug::DebugContext;
use super::flags::ConsistencyFlags;
use super::managers::{CountsStoreManager, DegreesStoreManager};
use super::store_access::DirectStoreAccess;
use super::summary::{ConsistencySummaryStatistics, InconsistencyCategory};

use self::graph::{GraphScan, GraphTally};
use self::indexes::{OnlineIndexes, ReverseIndexScan};
use self::reporter::Reporter;

/// Multi-threaded consistency scan over one database.
///
/// Findings in the data are counted into the returned summary; only
/// environmental failures (I/O, a closed cache, an exhausted memory budget)
/// end the scan with an error.
pub struct FullCheck {
    progress: Arc<dyn ProgressMonitorFactory>,
    scheduler: Arc<JobScheduler>,
    flags: ConsistencyFlags,
    debug: DebugContext,
    limiter: MemoryLimiter,
}

impl FullCheck {
    /// Scan running on `scheduler`, partitioned by `limiter`.
    pub fn new(
        progress: Arc<dyn ProgressMonitorFactory>,
        scheduler: Arc<JobScheduler>,
        flags: ConsistencyFlags,
        debug: DebugContext,
        limiter: MemoryLimiter,
    ) -> Self {
        Self {
            progress,
            scheduler,
            flags,
            debug,
            limiter,
        }
    }

    /// Runs every enabled check and returns the tallies.
    ///
    /// The counts and degrees stores are opened through their managers at
    /// most once each, and only when the graph is checked.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        cache: &Arc<PageCache>,
        stores: &DirectStoreAccess,
        counts: &CountsStoreManager,
        degrees: &DegreesStoreManager,
        tracer: &PageCacheTracer,
        memory: &MemoryTracker,
        log: &Arc<dyn Log>,
    ) -> Result<ConsistencySummaryStatistics> {
        if cache.is_closed() {
            return Err(SombraError::Unavailable("page cache is closed".into()));
        }
        let summary = ConsistencySummaryStatistics::new();
        let reporter = Reporter::new(&summary, log.as_ref());
        let primary = stores.primary.as_ref();
        let tokens = stores.tokens.tokens()?;
        self.debug.debug(|| {
            format!(
                "Checking {} node and {} edge slots with {} threads, {} bytes per thread",
                primary.node_slots(),
                primary.edge_slots(),
                self.scheduler.threads(),
                self.limiter.per_thread_share()
            )
        });

        self.check_tokens(primary, &tokens, &reporter);
        self.check_id_generators(stores, &reporter);
        if self.flags.check_graph {
            self.check_graph(stores, &tokens, counts, degrees, memory, &reporter)?;
        }
        self.check_indexes(stores, &tokens, memory, &reporter)?;

        let stats = tracer.snapshot();
        debug!(
            hits = stats.hits,
            faults = stats.faults,
            evictions = stats.evictions,
            bytes_read = stats.bytes_read,
            peak_memory = memory.peak(),
            errors = summary.total_errors(),
            warnings = summary.total_warnings(),
            "consistency.scan.finished"
        );
        self.debug.debug(|| summary.to_string());
        Ok(summary)
    }

    /// Splits `0..total` with the limiter and scans the ranges on the pool,
    /// holding each range's estimated working set against `memory`.
    fn scan_ranges<T, F>(
        &self,
        task: &str,
        total: u64,
        memory: &MemoryTracker,
        scan: F,
    ) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Range<u64>) -> Result<T> + Sync,
    {
        let ranges = self.limiter.ranges(total);
        self.debug
            .debug(|| format!("{task}: {total} records in {} ranges", ranges.len()));
        let listener = self.progress.task(task, total);
        let results = self.scheduler.install(|| {
            ranges
                .par_iter()
                .map(|range| -> Result<T> {
                    let _reservation = memory.reserve(self.limiter.range_cost(range))?;
                    let result = scan(range.clone())?;
                    listener.add(range.end - range.start);
                    Ok(result)
                })
                .collect::<Result<Vec<T>>>()
        })??;
        listener.done();
        Ok(results)
    }

    fn check_tokens(&self, primary: &PrimaryStore, tokens: &TokenSet, reporter: &Reporter<'_>) {
        for duplicate in tokens.duplicates() {
            reporter.error(InconsistencyCategory::Token, duplicate);
        }
        for index in primary.indexes() {
            if !tokens.labels().contains(index.label) {
                reporter.error(
                    InconsistencyCategory::Token,
                    format!("index {} refers to unknown label {}", index.id, index.label),
                );
            }
            if !tokens.property_keys().contains(index.property_key) {
                reporter.error(
                    InconsistencyCategory::Token,
                    format!(
                        "index {} refers to unknown property key {}",
                        index.id, index.property_key
                    ),
                );
            }
        }
    }

    fn check_id_generators(&self, stores: &DirectStoreAccess, reporter: &Reporter<'_>) {
        let primary = &stores.primary;
        let stores_by_type = [
            (
                IdType::Node,
                primary.node_slots(),
                primary.node_store_tail(),
                InconsistencyCategory::Node,
            ),
            (
                IdType::Edge,
                primary.edge_slots(),
                primary.edge_store_tail(),
                InconsistencyCategory::Edge,
            ),
        ];
        for (id_type, slots, tail, category) in stores_by_type {
            let high_id = stores.ids.high_id(id_type);
            if slots < high_id {
                reporter.error(
                    InconsistencyCategory::IdGenerator,
                    format!("{id_type} store holds {slots} records but its high id is {high_id}"),
                );
            }
            if tail != 0 {
                reporter.error(
                    category,
                    format!("{id_type} store ends with a partial record of {tail} bytes"),
                );
            }
        }
    }

    fn check_graph(
        &self,
        stores: &DirectStoreAccess,
        tokens: &TokenSet,
        counts: &CountsStoreManager,
        degrees: &DegreesStoreManager,
        memory: &MemoryTracker,
        reporter: &Reporter<'_>,
    ) -> Result<()> {
        let primary = stores.primary.as_ref();
        let scan = GraphScan {
            primary,
            tokens,
            node_high_id: stores.ids.high_id(IdType::Node),
            edge_high_id: stores.ids.high_id(IdType::Edge),
            check_property_keys: self.flags.check_property_keys,
            reporter,
        };
        let nodes = self.scan_ranges("Checking nodes", primary.node_slots(), memory, |range| {
            scan.nodes(range)
        })?;
        let edges = self.scan_ranges("Checking edges", primary.edge_slots(), memory, |range| {
            scan.edges(range)
        })?;
        let tally = nodes
            .into_iter()
            .chain(edges)
            .fold(GraphTally::baseline(), GraphTally::merge);
        if tally.chain_entries != tally.endpoint_entries {
            reporter.error(
                InconsistencyCategory::Adjacency,
                format!(
                    "edge chains reach {} edge entries but in-use edges have {} endpoints",
                    tally.chain_entries, tally.endpoint_entries
                ),
            );
        }

        let listener = self.progress.task("Checking counts", 2);
        auxiliary::check_counts(counts, &tally.counts, reporter)?;
        listener.add(1);
        auxiliary::check_degrees(degrees, &tally.degrees, reporter)?;
        listener.add(1);
        listener.done();
        Ok(())
    }

    fn check_indexes(
        &self,
        stores: &DirectStoreAccess,
        tokens: &TokenSet,
        memory: &MemoryTracker,
        reporter: &Reporter<'_>,
    ) -> Result<()> {
        let flags = self.flags;
        if !(flags.check_label_index || flags.check_indexes || flags.check_index_structure) {
            return Ok(());
        }
        let primary = stores.primary.as_ref();
        let online = OnlineIndexes::resolve(
            &stores.indexes,
            flags.check_label_index || flags.check_index_structure,
            flags.check_indexes || flags.check_index_structure,
            reporter,
        )?;

        let label = online.label.as_deref().filter(|_| flags.check_label_index);
        let properties: Vec<_> = if flags.check_indexes {
            online
                .properties
                .iter()
                .map(|(descriptor, reader)| (descriptor, reader.as_ref()))
                .collect()
        } else {
            Vec::new()
        };
        if let Some(reader) = label {
            indexes::check_label_entries(reader, primary, tokens, reporter)?;
        }
        for (descriptor, reader) in &properties {
            indexes::check_property_entries(descriptor, reader, primary, reporter)?;
        }
        if label.is_some() || !properties.is_empty() {
            let reverse = ReverseIndexScan {
                primary,
                label,
                properties,
                reporter,
            };
            self.scan_ranges("Checking indexes", primary.node_slots(), memory, |range| {
                reverse.nodes(range)
            })?;
        }

        if flags.check_index_structure {
            let listener = self.progress.task("Checking index structure", 1);
            let statistics = stores.statistics.state()?;
            indexes::check_structure(&online, &statistics, reporter)?;
            listener.add(1);
            listener.done();
        }
        Ok(())
    }
}
