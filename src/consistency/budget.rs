#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::ops::Range;

use serde::Serialize;
use sysinfo::System;

use crate::config::CheckConfig;

/// Worker count the check uses when none is configured: the host's
/// available parallelism, or 1 if that cannot be determined.
pub fn default_consistency_check_threads_number() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// CPU and memory of the machine running the check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HostResources {
    /// Logical processors available to this process.
    pub available_processors: usize,
    /// Memory in bytes the host can hand out without swapping, not the
    /// installed total.
    pub available_memory: u64,
}

impl HostResources {
    /// Probes the current host.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            available_processors: default_consistency_check_threads_number(),
            available_memory: sys.available_memory(),
        }
    }
}

/// Thread count and memory ceiling handed to the scan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScanBudget {
    /// Worker threads.
    pub threads: usize,
    /// Bytes of scan working set the check may plan for.
    pub memory_ceiling: u64,
    /// Fraction of host memory the ceiling was derived from.
    pub leeway_factor: f64,
}

impl ScanBudget {
    /// Budget for `host` under `config`. Config must already be validated.
    pub fn compute(host: &HostResources, config: &CheckConfig) -> Self {
        let threads = config
            .scan_threads
            .unwrap_or(host.available_processors)
            .max(1);
        let leeway = config.memory_limit_leeway_factor;
        let memory_ceiling = (host.available_memory as f64 * leeway).floor() as u64;
        Self {
            threads,
            memory_ceiling,
            leeway_factor: leeway,
        }
    }

    /// Ceiling divided evenly between workers.
    pub fn per_thread_share(&self) -> u64 {
        self.memory_ceiling / self.threads as u64
    }
}

/// Splits a record id space into ranges whose estimated working set fits in
/// one worker's share of the budget.
#[derive(Clone, Debug)]
pub struct MemoryLimiter {
    budget: ScanBudget,
    record_bytes: u64,
}

impl MemoryLimiter {
    /// Limiter for records costing `record_bytes` each.
    pub fn new(budget: ScanBudget, record_bytes: u64) -> Self {
        Self {
            budget,
            record_bytes: record_bytes.max(1),
        }
    }

    /// Budget the limiter partitions against.
    pub fn budget(&self) -> &ScanBudget {
        &self.budget
    }

    /// Bytes one worker may hold.
    pub fn per_thread_share(&self) -> u64 {
        self.budget.per_thread_share()
    }

    /// Largest range that fits a worker's share, never less than one record.
    pub fn max_records_per_range(&self) -> u64 {
        (self.per_thread_share() / self.record_bytes).max(1)
    }

    /// Estimated working set of `range`.
    pub fn range_cost(&self, range: &Range<u64>) -> u64 {
        (range.end - range.start).saturating_mul(self.record_bytes)
    }

    /// Contiguous ranges covering `0..total_records`.
    ///
    /// Ranges are no larger than [`max_records_per_range`](Self::max_records_per_range)
    /// and small enough that every worker receives one when there is work.
    pub fn ranges(&self, total_records: u64) -> Vec<Range<u64>> {
        if total_records == 0 {
            return Vec::new();
        }
        let threads = self.budget.threads as u64;
        let even_split = total_records.div_ceil(threads);
        let step = even_split.min(self.max_records_per_range()).max(1);
        let mut ranges = Vec::with_capacity(total_records.div_ceil(step) as usize);
        let mut start = 0;
        while start < total_records {
            let end = start.saturating_add(step).min(total_records);
            ranges.push(start..end);
            start = end;
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn host(processors: usize, memory: u64) -> HostResources {
        HostResources {
            available_processors: processors,
            available_memory: memory,
        }
    }

    #[test]
    fn detected_memory_is_what_is_available() {
        let detected = HostResources::detect();
        let mut sys = System::new();
        sys.refresh_memory();
        assert!(detected.available_memory <= sys.total_memory());
        let budget = ScanBudget::compute(&detected, &CheckConfig::default());
        assert!(budget.memory_ceiling <= detected.available_memory);
    }

    #[test]
    fn threads_default_to_host_parallelism() {
        let budget = ScanBudget::compute(&host(6, 1_000), &CheckConfig::default());
        assert_eq!(budget.threads, 6);
        assert_eq!(budget.memory_ceiling, 900);
        assert_eq!(budget.per_thread_share(), 150);
    }

    #[test]
    fn configured_threads_override_host() {
        let config = CheckConfig {
            scan_threads: Some(2),
            memory_limit_leeway_factor: 0.5,
            ..CheckConfig::default()
        };
        let budget = ScanBudget::compute(&host(16, 1_000), &config);
        assert_eq!(budget.threads, 2);
        assert_eq!(budget.memory_ceiling, 500);
    }

    #[test]
    fn tiny_budget_still_makes_progress() {
        let budget = ScanBudget::compute(&host(4, 10), &CheckConfig::default());
        let limiter = MemoryLimiter::new(budget, 64);
        assert_eq!(limiter.max_records_per_range(), 1);
        assert_eq!(limiter.ranges(5).len(), 5);
    }

    #[test]
    fn empty_store_has_no_ranges() {
        let budget = ScanBudget::compute(&host(4, 1 << 30), &CheckConfig::default());
        assert!(MemoryLimiter::new(budget, 64).ranges(0).is_empty());
    }

    proptest! {
        #[test]
        fn ranges_cover_all_records_within_share(
            threads in 1usize..16,
            memory in 1u64..(1 << 24),
            record_bytes in 1u64..512,
            total in 0u64..20_000,
        ) {
            let config = CheckConfig { scan_threads: Some(threads), ..CheckConfig::default() };
            let budget = ScanBudget::compute(&host(threads, memory), &config);
            let limiter = MemoryLimiter::new(budget, record_bytes);
            let ranges = limiter.ranges(total);
            let mut next = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                prop_assert!(range.end > range.start);
                prop_assert!(range.end - range.start <= limiter.max_records_per_range());
                if limiter.max_records_per_range() > 1 {
                    prop_assert!(limiter.range_cost(range) <= limiter.per_thread_share());
                }
                next = range.end;
            }
            prop_assert_eq!(next, total);
        }
    }
}
