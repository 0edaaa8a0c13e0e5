#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::lifecycle::Lifecycle;
use crate::types::{Result, SombraError};

/// Fixed-size worker pool owned by the check's lifecycle.
///
/// The pool exists only between `start` and `stop`; scan work submitted
/// outside that window is rejected.
pub struct JobScheduler {
    threads: usize,
    pool: RwLock<Option<Arc<ThreadPool>>>,
}

impl JobScheduler {
    /// Creates a scheduler that will run `threads` workers once started.
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            pool: RwLock::new(None),
        }
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Returns true while the worker pool is running.
    pub fn is_running(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Runs `op` inside the worker pool so that rayon parallel iterators in
    /// `op` use exactly this pool's threads.
    pub fn install<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let pool = self
            .pool
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SombraError::Unavailable("job scheduler is not running".into()))?;
        Ok(pool.install(op))
    }
}

impl Lifecycle for JobScheduler {
    fn name(&self) -> &str {
        "job-scheduler"
    }

    fn start(&self) -> Result<()> {
        let mut slot = self.pool.write();
        if slot.is_some() {
            return Ok(());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("consistency-check-{index}"))
            .build()
            .map_err(|err| SombraError::Invalid(format!("failed to build worker pool: {err}")))?;
        debug!(threads = self.threads, "scheduler.started");
        *slot = Some(Arc::new(pool));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if self.pool.write().take().is_some() {
            debug!(threads = self.threads, "scheduler.stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn install_requires_running_pool() {
        let scheduler = JobScheduler::new(2);
        assert!(scheduler.install(|| 1).is_err());
        scheduler.start().unwrap();
        let sum: u64 = scheduler
            .install(|| (1..=100u64).into_par_iter().sum())
            .unwrap();
        assert_eq!(sum, 5050);
        assert_eq!(
            scheduler.install(rayon::current_num_threads).unwrap(),
            2
        );
        scheduler.stop().unwrap();
        assert!(!scheduler.is_running());
        assert!(scheduler.install(|| 1).is_err());
    }

    #[test]
    fn zero_threads_is_clamped() {
        assert_eq!(JobScheduler::new(0).threads(), 1);
    }
}
