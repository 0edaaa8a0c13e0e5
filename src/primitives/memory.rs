#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Result, SombraError};

/// Accounts heap reserved by scan work.
///
/// An unlimited tracker only records usage; a limited one refuses
/// reservations that would push usage past its limit.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    limit: Option<u64>,
    used: AtomicU64,
    peak: AtomicU64,
}

impl MemoryTracker {
    /// Tracker that records usage without enforcing a limit.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Tracker refusing reservations above `limit` bytes.
    pub fn limited(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Reserves `bytes`, returning a guard that releases them when dropped.
    pub fn reserve(&self, bytes: u64) -> Result<MemoryReservation<'_>> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(SombraError::Invalid(format!(
                        "memory reservation of {bytes} bytes exceeds limit {limit} ({current} in use)"
                    )));
                }
            }
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::AcqRel);
                    return Ok(MemoryReservation {
                        tracker: self,
                        bytes,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Highest reservation total observed.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Configured limit, if any.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

/// Releases its bytes back to the tracker on drop.
#[must_use]
pub struct MemoryReservation<'a> {
    tracker: &'a MemoryTracker,
    bytes: u64,
}

impl Drop for MemoryReservation<'_> {
    fn drop(&mut self) {
        self.tracker.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_release_on_drop() {
        let tracker = MemoryTracker::unlimited();
        {
            let _a = tracker.reserve(100).unwrap();
            let _b = tracker.reserve(50).unwrap();
            assert_eq!(tracker.used(), 150);
        }
        assert_eq!(tracker.used(), 0);
        assert_eq!(tracker.peak(), 150);
    }

    #[test]
    fn limited_tracker_rejects_overflow() {
        let tracker = MemoryTracker::limited(64);
        let held = tracker.reserve(60).unwrap();
        assert!(tracker.reserve(8).is_err());
        drop(held);
        assert!(tracker.reserve(64).is_ok());
    }
}
