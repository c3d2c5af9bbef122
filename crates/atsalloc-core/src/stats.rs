//! Allocation statistics.
//!
//! The counter block is one aggregate behind one `parking_lot::Mutex`. Peak
//! tracking is derived from `bytes_in_use` inside the same critical section, so
//! every snapshot satisfies `peak_bytes_in_use >= bytes_in_use`.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of the allocator counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Number of allocation attempts, successful or not.
    pub num_allocs: u64,
    /// Bytes currently handed out and not yet freed.
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use` since construction or the last clear.
    pub peak_bytes_in_use: usize,
    /// Largest single request seen.
    pub largest_alloc_size: usize,
    /// Configured ceiling. Informational only.
    pub bytes_limit: Option<usize>,
}

impl AllocatorStats {
    /// Named counters, in a stable order. An unset limit reads as 0.
    #[must_use]
    pub fn counters(&self) -> [(&'static str, u64); 5] {
        [
            ("num_allocs", self.num_allocs),
            ("bytes_in_use", self.bytes_in_use as u64),
            ("peak_bytes_in_use", self.peak_bytes_in_use as u64),
            ("largest_alloc_size", self.largest_alloc_size as u64),
            ("bytes_limit", self.bytes_limit.unwrap_or(0) as u64),
        ]
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Limit: {} InUse: {} MaxInUse: {} NumAllocs: {} MaxAllocSize: {}",
            self.bytes_limit.unwrap_or(0),
            self.bytes_in_use,
            self.peak_bytes_in_use,
            self.num_allocs,
            self.largest_alloc_size
        )
    }
}

/// Lock-protected counter block.
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<AllocatorStats>,
}

impl StatsTracker {
    #[must_use]
    pub fn new(bytes_limit: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(AllocatorStats {
                bytes_limit,
                ..AllocatorStats::default()
            }),
        }
    }

    /// Account for one allocation attempt.
    ///
    /// `num_allocs` and `largest_alloc_size` move on every attempt; bytes are
    /// only charged when a backend actually serviced the request.
    pub fn record_allocation(&self, num_bytes: usize, serviced: bool) {
        let mut stats = self.inner.lock();
        stats.num_allocs += 1;
        if serviced {
            stats.bytes_in_use = stats.bytes_in_use.saturating_add(num_bytes);
        }
        stats.peak_bytes_in_use = stats.peak_bytes_in_use.max(stats.bytes_in_use);
        stats.largest_alloc_size = stats.largest_alloc_size.max(num_bytes);
    }

    /// Release `num_bytes` previously charged by [`record_allocation`](Self::record_allocation).
    pub fn record_deallocation(&self, num_bytes: usize) {
        let mut stats = self.inner.lock();
        match stats.bytes_in_use.checked_sub(num_bytes) {
            Some(next) => stats.bytes_in_use = next,
            None => {
                let in_use = stats.bytes_in_use;
                stats.bytes_in_use = 0;
                drop(stats);
                tracing::error!(
                    num_bytes,
                    bytes_in_use = in_use,
                    "bytes_in_use underflow on deallocation; clamped to zero"
                );
            }
        }
    }

    /// Consistent copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> AllocatorStats {
        *self.inner.lock()
    }

    /// Reset per-interval counters. Peak restarts from the current usage, not zero.
    pub fn clear(&self) {
        let mut stats = self.inner.lock();
        stats.num_allocs = 0;
        stats.largest_alloc_size = 0;
        stats.peak_bytes_in_use = stats.bytes_in_use;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_attempts_count_but_do_not_charge_bytes() {
        let tracker = StatsTracker::new(None);
        tracker.record_allocation(4096, false);

        let stats = tracker.snapshot();
        assert_eq!(stats.num_allocs, 1);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.peak_bytes_in_use, 0);
        assert_eq!(stats.largest_alloc_size, 4096);
    }

    #[test]
    fn peak_survives_deallocation() {
        let tracker = StatsTracker::new(None);
        tracker.record_allocation(100, true);
        tracker.record_allocation(300, true);
        tracker.record_deallocation(300);

        let stats = tracker.snapshot();
        assert_eq!(stats.bytes_in_use, 100);
        assert_eq!(stats.peak_bytes_in_use, 400);
        assert_eq!(stats.largest_alloc_size, 300);
    }

    #[test]
    fn clear_restarts_peak_from_current_usage() {
        let tracker = StatsTracker::new(Some(1 << 20));
        tracker.record_allocation(512, true);
        tracker.record_allocation(2048, true);
        tracker.record_deallocation(2048);
        tracker.clear();

        let stats = tracker.snapshot();
        assert_eq!(stats.num_allocs, 0);
        assert_eq!(stats.largest_alloc_size, 0);
        assert_eq!(stats.bytes_in_use, 512);
        assert_eq!(stats.peak_bytes_in_use, 512);
        assert_eq!(stats.bytes_limit, Some(1 << 20));
    }

    #[test]
    fn underflow_clamps_to_zero() {
        let tracker = StatsTracker::new(None);
        tracker.record_allocation(10, true);
        tracker.record_deallocation(25);
        assert_eq!(tracker.snapshot().bytes_in_use, 0);
        assert_eq!(tracker.snapshot().peak_bytes_in_use, 10);
    }

    #[test]
    fn counters_expose_named_fields() {
        let stats = AllocatorStats {
            num_allocs: 3,
            bytes_in_use: 7,
            peak_bytes_in_use: 9,
            largest_alloc_size: 5,
            bytes_limit: None,
        };
        let counters = stats.counters();
        assert_eq!(counters[0], ("num_allocs", 3));
        assert_eq!(counters[2], ("peak_bytes_in_use", 9));
        assert_eq!(counters[4], ("bytes_limit", 0));
        assert_eq!(
            stats.to_string(),
            "Limit: 0 InUse: 7 MaxInUse: 9 NumAllocs: 3 MaxAllocSize: 5"
        );
    }
}
