//! Heap statistics.
//!
//! Tracks allocation counts and live memory for monitoring and tuning.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about heap activity.
#[derive(Debug)]
pub struct GcStats {
    /// Total bytes allocated since start.
    bytes_allocated: AtomicU64,
    /// Total cells allocated since start.
    objects_allocated: AtomicU64,
    /// Currently live cells.
    live_objects: AtomicU64,
    /// Allocations refused by the heap limit.
    failed_allocations: AtomicU64,
}

impl GcStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            bytes_allocated: AtomicU64::new(0),
            objects_allocated: AtomicU64::new(0),
            live_objects: AtomicU64::new(0),
            failed_allocations: AtomicU64::new(0),
        }
    }

    /// Record a successful allocation.
    #[inline]
    pub(crate) fn record_allocation(&self, bytes: usize) {
        self.bytes_allocated
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
        self.live_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cell's death.
    #[inline]
    pub(crate) fn record_free(&self, _bytes: usize) {
        self.live_objects.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an allocation refused by the limit.
    #[inline]
    pub(crate) fn record_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes ever allocated.
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Total cells ever allocated.
    pub fn objects_allocated(&self) -> u64 {
        self.objects_allocated.load(Ordering::Relaxed)
    }

    /// Currently live cells.
    pub fn live_objects(&self) -> u64 {
        self.live_objects.load(Ordering::Relaxed)
    }

    /// Allocations refused by the heap limit.
    pub fn failed_allocations(&self) -> u64 {
        self.failed_allocations.load(Ordering::Relaxed)
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let stats = GcStats::new();
        stats.record_allocation(100);
        stats.record_allocation(50);
        stats.record_free(100);
        stats.record_failure();

        assert_eq!(stats.bytes_allocated(), 150);
        assert_eq!(stats.objects_allocated(), 2);
        assert_eq!(stats.live_objects(), 1);
        assert_eq!(stats.failed_allocations(), 1);
    }
}
