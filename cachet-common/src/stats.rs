//! # Cache Statistics
//!
//! Lightweight atomic counters for the six cache events plus the live
//! size gauge, exposed as plain snapshots.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Relaxed `AtomicU64` counters keep record
//!    calls cheap; no cross-counter consistency is promised.
//! 2. **Signed Gauge**: The live-size gauge is signed so concurrent
//!    add/remove races can transiently drift without wrapping; snapshots
//!    clamp at zero.
//! 3. **Zero-Cost Snapshots**: A snapshot is seven atomic loads into a
//!    plain struct.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of cache counters.
///
/// The snapshot is not globally consistent: each field is an independent
/// atomic load and concurrent operations may land between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Live entry count; may transiently exceed `capacity` while
    /// eviction catches up.
    pub size: u64,
    /// Configured maximum entry count.
    pub capacity: u64,
}

impl StatsSnapshot {
    /// Fraction of gets that hit, or 0.0 before any get.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared atomic counter block for one cache instance.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    size: AtomicI64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts a newly claimed slot.
    pub fn entry_added(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts a deleted, evicted, or expired slot.
    pub fn entry_removed(&self) {
        self.size.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current live-size gauge reading (may be stale under contention).
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Zeroes every counter. Used by Clear.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);
    }

    /// Snapshot of all counters with the configured capacity attached.
    pub fn snapshot(&self, capacity: u64) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed).max(0) as u64,
            capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_set();
        counters.entry_added();

        let snap = counters.snapshot(128);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.sets, 1);
        assert_eq!(snap.size, 1);
        assert_eq!(snap.capacity, 128);
        assert!((snap.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn size_gauge_clamps_below_zero() {
        let counters = CacheCounters::new();
        counters.entry_removed();
        assert_eq!(counters.size(), -1);
        assert_eq!(counters.snapshot(16).size, 0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.entry_added();
        counters.reset();
        assert_eq!(counters.snapshot(8), StatsSnapshot { capacity: 8, ..Default::default() });
    }

    #[test]
    fn snapshot_serializes_for_exporters() {
        let counters = CacheCounters::new();
        counters.record_hit();
        let json = serde_json::to_string(&counters.snapshot(4)).unwrap();
        assert!(json.contains("\"hits\":1"));
        assert!(json.contains("\"capacity\":4"));
    }
}
