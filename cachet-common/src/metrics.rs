//! # Metrics Sink
//!
//! Purpose: Let operators observe cache behavior without coupling the
//! engine to any exporter. The engine calls a four-method observer;
//! adapters translate to whatever backend they serve.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: The provided sink aggregates with relaxed
//!    atomics; record calls are zero-allocation.
//! 2. **Zero-Cost Default**: Callers that configure no sink pay neither
//!    the dispatch nor the latency sampling.
//! 3. **Snapshot Reads**: Aggregated values are exposed as a plain
//!    struct, loaded counter by counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observer for cache operation outcomes and latencies.
///
/// Implementations must be non-blocking; they run inline on the caller's
/// thread inside every recorded operation.
pub trait MetricsSink: Send + Sync {
    fn record_get(&self, latency_ns: u64, hit: bool);
    fn record_set(&self, latency_ns: u64);
    fn record_delete(&self, latency_ns: u64);
    fn record_eviction(&self);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_get(&self, _latency_ns: u64, _hit: bool) {}
    fn record_set(&self, _latency_ns: u64) {}
    fn record_delete(&self, _latency_ns: u64) {}
    fn record_eviction(&self) {}
}

/// Point-in-time view of an [`AggregateMetrics`] sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsReport {
    pub gets: u64,
    pub hits: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Summed latencies in nanoseconds, per operation family.
    pub get_latency_ns: u64,
    pub set_latency_ns: u64,
    pub delete_latency_ns: u64,
}

/// Counting sink backed by relaxed atomics.
///
/// Relaxed ordering is sufficient: no cross-counter consistency is
/// promised, only eventual totals.
#[derive(Debug, Default)]
pub struct AggregateMetrics {
    gets: AtomicU64,
    hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    get_latency_ns: AtomicU64,
    set_latency_ns: AtomicU64,
    delete_latency_ns: AtomicU64,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every counter into a plain report.
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            get_latency_ns: self.get_latency_ns.load(Ordering::Relaxed),
            set_latency_ns: self.set_latency_ns.load(Ordering::Relaxed),
            delete_latency_ns: self.delete_latency_ns.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for AggregateMetrics {
    fn record_get(&self, latency_ns: u64, hit: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.get_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    fn record_set(&self, latency_ns: u64) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.set_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    fn record_delete(&self, latency_ns: u64) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.delete_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}
