//! # Core Cache
//!
//! Provide the fixed-capacity cache on top of the entry table and the
//! frequency sketch: probing reads and writes, sampling W-TinyLFU
//! eviction, lazy TTL expiration, and statistics.
//!
//! ## Usage
//!
//! - Build with `Cache::new(Config { .. })`; invalid options normalize
//!   to defaults.
//! - `Cache` is a cheap clonable handle; clones share one instance and
//!   every operation is safe from any thread.
//! - The load path (`get_or_load` and the cancellable variant) lives in
//!   the loader module.
//!
//! ## Design Principles
//!
//! 1. **Caller-Thread Work**: Every operation runs synchronously on the
//!    caller; only the negative-cache sweeper is a background task.
//! 2. **Bounded Probing**: Linear probes stop at the probe cap, so
//!    adversarial collisions cannot turn one operation into a table scan.
//! 3. **Sampled Eviction**: Over-capacity writes evict the lowest
//!    sketch-estimate victim out of a small evenly spaced sample instead
//!    of scanning the table.
//! 4. **Lazy Expiration**: Readers that observe an expired entry
//!    tombstone it best-effort; nobody scans for expired entries.
//!
//! ## Structure Overview
//!
//! ```text
//! Cache (clonable handle)
//!   └── inner: Arc<CacheInner>
//!         ├── table: EntryTable          slot array + probing
//!         ├── sketch: FrequencySketch    admission frequencies
//!         ├── counters: CacheCounters    hits/misses/sets/... + size
//!         ├── inflight: DashMap          singleflight registry
//!         ├── negative: NegativeCache?   cached loader errors + sweeper
//!         └── clock: Arc<dyn TimeSource> TTL decisions
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use cachet_common::{
    CacheCounters, CachedClock, Config, EntryCallback, MetricsSink, StatsSnapshot, TimeSource,
    Value,
};

use crate::fingerprint::fingerprint;
use crate::loader::Flight;
use crate::negative::NegativeCache;
use crate::sketch::FrequencySketch;
use crate::table::{EntryTable, SlotState};

/// Eviction candidates sampled per over-capacity write.
const EVICTION_SAMPLES: usize = 5;

pub(crate) struct CacheInner {
    pub(crate) max_size: usize,
    ttl_nanos: i64,
    window_ratio: f64,
    pub(crate) table: EntryTable,
    pub(crate) sketch: FrequencySketch,
    pub(crate) counters: CacheCounters,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) negative: Option<NegativeCache>,
    pub(crate) inflight: DashMap<Arc<str>, Arc<Flight>, ahash::RandomState>,
    on_evict: Option<EntryCallback>,
    on_expire: Option<EntryCallback>,
    pub(crate) metrics: Option<Arc<dyn MetricsSink>>,
    /// Round-robin start for eviction sampling, so repeated evictions
    /// spread over the table.
    evict_cursor: AtomicUsize,
}

/// Concurrent fixed-capacity cache with W-TinyLFU eviction.
///
/// Cloning the handle is an `Arc` bump; all clones operate on the same
/// table. Dropping the last handle releases the table and stops the
/// background machinery.
#[derive(Clone)]
pub struct Cache {
    pub(crate) inner: Arc<CacheInner>,
}

impl Cache {
    /// Builds a cache from `config`, normalizing out-of-range options to
    /// their defaults.
    pub fn new(config: Config) -> Cache {
        let cfg = config.normalized();
        let clock: Arc<dyn TimeSource> = cfg
            .time_source
            .clone()
            .unwrap_or_else(|| Arc::new(CachedClock::new()));

        let ttl_nanos = duration_to_nanos(cfg.ttl);
        let negative_ttl_nanos = duration_to_nanos(cfg.negative_ttl);
        let negative = (negative_ttl_nanos > 0).then(|| {
            NegativeCache::start(negative_ttl_nanos, cfg.cleanup_interval, Arc::clone(&clock))
        });

        let table = EntryTable::new(cfg.max_size);
        debug!(
            max_size = cfg.max_size,
            slots = table.len(),
            ttl_nanos,
            negative_ttl_nanos,
            window_ratio = cfg.window_ratio,
            counter_bits = cfg.counter_bits,
            "cache constructed"
        );

        Cache {
            inner: Arc::new(CacheInner {
                max_size: cfg.max_size,
                ttl_nanos,
                window_ratio: cfg.window_ratio,
                sketch: FrequencySketch::new(cfg.max_size, cfg.counter_bits),
                table,
                counters: CacheCounters::new(),
                clock,
                negative,
                inflight: DashMap::with_hasher(ahash::RandomState::new()),
                on_evict: cfg.on_evict,
                on_expire: cfg.on_expire,
                metrics: cfg.metrics_sink,
                evict_cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Stores `value` under `key` with the default TTL.
    ///
    /// Returns `false` when no slot could be claimed within the probe
    /// window; the attempt already triggered an eviction, so a retry may
    /// succeed.
    pub fn set(&self, key: &str, value: Value) -> bool {
        self.set_inner(key, value, self.expire_at_from(self.inner.ttl_nanos))
    }

    /// Stores `value` under `key` with an entry-specific TTL overriding
    /// the default. A zero `ttl` stores without expiration.
    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> bool {
        self.set_inner(key, value, self.expire_at_from(duration_to_nanos(ttl)))
    }

    fn expire_at_from(&self, ttl_nanos: i64) -> i64 {
        if ttl_nanos > 0 {
            self.inner.clock.now() + ttl_nanos
        } else {
            0
        }
    }

    fn set_inner(&self, key: &str, value: Value, expire_at: i64) -> bool {
        let inner = &self.inner;
        let timer = inner.metrics.as_ref().map(|_| Instant::now());

        let fp = fingerprint(key);
        inner.sketch.bump(fp);

        let start = inner.table.probe_start(fp);
        let mut stored = false;
        for offset in 0..inner.table.probe_limit() {
            let slot = inner.table.slot(start.wrapping_add(offset));
            let state = slot.state();
            match state {
                SlotState::Empty | SlotState::Deleted => {
                    if slot.try_transition(state, SlotState::Valid) {
                        slot.publish(fp, Arc::from(key), value.clone(), expire_at);
                        inner.counters.entry_added();
                        inner.counters.record_set();
                        if inner.counters.size() > inner.max_size as i64 {
                            self.evict_one();
                        }
                        stored = true;
                        break;
                    }
                    // Lost the claim race; the slot is someone else's now.
                }
                SlotState::Valid if slot.fingerprint() == fp => {
                    if slot.try_update(fp, key, value.clone(), expire_at) {
                        inner.counters.record_set();
                        stored = true;
                        break;
                    }
                    // Fingerprint collision or the slot changed hands.
                }
                _ => {}
            }
        }

        if !stored {
            // Probe window exhausted: free a slot for the retry.
            self.evict_one();
        }

        if let (Some(sink), Some(started)) = (inner.metrics.as_deref(), timer) {
            sink.record_set(started.elapsed().as_nanos() as u64);
        }
        stored
    }

    /// Looks up `key`, returning the value of a live, unexpired entry.
    ///
    /// An expired entry observed here is tombstoned best-effort and
    /// reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = &self.inner;
        let timer = inner.metrics.as_ref().map(|_| Instant::now());

        let fp = fingerprint(key);
        inner.sketch.bump(fp);

        let start = inner.table.probe_start(fp);
        let mut found = None;
        for offset in 0..inner.table.probe_limit() {
            let slot = inner.table.slot(start.wrapping_add(offset));
            match slot.state() {
                // Insertion fills the first empty slot along the chain,
                // so an empty slot ends the probe.
                SlotState::Empty => break,
                SlotState::Valid if slot.fingerprint() == fp => {
                    let Some(snapshot) = slot.read() else { continue };
                    if snapshot.payload.key.as_ref() != key {
                        continue;
                    }
                    if snapshot.expire_at > 0 && inner.clock.now() > snapshot.expire_at {
                        // Lazy expiration: single CAS, no retry on failure.
                        if slot.try_transition(SlotState::Valid, SlotState::Deleted) {
                            slot.release_payload();
                            inner.counters.entry_removed();
                            if let Some(callback) = &inner.on_expire {
                                callback(&snapshot.payload.key, &snapshot.payload.value);
                            }
                        }
                        break;
                    }
                    found = Some(Arc::clone(&snapshot.payload.value));
                    break;
                }
                _ => {}
            }
        }

        if found.is_some() {
            inner.counters.record_hit();
        } else {
            inner.counters.record_miss();
        }
        if let (Some(sink), Some(started)) = (inner.metrics.as_deref(), timer) {
            sink.record_get(started.elapsed().as_nanos() as u64, found.is_some());
        }
        found
    }

    /// Whether `key` holds a live, unexpired entry.
    ///
    /// Read-only: touches neither the sketch, the counters, nor the slot
    /// states.
    pub fn has(&self, key: &str) -> bool {
        let inner = &self.inner;
        let fp = fingerprint(key);
        let start = inner.table.probe_start(fp);
        for offset in 0..inner.table.probe_limit() {
            let slot = inner.table.slot(start.wrapping_add(offset));
            match slot.state() {
                SlotState::Empty => return false,
                SlotState::Valid if slot.fingerprint() == fp => {
                    let Some(snapshot) = slot.read() else { continue };
                    if snapshot.payload.key.as_ref() != key {
                        continue;
                    }
                    return snapshot.expire_at == 0 || inner.clock.now() <= snapshot.expire_at;
                }
                _ => {}
            }
        }
        false
    }

    /// Removes `key`. Returns whether this call removed a live entry.
    pub fn delete(&self, key: &str) -> bool {
        let inner = &self.inner;
        let timer = inner.metrics.as_ref().map(|_| Instant::now());

        let fp = fingerprint(key);
        let start = inner.table.probe_start(fp);
        let mut deleted = false;
        for offset in 0..inner.table.probe_limit() {
            let slot = inner.table.slot(start.wrapping_add(offset));
            match slot.state() {
                SlotState::Empty => break,
                SlotState::Valid if slot.fingerprint() == fp => {
                    let Some(snapshot) = slot.read() else { continue };
                    if snapshot.payload.key.as_ref() != key {
                        continue;
                    }
                    if slot.try_transition(SlotState::Valid, SlotState::Deleted) {
                        slot.release_payload();
                        inner.counters.entry_removed();
                        inner.counters.record_delete();
                        deleted = true;
                    }
                    break;
                }
                _ => {}
            }
        }

        if let (Some(sink), Some(started)) = (inner.metrics.as_deref(), timer) {
            sink.record_delete(started.elapsed().as_nanos() as u64);
        }
        deleted
    }

    /// Empties the table, zeroes all counters, ages the sketch, and
    /// drains the negative cache. The cache stays fully usable.
    pub fn clear(&self) {
        for slot in self.inner.table.slots() {
            slot.reset();
        }
        self.inner.counters.reset();
        self.inner.sketch.reset();
        if let Some(negative) = &self.inner.negative {
            negative.clear();
        }
    }

    /// Clears the cache and stops the negative-cache sweeper.
    ///
    /// Operations after close keep working against the empty cache; only
    /// the background sweep is gone.
    pub fn close(&self) {
        self.clear();
        if let Some(negative) = &self.inner.negative {
            negative.stop();
        }
    }

    /// Point-in-time counter snapshot. Not globally consistent across
    /// counters under concurrency.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.counters.snapshot(self.inner.max_size as u64)
    }

    /// Number of currently cached loader errors.
    pub fn negative_len(&self) -> usize {
        self.inner.negative.as_ref().map_or(0, NegativeCache::len)
    }

    /// The configured W-TinyLFU window fraction hint.
    pub fn window_ratio(&self) -> f64 {
        self.inner.window_ratio
    }

    /// Evicts one victim: the lowest sketch estimate among a small
    /// evenly spaced sample of valid slots, with a linear scan as the
    /// fallback when the sample yields nothing claimable.
    pub(crate) fn evict_one(&self) -> bool {
        let inner = &self.inner;
        let len = inner.table.len();
        let step = (len / EVICTION_SAMPLES).max(1);
        let start = inner.evict_cursor.fetch_add(1, Ordering::Relaxed);

        let mut victim: Option<(usize, u64)> = None;
        for sample in 0..EVICTION_SAMPLES {
            let index = start.wrapping_add(sample * step);
            let slot = inner.table.slot(index);
            if slot.state() == SlotState::Valid {
                let estimate = inner.sketch.estimate(slot.fingerprint());
                if victim.map_or(true, |(_, best)| estimate < best) {
                    victim = Some((index, estimate));
                }
            }
        }

        if let Some((index, _)) = victim {
            if self.claim_eviction(index) {
                return true;
            }
        }

        trace!("eviction sample yielded no victim, scanning");
        for offset in 0..len {
            let index = start.wrapping_add(offset);
            if inner.table.slot(index).state() == SlotState::Valid && self.claim_eviction(index) {
                return true;
            }
        }
        false
    }

    fn claim_eviction(&self, index: usize) -> bool {
        let inner = &self.inner;
        let slot = inner.table.slot(index);
        // Read before the transition so the callback still has the pair.
        let snapshot = slot.read();
        if !slot.try_transition(SlotState::Valid, SlotState::Deleted) {
            return false;
        }
        slot.release_payload();
        inner.counters.entry_removed();
        inner.counters.record_eviction();
        if let Some(sink) = inner.metrics.as_deref() {
            sink.record_eviction();
        }
        if let (Some(callback), Some(snapshot)) = (&inner.on_evict, snapshot) {
            callback(&snapshot.payload.key, &snapshot.payload.value);
        }
        true
    }
}

fn duration_to_nanos(duration: Duration) -> i64 {
    duration.as_nanos().min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_common::{value_as, value_of, AggregateMetrics, ManualClock};
    use std::sync::atomic::AtomicUsize;

    fn small_cache(max_size: usize) -> Cache {
        Cache::new(Config {
            max_size,
            time_source: Some(Arc::new(ManualClock::new())),
            ..Config::default()
        })
    }

    #[test]
    fn set_get_roundtrip() {
        let cache = small_cache(8);
        assert!(cache.set("alpha", value_of("value".to_string())));
        let value = cache.get("alpha").expect("hit");
        assert_eq!(value_as::<String>(&value).map(String::as_str), Some("value"));
    }

    #[test]
    fn update_replaces_value_in_place() {
        let cache = small_cache(8);
        assert!(cache.set("alpha", value_of(1u32)));
        assert!(cache.set("alpha", value_of(2u32)));

        let value = cache.get("alpha").unwrap();
        assert_eq!(value_as::<u32>(&value), Some(&2));
        // One entry despite two sets.
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.stats().sets, 2);
    }

    #[test]
    fn delete_removes_key() {
        let cache = small_cache(8);
        assert!(cache.set("alpha", value_of(1u32)));
        assert!(cache.delete("alpha"));
        assert!(cache.get("alpha").is_none());
        assert!(!cache.delete("alpha"));
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn has_is_read_only() {
        let cache = small_cache(8);
        assert!(!cache.has("alpha"));
        cache.set("alpha", value_of(1u32));
        assert!(cache.has("alpha"));

        let before = cache.stats();
        cache.has("alpha");
        cache.has("missing");
        let after = cache.stats();
        assert_eq!(before.hits, after.hits);
        assert_eq!(before.misses, after.misses);
    }

    #[test]
    fn eviction_keeps_size_at_capacity() {
        let cache = small_cache(4);
        for i in 0..20 {
            let key = format!("k{i}");
            assert!(cache.set(&key, value_of(i)));
        }
        let stats = cache.stats();
        assert_eq!(stats.size, 4);
        assert_eq!(stats.evictions, 16);
    }

    #[test]
    fn expired_entries_are_tombstoned_on_read() {
        let clock = Arc::new(ManualClock::new());
        let expired: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&expired);
        let cache = Cache::new(Config {
            max_size: 8,
            ttl: Duration::from_secs(1),
            time_source: Some(Arc::clone(&clock) as Arc<dyn TimeSource>),
            on_expire: Some(Arc::new(move |key, _value| {
                assert_eq!(key, "alpha");
                seen.fetch_add(1, Ordering::Relaxed);
            })),
            ..Config::default()
        });

        cache.set("alpha", value_of(1u32));
        assert!(cache.get("alpha").is_some());

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("alpha").is_none());
        assert_eq!(cache.stats().size, 0);
        assert_eq!(expired.load(Ordering::Relaxed), 1);

        // The tombstone stays a miss, not a second expiration.
        assert!(cache.get("alpha").is_none());
        assert_eq!(expired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn per_entry_ttl_overrides_the_default() {
        let clock = Arc::new(ManualClock::new());
        let cache = Cache::new(Config {
            max_size: 8,
            ttl: Duration::from_secs(10),
            time_source: Some(Arc::clone(&clock) as Arc<dyn TimeSource>),
            ..Config::default()
        });

        cache.set("long", value_of(1u32));
        cache.set_with_ttl("short", value_of(2u32), Duration::from_secs(1));
        cache.set_with_ttl("forever", value_of(3u32), Duration::ZERO);

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("long").is_some());
        assert!(cache.get("short").is_none());
        assert!(cache.get("forever").is_some());

        clock.advance(Duration::from_secs(20));
        assert!(cache.get("long").is_none());
        assert!(cache.get("forever").is_some());
    }

    #[test]
    fn on_evict_receives_the_evicted_pair() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&evicted);
        let cache = Cache::new(Config {
            max_size: 2,
            time_source: Some(Arc::new(ManualClock::new())),
            on_evict: Some(Arc::new(move |key, value| {
                assert!(key.starts_with('k'));
                assert!(value_as::<usize>(value).is_some());
                seen.fetch_add(1, Ordering::Relaxed);
            })),
            ..Config::default()
        });

        for i in 0..6usize {
            cache.set(&format!("k{i}"), value_of(i));
        }
        assert_eq!(evicted.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn clear_resets_everything_but_stays_usable() {
        let cache = small_cache(8);
        cache.set("alpha", value_of(1u32));
        cache.get("alpha");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.sets, 0);
        assert!(cache.get("alpha").is_none());

        assert!(cache.set("beta", value_of(2u32)));
        assert!(cache.get("beta").is_some());
    }

    #[test]
    fn operations_degrade_gracefully_after_close() {
        let cache = small_cache(8);
        cache.set("alpha", value_of(1u32));
        cache.close();

        assert!(cache.get("alpha").is_none());
        assert!(cache.set("beta", value_of(2u32)));
        let value = cache.get("beta").unwrap();
        assert_eq!(value_as::<u32>(&value), Some(&2));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = small_cache(8);
        cache.set("alpha", value_of(1u32));
        cache.get("alpha");
        cache.get("alpha");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.capacity, 8);
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_sink_observes_operations() {
        let sink = Arc::new(AggregateMetrics::new());
        let cache = Cache::new(Config {
            max_size: 2,
            time_source: Some(Arc::new(ManualClock::new())),
            metrics_sink: Some(Arc::clone(&sink) as Arc<dyn MetricsSink>),
            ..Config::default()
        });

        cache.set("a", value_of(1u32));
        cache.set("b", value_of(2u32));
        cache.set("c", value_of(3u32)); // forces an eviction
        cache.get("a");
        cache.get("zzz");
        cache.delete("b");

        let report = sink.report();
        assert_eq!(report.sets, 3);
        assert_eq!(report.gets, 2);
        assert_eq!(report.evictions, 1);
        assert_eq!(report.deletes, 1);
    }

    #[test]
    fn invalid_options_normalize_at_construction() {
        let cache = Cache::new(Config {
            max_size: 0,
            window_ratio: 42.0,
            counter_bits: 99,
            time_source: Some(Arc::new(ManualClock::new())),
            ..Config::default()
        });
        assert_eq!(cache.stats().capacity, cachet_common::DEFAULT_MAX_SIZE as u64);
        assert_eq!(cache.window_ratio(), cachet_common::DEFAULT_WINDOW_RATIO);
    }
}
