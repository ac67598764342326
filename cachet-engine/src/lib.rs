//! # Cachet Engine
//!
//! In-process, fixed-capacity concurrent cache with W-TinyLFU admission:
//! a lock-free slot table with linear probing, a Count-Min frequency
//! sketch driving sampled eviction, optional per-entry TTL, and a
//! singleflight loader with panic isolation, cancellation, and negative
//! caching of loader errors.
//!
//! ```no_run
//! use cachet_engine::{value_as, value_of, Cache, Config};
//!
//! let cache = Cache::new(Config::with_max_size(1024));
//! cache.set("greeting", value_of("hello".to_string()));
//!
//! let value = cache
//!     .get_or_load("answer", || Ok(Some(value_of(42u32))))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(value_as::<u32>(&value), Some(&42));
//! ```

pub mod cache;
pub mod fingerprint;
mod loader;
mod negative;
pub mod sketch;
pub mod table;

pub use cache::Cache;
pub use fingerprint::fingerprint;
pub use sketch::FrequencySketch;

// Re-export the shared types so callers depend on one crate.
pub use cachet_common::{
    value_as, value_of, CacheError, CacheResult, CachedClock, CancelToken, Config, ErrorCategory,
    LoaderError, ManualClock, MetricsSink, MonotonicClock, NoopMetrics, Severity, StatsSnapshot,
    TimeSource, Value,
};
