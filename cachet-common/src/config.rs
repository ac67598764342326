//! # Cache Configuration
//!
//! Purpose: One plain record holding every construction option, with
//! normalization instead of rejection; an invalid option falls back to
//! its default so a cache can always be built.
//!
//! ## Design Principles
//! 1. **Plain Struct**: Public documented fields, no builder ceremony.
//! 2. **Normalize, Don't Reject**: Construction never fails; callers
//!    that prefer strictness run `validate` first.
//! 3. **Injection Points**: Clock, metrics sink, and entry callbacks are
//!    trait objects supplied here; no globals anywhere.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::TimeSource;
use crate::error::{CacheError, CacheResult};
use crate::metrics::MetricsSink;
use crate::types::Value;

/// Default entry capacity when none (or zero) is configured.
pub const DEFAULT_MAX_SIZE: usize = 1024;

/// Default W-TinyLFU window fraction. Informational: the sampling
/// evictor carries it for observability, not for segmenting the table.
pub const DEFAULT_WINDOW_RATIO: f64 = 0.01;

/// Default sketch counter width in bits.
pub const DEFAULT_COUNTER_BITS: u32 = 4;

/// Callback invoked with (key, value) on eviction or lazy expiration.
///
/// Runs inline on the thread that claimed the removal; must not block.
pub type EntryCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Construction options for a cache.
#[derive(Clone, Default)]
pub struct Config {
    /// Entry capacity. Zero falls back to [`DEFAULT_MAX_SIZE`].
    pub max_size: usize,
    /// Default per-entry TTL. Zero disables expiration.
    pub ttl: Duration,
    /// TTL for cached loader errors. Zero disables negative caching.
    pub negative_ttl: Duration,
    /// W-TinyLFU window fraction hint, within (0, 1).
    pub window_ratio: f64,
    /// Sketch counter width, within 1..=8.
    pub counter_bits: u32,
    /// Negative-cache sweep period. Zero falls back to `negative_ttl`.
    pub cleanup_interval: Duration,
    /// Invoked (key, value) when an entry is evicted.
    pub on_evict: Option<EntryCallback>,
    /// Invoked (key, value) when an entry is removed by lazy expiration.
    pub on_expire: Option<EntryCallback>,
    /// Clock behind every TTL decision. Defaults to a cached monotonic
    /// clock when absent.
    pub time_source: Option<Arc<dyn TimeSource>>,
    /// Latency/outcome observer. Absent means zero-overhead no-op.
    pub metrics_sink: Option<Arc<dyn MetricsSink>>,
}

impl Config {
    /// Configuration with a capacity and defaults everywhere else.
    pub fn with_max_size(max_size: usize) -> Self {
        Config { max_size, ..Config::default() }
    }

    /// Returns a copy with every out-of-range option replaced by its
    /// default. Construction always goes through this.
    pub fn normalized(&self) -> Config {
        let mut cfg = self.clone();
        if cfg.max_size == 0 {
            cfg.max_size = DEFAULT_MAX_SIZE;
        }
        if !cfg.window_ratio.is_finite() || cfg.window_ratio <= 0.0 || cfg.window_ratio >= 1.0 {
            cfg.window_ratio = DEFAULT_WINDOW_RATIO;
        }
        if cfg.counter_bits == 0 || cfg.counter_bits > 8 {
            cfg.counter_bits = DEFAULT_COUNTER_BITS;
        }
        if cfg.cleanup_interval.is_zero() {
            cfg.cleanup_interval = cfg.negative_ttl;
        }
        cfg
    }

    /// Strict validation for callers that prefer rejection over
    /// normalization. Reports the first offending option.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidMaxSize { got: self.max_size });
        }
        if self.window_ratio != 0.0
            && (!self.window_ratio.is_finite() || self.window_ratio < 0.0 || self.window_ratio >= 1.0)
        {
            return Err(CacheError::InvalidWindowRatio { got: self.window_ratio });
        }
        if self.counter_bits != 0 && self.counter_bits > 8 {
            return Err(CacheError::InvalidCounterBits { got: self.counter_bits });
        }
        if !self.cleanup_interval.is_zero() && self.negative_ttl.is_zero() {
            return Err(CacheError::InvalidTtl { got: self.cleanup_interval });
        }
        Ok(())
    }
}

// Manual Debug: callbacks and trait objects have no useful Debug form.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("negative_ttl", &self.negative_ttl)
            .field("window_ratio", &self.window_ratio)
            .field("counter_bits", &self.counter_bits)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("on_evict", &self.on_evict.is_some())
            .field("on_expire", &self.on_expire.is_some())
            .field("time_source", &self.time_source.is_some())
            .field("metrics_sink", &self.metrics_sink.is_some())
            .finish()
    }
}
