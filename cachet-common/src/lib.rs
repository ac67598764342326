// cachet-common - Shared leaf types for the Cachet cache
//
// This crate defines the pieces the engine and its callers both need:
// the error taxonomy, configuration, stats, clocks, metrics sinks, and
// cancellation tokens. It has no dependency on the engine itself.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod stats;
pub mod types;

// Re-export for convenience
pub use cancel::CancelToken;
pub use clock::{CachedClock, ManualClock, MonotonicClock, TimeSource};
pub use config::{Config, EntryCallback, DEFAULT_COUNTER_BITS, DEFAULT_MAX_SIZE, DEFAULT_WINDOW_RATIO};
pub use error::{CacheError, CacheResult, ErrorCategory, Severity};
pub use metrics::{AggregateMetrics, MetricsSink, NoopMetrics};
pub use stats::{CacheCounters, StatsSnapshot};
pub use types::{value_as, value_of, LoaderError, Value};
