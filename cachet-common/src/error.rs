//! # Error Taxonomy
//!
//! Purpose: Give the load path rich, stable error values while the write
//! path stays boolean (callers retry on `false`).
//!
//! ## Design Principles
//! 1. **Stable Codes**: Every variant maps to one snake_case code that
//!    never changes meaning across releases.
//! 2. **Cloneable Errors**: A singleflight result is broadcast to every
//!    waiter and may be re-delivered from the negative cache, so errors
//!    hold their cause as `Arc` and derive `Clone`.
//! 3. **Categorized**: Configuration, operation, and loader failures are
//!    distinguishable without string matching.
//! 4. **Severity Tagged**: A recovered loader panic is critical; a miss
//!    is informational.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type for cache load-path operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Broad grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid construction options.
    Configuration,
    /// Structural failures of table operations.
    Operation,
    /// Failures surfaced by or around user loaders.
    Loader,
}

/// Coarse severity tag attached to every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Errors surfaced by the cache.
///
/// The `cause` fields intentionally avoid thiserror's `#[source]`
/// machinery: the chained error is shared (`Arc`) so the enum stays
/// cloneable. Use [`CacheError::cause`] to walk the chain.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    // Configuration
    /// `max_size` must be a positive entry count.
    #[error("max_size must be positive, got {got}")]
    InvalidMaxSize { got: usize },
    /// `window_ratio` is a fraction of capacity and must sit in (0, 1).
    #[error("window_ratio must be within (0, 1), got {got}")]
    InvalidWindowRatio { got: f64 },
    /// Sketch counters are packed into 64-bit cells; widths above 8 bits
    /// defeat the point of the sketch.
    #[error("counter_bits must be within 1..=8, got {got}")]
    InvalidCounterBits { got: u32 },
    /// A cleanup interval without a negative TTL has nothing to sweep.
    #[error("cleanup_interval {got:?} requires a non-zero negative_ttl")]
    InvalidTtl { got: Duration },

    // Operation
    /// No slot could be claimed within the probe window. Retryable:
    /// the failed write already triggered an eviction.
    #[error("cache is full, no slot available within the probe window")]
    CacheFull,
    /// The key is not present.
    #[error("key not found: {key}")]
    KeyNotFound { key: Arc<str> },
    /// No victim could be claimed by the eviction pass.
    #[error("eviction found no claimable victim")]
    EvictionFailed,
    /// The write lost every claim race along its probe path.
    #[error("set failed for key: {key}")]
    SetFailed { key: Arc<str> },
    /// The delete lost the state transition race.
    #[error("delete failed for key: {key}")]
    DeleteFailed { key: Arc<str> },

    // Loader
    /// Load-path keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,
    /// The loader handle was not usable.
    #[error("loader is not usable")]
    InvalidLoader,
    /// The user loader returned an error.
    #[error("loader failed for key {key}: {cause}")]
    LoaderFailed {
        key: Arc<str>,
        cause: Arc<dyn StdError + Send + Sync + 'static>,
    },
    /// The loader exceeded a caller-imposed deadline.
    #[error("loader timed out for key {key}")]
    LoaderTimeout { key: Arc<str> },
    /// The waiting call was cancelled; the loader may still complete
    /// and publish independently.
    #[error("load cancelled for key {key}")]
    LoaderCancelled { key: Arc<str> },
    /// The loader panicked; the panic was contained at the flight
    /// boundary and the cache remains functional.
    #[error("loader panicked: {detail}")]
    PanicRecovered { detail: String },
}

impl CacheError {
    /// Builds a `LoaderFailed` from the boxed error a user loader returned.
    pub fn loader_failed(key: impl Into<Arc<str>>, cause: Box<dyn StdError + Send + Sync>) -> Self {
        CacheError::LoaderFailed {
            key: key.into(),
            cause: Arc::from(cause),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::InvalidMaxSize { .. } => "invalid_max_size",
            CacheError::InvalidWindowRatio { .. } => "invalid_window_ratio",
            CacheError::InvalidCounterBits { .. } => "invalid_counter_bits",
            CacheError::InvalidTtl { .. } => "invalid_ttl",
            CacheError::CacheFull => "cache_full",
            CacheError::KeyNotFound { .. } => "key_not_found",
            CacheError::EvictionFailed => "eviction_failed",
            CacheError::SetFailed { .. } => "set_failed",
            CacheError::DeleteFailed { .. } => "delete_failed",
            CacheError::EmptyKey => "empty_key",
            CacheError::InvalidLoader => "invalid_loader",
            CacheError::LoaderFailed { .. } => "loader_failed",
            CacheError::LoaderTimeout { .. } => "loader_timeout",
            CacheError::LoaderCancelled { .. } => "loader_cancelled",
            CacheError::PanicRecovered { .. } => "panic_recovered",
        }
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CacheError::InvalidMaxSize { .. }
            | CacheError::InvalidWindowRatio { .. }
            | CacheError::InvalidCounterBits { .. }
            | CacheError::InvalidTtl { .. } => ErrorCategory::Configuration,
            CacheError::CacheFull
            | CacheError::KeyNotFound { .. }
            | CacheError::EvictionFailed
            | CacheError::SetFailed { .. }
            | CacheError::DeleteFailed { .. } => ErrorCategory::Operation,
            CacheError::EmptyKey
            | CacheError::InvalidLoader
            | CacheError::LoaderFailed { .. }
            | CacheError::LoaderTimeout { .. }
            | CacheError::LoaderCancelled { .. }
            | CacheError::PanicRecovered { .. } => ErrorCategory::Loader,
        }
    }

    /// Whether retrying the same call may succeed without intervention.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CacheError::CacheFull
                | CacheError::EvictionFailed
                | CacheError::LoaderFailed { .. }
                | CacheError::LoaderTimeout { .. }
        )
    }

    /// Severity tag for logging and alerting.
    pub fn severity(&self) -> Severity {
        match self {
            CacheError::KeyNotFound { .. } => Severity::Info,
            CacheError::CacheFull
            | CacheError::EvictionFailed
            | CacheError::SetFailed { .. }
            | CacheError::DeleteFailed { .. }
            | CacheError::LoaderCancelled { .. } => Severity::Warning,
            CacheError::InvalidMaxSize { .. }
            | CacheError::InvalidWindowRatio { .. }
            | CacheError::InvalidCounterBits { .. }
            | CacheError::InvalidTtl { .. }
            | CacheError::EmptyKey
            | CacheError::InvalidLoader
            | CacheError::LoaderFailed { .. }
            | CacheError::LoaderTimeout { .. } => Severity::Error,
            CacheError::PanicRecovered { .. } => Severity::Critical,
        }
    }

    /// The chained cause, when the error wraps one.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            CacheError::LoaderFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// The key this error is about, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::KeyNotFound { key }
            | CacheError::SetFailed { key }
            | CacheError::DeleteFailed { key }
            | CacheError::LoaderFailed { key, .. }
            | CacheError::LoaderTimeout { key }
            | CacheError::LoaderCancelled { key } => Some(key),
            _ => None,
        }
    }

    /// Structured context for log enrichment.
    ///
    /// Always carries `code`; `key` and `detail` appear when the variant
    /// has them.
    pub fn context(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("code", self.code().to_string());
        if let Some(key) = self.key() {
            map.insert("key", key.to_string());
        }
        if let CacheError::PanicRecovered { detail } = self {
            map.insert("detail", detail.clone());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_categorized() {
        let err = CacheError::InvalidCounterBits { got: 12 };
        assert_eq!(err.code(), "invalid_counter_bits");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.retryable());

        assert!(CacheError::CacheFull.retryable());
        assert_eq!(CacheError::CacheFull.category(), ErrorCategory::Operation);
    }

    #[test]
    fn loader_failed_keeps_its_cause() {
        let cause: Box<dyn StdError + Send + Sync> = "backend down".into();
        let err = CacheError::loader_failed("users/42", cause);
        assert_eq!(err.code(), "loader_failed");
        assert_eq!(err.key(), Some("users/42"));
        assert_eq!(
            err.cause().map(|cause| cause.to_string()),
            Some("backend down".to_string())
        );

        // Broadcast to waiters requires cloning the full chain.
        let clone = err.clone();
        assert_eq!(clone.to_string(), err.to_string());
    }

    #[test]
    fn panic_recovery_is_critical() {
        let err = CacheError::PanicRecovered { detail: "boom".into() };
        assert_eq!(err.severity(), Severity::Critical);
        assert_eq!(err.context().get("detail").map(String::as_str), Some("boom"));
    }

    #[test]
    fn context_always_carries_the_code() {
        let err = CacheError::EmptyKey;
        assert_eq!(err.context().get("code").map(String::as_str), Some("empty_key"));
        assert!(err.key().is_none());
    }
}
