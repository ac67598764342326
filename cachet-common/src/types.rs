//! # Shared Value Types
//!
//! The cache core stores opaque payloads. Values are erased shared
//! handles so the hot path never copies user data; callers (or a typed
//! facade layered on top) downcast at the boundary.

use std::any::Any;
use std::sync::Arc;

/// Erased, shared cache payload.
///
/// Cloning a `Value` bumps a reference count; the backing object is
/// released when the last handle drops, including the one held by a
/// table slot until the entry is deleted, evicted, or expired.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Error type produced by user loaders on the load path.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wraps a concrete value into the erased payload handle.
pub fn value_of<T: Send + Sync + 'static>(value: T) -> Value {
    Arc::new(value)
}

/// Downcasts an erased payload back to a concrete type.
///
/// Returns `None` when the payload holds a different type.
pub fn value_as<T: 'static>(value: &Value) -> Option<&T> {
    value.downcast_ref::<T>()
}
