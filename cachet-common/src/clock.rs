//! # Time Sources
//!
//! Purpose: Provide the nanosecond monotonic clock behind every TTL
//! decision, with a cached default so the hot path never pays a clock
//! read per operation.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Everything time-related goes through the
//!    `TimeSource` trait so tests can inject deterministic clocks.
//! 2. **Monotonic Only**: Readings are nanoseconds since an arbitrary
//!    per-clock origin; wall-clock adjustments never move TTLs.
//! 3. **Coarse By Default**: The default clock trades a sub-millisecond
//!    staleness window for a single atomic load per call.
//! 4. **Owned Shutdown**: The cached clock's updater thread is joined
//!    when the last handle drops, never leaked.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Pluggable monotonic clock.
///
/// `now` returns nanoseconds since an origin fixed at clock creation.
/// Implementations must be cheap and never decrease.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> i64;
}

/// Direct-sampling monotonic clock.
///
/// One `Instant` read per call. Useful when exact readings matter more
/// than shaving the clock read off the hot path.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Shared state between cached-clock handles and the updater thread.
struct ClockShared {
    origin: Instant,
    cached: AtomicI64,
}

/// Default cache clock: a coarse cached monotonic reading.
///
/// A small updater thread refreshes the cached nanosecond value at a
/// fixed resolution; `now` is then a single atomic load. TTL decisions
/// tolerate the staleness window (at most one resolution tick), which is
/// orders of magnitude below any practical TTL.
pub struct CachedClock {
    shared: Arc<ClockShared>,
    stop: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl CachedClock {
    /// Default refresh resolution of the updater thread.
    pub const DEFAULT_RESOLUTION: Duration = Duration::from_micros(500);

    /// Starts a cached clock at the default resolution.
    pub fn new() -> Self {
        Self::with_resolution(Self::DEFAULT_RESOLUTION)
    }

    /// Starts a cached clock refreshing every `resolution`.
    ///
    /// A zero resolution is normalized to one microsecond.
    pub fn with_resolution(resolution: Duration) -> Self {
        let resolution = if resolution.is_zero() {
            Duration::from_micros(1)
        } else {
            resolution
        };

        let shared = Arc::new(ClockShared {
            origin: Instant::now(),
            cached: AtomicI64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        let join = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                std::thread::sleep(resolution);
                let nanos = thread_shared.origin.elapsed().as_nanos() as i64;
                thread_shared.cached.store(nanos, Ordering::Release);
            }
        });

        CachedClock {
            shared,
            stop,
            join: Mutex::new(Some(join)),
        }
    }

    /// Stops the updater thread and waits for it to finish.
    ///
    /// Subsequent `now` calls return the last cached reading. Called
    /// automatically on drop; exposed for explicit teardown in tests.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

impl Default for CachedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for CachedClock {
    fn now(&self) -> i64 {
        self.shared.cached.load(Ordering::Acquire)
    }
}

impl Drop for CachedClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { nanos: AtomicI64::new(0) }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.nanos.fetch_add(delta.as_nanos() as i64, Ordering::Release);
    }

    /// Sets the clock to an absolute nanosecond reading.
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }
}
