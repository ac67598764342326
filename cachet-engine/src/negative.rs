//! # Negative Cache
//!
//! Purpose: Remember loader failures for a short TTL so misses against a
//! failing backend fail fast instead of hammering it. A background
//! sweeper bounds memory under sustained outages: errors that are never
//! re-queried would otherwise accumulate without limit.
//!
//! ## Design Principles
//! 1. **Lazy Plus Active Removal**: Lookups drop expired entries they
//!    touch; the sweeper periodically drops the ones nothing touches.
//! 2. **Interruptible Sleep**: The sweeper waits in `recv_timeout` on a
//!    shutdown channel, so Close stops it mid-interval instead of after
//!    one more sweep.
//! 3. **Joined Shutdown**: Stop is idempotent and joins the thread; no
//!    references survive shutdown.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use cachet_common::{CacheError, TimeSource};

/// A cached loader failure and its deadline.
struct NegativeEntry {
    error: CacheError,
    expire_at: i64,
}

/// Short-lived error store with a background sweeper.
pub(crate) struct NegativeCache {
    entries: Arc<DashMap<Arc<str>, NegativeEntry, ahash::RandomState>>,
    ttl_nanos: i64,
    clock: Arc<dyn TimeSource>,
    // Dropping the sender wakes and terminates the sweeper.
    stop_tx: Mutex<Option<Sender<()>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl NegativeCache {
    /// Builds the store and spawns its sweeper.
    ///
    /// The sweeper scans every `interval` (normalized away from zero)
    /// and removes entries past their deadline.
    pub(crate) fn start(ttl_nanos: i64, interval: Duration, clock: Arc<dyn TimeSource>) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let entries: Arc<DashMap<Arc<str>, NegativeEntry, ahash::RandomState>> =
            Arc::new(DashMap::with_hasher(ahash::RandomState::new()));
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let sweeper_entries = Arc::clone(&entries);
        let sweeper_clock = Arc::clone(&clock);
        let join = std::thread::spawn(move || {
            debug!("negative-cache sweeper started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let now = sweeper_clock.now();
                        sweeper_entries.retain(|_, entry| entry.expire_at > now);
                    }
                    // Message or disconnect: shut down.
                    _ => break,
                }
            }
            debug!("negative-cache sweeper stopped");
        });

        NegativeCache {
            entries,
            ttl_nanos,
            clock,
            stop_tx: Mutex::new(Some(stop_tx)),
            join: Mutex::new(Some(join)),
        }
    }

    /// Stores `error` under `key` until `now + negative_ttl`.
    pub(crate) fn insert(&self, key: Arc<str>, error: CacheError) {
        let expire_at = self.clock.now() + self.ttl_nanos;
        self.entries.insert(key, NegativeEntry { error, expire_at });
    }

    /// Returns the live cached error for `key`, removing an expired one
    /// it runs into.
    pub(crate) fn lookup(&self, key: &str, now: i64) -> Option<CacheError> {
        {
            let entry = self.entries.get(key)?;
            if entry.expire_at > now {
                return Some(entry.error.clone());
            }
        }
        // The predicate re-checks under the shard lock so a freshly
        // re-inserted error is not lost to a stale observation.
        self.entries.remove_if(key, |_, entry| entry.expire_at <= now);
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    /// Stops and joins the sweeper. Idempotent; bounded by one channel
    /// wake-up rather than a full sweep interval.
    pub(crate) fn stop(&self) {
        self.stop_tx.lock().take();
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

impl Drop for NegativeCache {
    fn drop(&mut self) {
        self.stop();
    }
}
