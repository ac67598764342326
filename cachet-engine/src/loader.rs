//! # Singleflight Loader
//!
//! Purpose: Collapse concurrent misses for one key into a single loader
//! execution. The winner runs the user loader behind a panic guard and
//! broadcasts the outcome; everyone else waits on the broadcast, or on a
//! two-way selection against a cancellation token.
//!
//! ## Design Principles
//! 1. **Insert-If-Absent Registry**: Whoever inserts the flight into the
//!    in-flight map is the winner; the atomic entry API decides races.
//! 2. **Broadcast By Closing**: The flight's completion signal is a
//!    channel whose sender is dropped after the result is published, so
//!    any number of waiters unblock at once without per-waiter state.
//! 3. **Publish Before Remove**: Result, then signal, then cache store,
//!    then registry removal. A latecomer either observes the closed
//!    flight or misses the registry and finds the value in the cache.
//! 4. **Contained Panics**: A loader panic becomes a `PanicRecovered`
//!    error at exactly one point; the cache stays functional.
//! 5. **Cancellation Cancels Waiting**: A cancelled caller returns
//!    promptly; the loader, once started, completes independently and
//!    may still publish its result.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::warn;

use cachet_common::{CacheError, CacheResult, CancelToken, LoaderError, Value};

use crate::cache::Cache;

/// Shared outcome of one load: the loader's value or the translated
/// error, cloned to every waiter.
pub(crate) type LoadOutcome = CacheResult<Option<Value>>;

/// One load in progress.
///
/// The result cell is written exactly once, strictly before the
/// completion channel closes, so a waiter that observed the signal
/// always finds the outcome.
pub(crate) struct Flight {
    result: OnceLock<LoadOutcome>,
    done_rx: Receiver<()>,
    done_tx: Mutex<Option<Sender<()>>>,
}

impl Flight {
    pub(crate) fn new() -> Self {
        let (done_tx, done_rx) = bounded::<()>(0);
        Flight {
            result: OnceLock::new(),
            done_rx,
            done_tx: Mutex::new(Some(done_tx)),
        }
    }

    /// Publishes the outcome. First writer wins; the flight's winner is
    /// the only caller.
    fn publish(&self, outcome: &LoadOutcome) {
        let _ = self.result.set(outcome.clone());
    }

    /// Fires the completion broadcast by closing the channel.
    fn close(&self) {
        self.done_tx.lock().take();
    }

    /// Blocks until the flight completes, then returns the outcome.
    ///
    /// `None` only if the flight closed without a published result,
    /// which the publish ordering rules out; callers treat it as "look
    /// again".
    fn wait(&self) -> Option<LoadOutcome> {
        // Disconnect is the broadcast.
        let _ = self.done_rx.recv();
        self.result.get().cloned()
    }

    /// Two-way wait: flight completion against token cancellation.
    fn wait_or_cancel(&self, token: &CancelToken, key: &Arc<str>) -> Option<LoadOutcome> {
        select! {
            recv(self.done_rx) -> _ => self.result.get().cloned(),
            recv(token.done()) -> _ => Some(Err(CacheError::LoaderCancelled {
                key: Arc::clone(key),
            })),
        }
    }
}

impl Cache {
    /// Returns the cached value for `key`, loading it at most once
    /// across all concurrent callers on a miss.
    ///
    /// On a miss with no load in flight, `loader` runs inline on this
    /// thread; its `Ok(Some(_))` result is stored with the default TTL.
    /// `Ok(None)` is returned to every waiter but never cached. Errors
    /// are translated into [`CacheError::LoaderFailed`] and, when a
    /// negative TTL is configured, cached so follow-up misses fail fast.
    pub fn get_or_load<F>(&self, key: &str, loader: F) -> CacheResult<Option<Value>>
    where
        F: FnOnce() -> Result<Option<Value>, LoaderError>,
    {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let mut loader = Some(loader);
        loop {
            if let Some(value) = self.get(key) {
                return Ok(Some(value));
            }
            if let Some(error) = self.negative_lookup(key) {
                return Err(error);
            }

            let key_arc: Arc<str> = Arc::from(key);
            match self.inner.inflight.entry(Arc::clone(&key_arc)) {
                Entry::Occupied(entry) => {
                    let flight = Arc::clone(entry.get());
                    drop(entry);
                    match flight.wait() {
                        Some(outcome) => return outcome,
                        // Flight vanished mid-teardown; the fast path
                        // has the result now.
                        None => continue,
                    }
                }
                Entry::Vacant(vacant) => {
                    let flight = Arc::new(Flight::new());
                    drop(vacant.insert(Arc::clone(&flight)));

                    let Some(loader) = loader.take() else {
                        // A winner consumed its loader and returned, so
                        // this arm cannot run twice; keep the registry
                        // clean if it ever does.
                        self.inner.inflight.remove(&key_arc);
                        return Err(CacheError::InvalidLoader);
                    };
                    let outcome = execute_loader(&key_arc, loader);
                    self.complete_flight(&key_arc, &flight, &outcome);
                    return outcome;
                }
            }
        }
    }

    /// Cancellable variant of [`Cache::get_or_load`].
    ///
    /// The loader receives the token and runs on its own thread, so a
    /// cancelled caller returns promptly even against a loader that
    /// ignores the token; the load itself completes independently and
    /// may still publish to the cache.
    pub fn get_or_load_with_cancellation<F>(
        &self,
        token: &CancelToken,
        key: &str,
        loader: F,
    ) -> CacheResult<Option<Value>>
    where
        F: FnOnce(&CancelToken) -> Result<Option<Value>, LoaderError> + Send + 'static,
    {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let mut loader = Some(loader);
        loop {
            if token.is_cancelled() {
                return Err(CacheError::LoaderCancelled { key: Arc::from(key) });
            }
            if let Some(value) = self.get(key) {
                return Ok(Some(value));
            }
            if let Some(error) = self.negative_lookup(key) {
                return Err(error);
            }

            let key_arc: Arc<str> = Arc::from(key);
            match self.inner.inflight.entry(Arc::clone(&key_arc)) {
                Entry::Occupied(entry) => {
                    let flight = Arc::clone(entry.get());
                    drop(entry);
                    match flight.wait_or_cancel(token, &key_arc) {
                        Some(outcome) => return outcome,
                        None => continue,
                    }
                }
                Entry::Vacant(vacant) => {
                    let flight = Arc::new(Flight::new());
                    drop(vacant.insert(Arc::clone(&flight)));

                    let Some(loader) = loader.take() else {
                        self.inner.inflight.remove(&key_arc);
                        return Err(CacheError::InvalidLoader);
                    };

                    let cache = self.clone();
                    let winner_key = Arc::clone(&key_arc);
                    let winner_flight = Arc::clone(&flight);
                    let winner_token = token.clone();
                    std::thread::spawn(move || {
                        let outcome =
                            execute_loader(&winner_key, move || loader(&winner_token));
                        cache.complete_flight(&winner_key, &winner_flight, &outcome);
                    });

                    match flight.wait_or_cancel(token, &key_arc) {
                        Some(outcome) => return outcome,
                        None => continue,
                    }
                }
            }
        }
    }

    fn negative_lookup(&self, key: &str) -> Option<CacheError> {
        let negative = self.inner.negative.as_ref()?;
        negative.lookup(key, self.inner.clock.now())
    }

    /// Winner-side teardown: publish, broadcast, store, then remove.
    ///
    /// The order matters twice over. The signal fires only after the
    /// result is readable, and the registry entry disappears only after
    /// the cache (or negative cache) holds the outcome, so a caller that
    /// misses the registry finds the published state instead.
    fn complete_flight(&self, key: &Arc<str>, flight: &Flight, outcome: &LoadOutcome) {
        flight.publish(outcome);
        flight.close();
        match outcome {
            Ok(Some(value)) => {
                self.set(key, Arc::clone(value));
            }
            Ok(None) => {}
            Err(error) => {
                if let Some(negative) = &self.inner.negative {
                    negative.insert(Arc::clone(key), error.clone());
                }
            }
        }
        self.inner.inflight.remove(key);
    }
}

/// Runs a loader behind the panic guard and translates its outcome.
fn execute_loader<F>(key: &Arc<str>, loader: F) -> LoadOutcome
where
    F: FnOnce() -> Result<Option<Value>, LoaderError>,
{
    match catch_unwind(AssertUnwindSafe(loader)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(CacheError::loader_failed(Arc::clone(key), cause)),
        Err(payload) => {
            let detail = panic_detail(payload.as_ref());
            warn!(key = %key, %detail, "loader panicked, recovered");
            Err(CacheError::PanicRecovered { detail })
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
