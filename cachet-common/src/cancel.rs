//! # Cancellation Token
//!
//! Purpose: Let callers abandon a blocking load without tearing down the
//! load itself. Cancellation closes a channel, so any number of waiters
//! can select on it alongside other events.
//!
//! ## Design Principles
//! 1. **Broadcast By Closing**: Dropping the internal sender disconnects
//!    the channel; every held receiver unblocks at once. No per-waiter
//!    bookkeeping.
//! 2. **Idempotent**: Cancelling twice is a no-op.
//! 3. **Selectable**: The receiver side plugs directly into
//!    `crossbeam_channel::select!` two-way waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

struct TokenInner {
    cancelled: AtomicBool,
    // Dropping the sender is the broadcast; the mutex only guards the take.
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Clonable cancellation handle.
///
/// All clones observe the same cancellation. The token only cancels
/// waiting; a loader already running completes independently and may
/// still publish its result to the cache.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded::<()>(0);
        CancelToken {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Cancels the token, waking every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        // Closing the channel is what unblocks selectors.
        self.inner.sender.lock().take();
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Channel that becomes ready (disconnected) on cancellation.
    ///
    /// Intended for `select!` against other completion events.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Cancels this token after `delay`, from a detached timer thread.
    pub fn cancel_after(&self, delay: Duration) {
        let token = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            token.cancel();
        });
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
