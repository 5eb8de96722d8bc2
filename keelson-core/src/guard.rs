//! Outstanding-operation tracking for objects driven by the reactor.
//!
//! Every endpoint owns one [`AsyncGuard`]. Each continuation it hands to the
//! reactor (a receive task, a write task, a timer, a strand job) carries an
//! [`AsyncToken`] taken from that guard. The guard therefore answers, without
//! racing the reactor, whether the object can be finalized or recycled.
//!
//! Memory ownership is a separate concern: endpoints live behind `Arc`, so a
//! late continuation can never touch freed state. The guard only decides when
//! finalization hooks run and when the registry may reuse an object.
//!
//! ```rust
//! use keelson_core::guard::AsyncGuard;
//!
//! let guard = AsyncGuard::new();
//! assert!(!guard.outstanding());
//!
//! let token = guard.token();
//! assert!(guard.outstanding());
//! assert!(guard.is_last_in_callback());
//!
//! drop(token);
//! assert!(!guard.outstanding());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counter of asynchronous operations issued by one object.
///
/// The count starts at 1, which stands for the owning object itself.
/// Cloning the guard shares the counter without changing it.
#[derive(Clone)]
pub struct AsyncGuard {
    count: Arc<AtomicUsize>,
}

/// RAII proof that one continuation is still pending.
///
/// Dropping the token releases it.
pub struct AsyncToken {
    count: Arc<AtomicUsize>,
}

impl AsyncGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Take a token for a continuation that is about to be scheduled.
    #[must_use]
    pub fn token(&self) -> AsyncToken {
        self.count.fetch_add(1, Ordering::AcqRel);
        AsyncToken {
            count: self.count.clone(),
        }
    }

    /// True while any continuation holds a token.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> bool {
        self.count.load(Ordering::Acquire) > 1
    }

    /// Only meaningful from inside a running continuation: true when that
    /// continuation is the final one (owner + current caller).
    #[inline]
    #[must_use]
    pub fn is_last_in_callback(&self) -> bool {
        self.count.load(Ordering::Acquire) <= 2
    }

    /// Current count, owner included.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Default for AsyncGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncGuard").field("count", &self.count()).finish()
    }
}

impl Drop for AsyncToken {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for AsyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncToken")
    }
}
