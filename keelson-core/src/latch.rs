//! RAII test-and-set latch guarding endpoint start/close transitions.
//!
//! # The Problem
//!
//! `start()` and `close()` can be called concurrently from user code, error
//! callbacks and timer callbacks. Exactly one caller may perform the
//! transition; the others must return immediately instead of blocking on a
//! lock that a reactor worker is holding.
//!
//! # The Solution
//!
//! [`Latch::try_acquire`] performs a lock-free test-and-set. The caller that
//! wins gets a [`LatchGuard`]; the latch is released when the guard drops,
//! including on unwind.
//!
//! # Example
//!
//! ```rust
//! use keelson_core::latch::Latch;
//!
//! let latch = Latch::new();
//! let guard = latch.try_acquire().expect("uncontended");
//! assert!(latch.try_acquire().is_none());
//! drop(guard);
//! assert!(latch.try_acquire().is_some());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

/// Lock-free single-winner latch.
#[derive(Debug, Default)]
pub struct Latch {
    held: AtomicBool,
}

/// Held while a transition is in progress.
#[derive(Debug)]
pub struct LatchGuard<'a> {
    held: &'a AtomicBool,
}

impl Latch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Try to take the latch without waiting.
    #[inline]
    #[must_use]
    pub fn try_acquire(&self) -> Option<LatchGuard<'_>> {
        if self.held.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(LatchGuard { held: &self.held })
        }
    }

    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for LatchGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn released_on_drop() {
        let latch = Latch::new();
        {
            let _guard = latch.try_acquire().unwrap();
            assert!(latch.is_held());
        }
        assert!(!latch.is_held());
    }

    #[test]
    fn released_on_unwind() {
        let latch = Arc::new(Latch::new());
        let inner = latch.clone();
        let result = std::thread::spawn(move || {
            let _guard = inner.try_acquire().unwrap();
            panic!("transition failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!latch.is_held());
    }

    #[test]
    fn single_winner_under_contention() {
        let latch = Arc::new(Latch::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                let barrier = barrier.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Some(guard) = latch.try_acquire() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        drop(guard);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(winners.load(Ordering::SeqCst) >= 1);
        assert!(!latch.is_held());
    }
}
