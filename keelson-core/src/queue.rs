//! Bounded FIFO used for the send and receive buffers of an endpoint.

use crate::stats::Timed;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

/// Timestamped message queue.
///
/// Capacity is enforced by the caller-supplied bound at push time so the
/// bound check and the append happen under one lock acquisition.
#[derive(Debug)]
pub struct MsgQueue<T> {
    items: Mutex<VecDeque<Timed<T>>>,
}

impl<T> Default for MsgQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> MsgQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append unless the queue already holds `bound` items.
    ///
    /// Returns the item back when rejected.
    pub fn push_bounded(&self, item: T, bound: usize) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= bound {
            return Err(item);
        }
        items.push_back(Timed::new(item));
        Ok(())
    }

    /// Append regardless of length.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(Timed::new(item));
    }

    /// Append a whole batch atomically, every item sharing one stamp.
    pub fn extend<I: IntoIterator<Item = T>>(&self, batch: I) {
        let now = Instant::now();
        self.items
            .lock()
            .extend(batch.into_iter().map(|item| Timed::stamped(item, now)));
    }

    pub fn pop_front(&self) -> Option<Timed<T>> {
        self.items.lock().pop_front()
    }

    /// Pop items from the front while their accumulated weight stays within
    /// `limit`. At least one item is popped when the queue is not empty.
    pub fn pop_batch<W>(&self, limit: usize, weight: W) -> Vec<Timed<T>>
    where
        W: Fn(&T) -> usize,
    {
        let mut items = self.items.lock();
        let mut total = 0usize;
        let mut count = 0usize;
        for item in items.iter() {
            let w = weight(item);
            if count > 0 && total + w > limit {
                break;
            }
            total += w;
            count += 1;
        }
        items.drain(..count).collect()
    }

    pub fn drain_all(&self) -> Vec<Timed<T>> {
        self.items.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
