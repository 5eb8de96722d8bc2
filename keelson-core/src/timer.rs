//! Named, cancellable, repeatable timers scoped to one object.
//!
//! Each armed timer is a reactor task holding an [`AsyncToken`]. When it
//! fires, the callback runs on the owner's [`Strand`], so timer callbacks
//! never overlap each other or the owner's dispatch path. The callback's
//! return value decides whether the timer re-arms with the same interval.
//!
//! Setting a timer that is already armed replaces it.

use crate::guard::{AsyncGuard, AsyncToken};
use crate::strand::Strand;

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Timer identity, scoped per object.
pub type TimerId = u8;

/// Callback invoked on each firing; `true` re-arms the timer.
pub type TimerCallback = Arc<dyn Fn(TimerId) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Timers {
    inner: Arc<TimersInner>,
}

struct TimersInner {
    handle: Handle,
    strand: Strand,
    guard: AsyncGuard,
    slots: Mutex<HashMap<TimerId, Slot>>,
    seq: AtomicU64,
}

struct Slot {
    seq: u64,
    interval: Duration,
    task: JoinHandle<()>,
}

impl Timers {
    pub fn new(handle: Handle, strand: Strand, guard: AsyncGuard) -> Self {
        Self {
            inner: Arc::new(TimersInner {
                handle,
                strand,
                guard,
                slots: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Arm (or re-arm) timer `id`.
    pub fn set_timer<F>(&self, id: TimerId, interval: Duration, callback: F)
    where
        F: Fn(TimerId) -> bool + Send + Sync + 'static,
    {
        let callback: TimerCallback = Arc::new(callback);
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.inner.slots.lock();
        let task = self.inner.handle.spawn(fire(
            Arc::downgrade(&self.inner),
            self.inner.strand.clone(),
            self.inner.guard.token(),
            id,
            interval,
            callback,
            seq,
        ));

        if let Some(old) = slots.insert(id, Slot { seq, interval, task }) {
            old.task.abort();
        }
        trace!("[Timers] armed timer {} every {:?}", id, interval);
    }

    #[inline]
    pub fn is_timer(&self, id: TimerId) -> bool {
        self.inner.slots.lock().contains_key(&id)
    }

    /// Interval of an armed timer.
    pub fn interval(&self, id: TimerId) -> Option<Duration> {
        self.inner.slots.lock().get(&id).map(|slot| slot.interval)
    }

    pub fn stop_timer(&self, id: TimerId) -> bool {
        match self.inner.slots.lock().remove(&id) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, optionally sparing one.
    pub fn stop_all_timers(&self, except: Option<TimerId>) {
        let mut slots = self.inner.slots.lock();
        slots.retain(|id, slot| {
            if Some(*id) == except {
                true
            } else {
                slot.task.abort();
                false
            }
        });
    }

    /// Forget timer `id` without cancelling it.
    ///
    /// For use from inside the timer's own callback when that callback is
    /// about to return `false`: the timer stops reporting as armed right away.
    pub fn detach(&self, id: TimerId) -> bool {
        self.inner.slots.lock().remove(&id).is_some()
    }

    pub fn armed(&self) -> Vec<TimerId> {
        let mut ids: Vec<_> = self.inner.slots.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

async fn fire(
    owner: Weak<TimersInner>,
    strand: Strand,
    token: AsyncToken,
    id: TimerId,
    interval: Duration,
    callback: TimerCallback,
    seq: u64,
) {
    let _token = token;
    loop {
        tokio::time::sleep(interval).await;
        let cb = callback.clone();
        if strand.run(move || cb(id)).await != Some(true) {
            break;
        }
    }

    if let Some(inner) = owner.upgrade() {
        let mut slots = inner.slots.lock();
        if slots.get(&id).is_some_and(|slot| slot.seq == seq) {
            slots.remove(&id);
        }
    }
}

impl Drop for TimersInner {
    fn drop(&mut self) {
        for (_, slot) in self.slots.get_mut().drain() {
            slot.task.abort();
        }
    }
}

impl fmt::Debug for Timers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers").field("armed", &self.armed()).finish()
    }
}
