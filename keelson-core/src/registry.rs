//! Object registry: the pool that owns endpoints and hands out identities.
//!
//! Live endpoints sit in a concurrent map keyed by identity. Removing one
//! only detaches it from the map; it moves to a retired list where it waits
//! until it is quiesced and can either be reused by [`Registry::create`] or
//! dropped by [`Registry::free_retired`]. Identities come from a counter that
//! never goes backwards, so an identity is never handed out twice.

use crate::codec::{Packer, Unpacker};
use crate::endpoint::Endpoint;
use crate::handler::Handler;
use crate::options::{EndpointOptions, PoolOptions};
use crate::reactor::Reactor;
use crate::transport::Transport;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds a fresh packer/unpacker pair for each new endpoint.
pub type CodecFactory = Arc<dyn Fn() -> (Arc<dyn Packer>, Box<dyn Unpacker>) + Send + Sync>;

pub struct Registry<T: Transport> {
    reactor: Reactor,
    options: PoolOptions,
    endpoint_options: EndpointOptions,
    codec: Option<CodecFactory>,
    live: DashMap<u64, Endpoint<T>>,
    /// Slots reserved in `live`; never exceeds `max_size`.
    slots: AtomicUsize,
    retired: Mutex<Vec<Endpoint<T>>>,
    next_id: AtomicU64,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> Registry<T> {
    pub fn new(reactor: Reactor, options: PoolOptions, endpoint_options: EndpointOptions) -> Self {
        Self {
            reactor,
            options,
            endpoint_options,
            codec: None,
            live: DashMap::new(),
            slots: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            sweeps: Mutex::new(Vec::new()),
        }
    }

    /// Use a custom framing for endpoints built by [`create`](Self::create).
    #[must_use]
    pub fn with_codec(mut self, codec: CodecFactory) -> Self {
        self.codec = Some(codec);
        self
    }

    #[inline]
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    #[inline]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Build an endpoint bound to the shared reactor. It is not registered.
    ///
    /// With reuse enabled, a quiesced retired endpoint is reset and handed
    /// back instead of allocating.
    pub fn create(&self, handler: Arc<dyn Handler<T>>) -> Endpoint<T> {
        if self.options.reuse {
            if let Some(ep) = self.take_reusable() {
                ep.reset();
                ep.detach();
                ep.set_handler(handler);
                debug!("[Registry] reusing a retired endpoint");
                return ep;
            }
        }

        match &self.codec {
            Some(codec) => {
                let (packer, unpacker) = codec();
                Endpoint::with_codec(
                    self.reactor.clone(),
                    handler,
                    self.endpoint_options.clone(),
                    packer,
                    unpacker,
                )
            }
            None => Endpoint::new(self.reactor.clone(), handler, self.endpoint_options.clone()),
        }
    }

    fn take_reusable(&self) -> Option<Endpoint<T>> {
        let mut retired = self.retired.lock();
        let pos = retired.iter().position(Endpoint::obsoleted)?;
        Some(retired.swap_remove(pos))
    }

    /// Register an endpoint under the next identity.
    ///
    /// Fails when the pool is at `max_size`.
    pub fn add(&self, ep: &Endpoint<T>) -> bool {
        let max_size = self.options.max_size;
        let reserved = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max_size).then_some(n + 1));
        if reserved.is_err() {
            warn!("[Registry] pool full ({}), endpoint rejected", max_size);
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        match self.live.entry(id) {
            Entry::Occupied(_) => {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                warn!("[Registry] identity {} already taken", id);
                false
            }
            Entry::Vacant(slot) => {
                ep.set_id(id);
                slot.insert(ep.clone());
                debug!("[Registry] added endpoint {}", id);
                true
            }
        }
    }

    pub fn find(&self, id: u64) -> Option<Endpoint<T>> {
        self.live.get(&id).map(|entry| entry.value().clone())
    }

    #[inline]
    pub fn exists(&self, id: u64) -> bool {
        self.live.contains_key(&id)
    }

    /// Detach an endpoint from the registry without closing it.
    pub fn remove(&self, id: u64) -> bool {
        match self.live.remove(&id) {
            Some((_, ep)) => {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                self.retired.lock().push(ep);
                debug!("[Registry] removed endpoint {}", id);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.live.len()
    }

    pub fn retired_size(&self) -> usize {
        self.retired.lock().len()
    }

    /// Live identities in ascending order.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.live.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Visit a snapshot of the live endpoints.
    pub fn for_each<F: FnMut(&Endpoint<T>)>(&self, mut f: F) {
        for ep in self.snapshot() {
            f(&ep);
        }
    }

    pub fn find_if<P: FnMut(&Endpoint<T>) -> bool>(&self, mut pred: P) -> Option<Endpoint<T>> {
        self.snapshot().into_iter().find(|ep| pred(ep))
    }

    pub fn close_all(&self) {
        self.for_each(Endpoint::close);
    }

    /// Move closed, quiesced endpoints from the live map to the retired list.
    pub fn clear_obsoleted(&self) -> usize {
        let stale: Vec<u64> = self
            .live
            .iter()
            .filter(|entry| entry.value().obsoleted())
            .map(|entry| *entry.key())
            .collect();

        let mut moved = 0;
        for id in stale {
            if let Some((_, ep)) = self.live.remove_if(&id, |_, ep| ep.obsoleted()) {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                self.retired.lock().push(ep);
                moved += 1;
            }
        }
        if moved > 0 {
            info!("[Registry] retired {} obsoleted endpoint(s)", moved);
        }
        moved
    }

    /// Drop up to `max` quiesced retired endpoints.
    pub fn free_retired(&self, max: usize) -> usize {
        let mut retired = self.retired.lock();
        let mut freed = 0;
        retired.retain(|ep| {
            if freed < max && ep.obsoleted() {
                freed += 1;
                false
            } else {
                true
            }
        });
        if freed > 0 {
            debug!("[Registry] freed {} retired endpoint(s)", freed);
        }
        freed
    }

    /// Start the periodic sweeps. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut sweeps = self.sweeps.lock();
        if !sweeps.is_empty() {
            return;
        }

        if let Some(interval) = self.options.clear_interval {
            sweeps.push(self.spawn_sweep(interval, |reg| {
                reg.clear_obsoleted();
            }));
        }
        if let Some(interval) = self.options.free_interval {
            sweeps.push(self.spawn_sweep(interval, |reg| {
                let max = if reg.options.reuse {
                    reg.retired_size().saturating_sub(reg.options.retired_keep)
                } else {
                    usize::MAX
                };
                reg.free_retired(max);
            }));
        }
    }

    fn spawn_sweep<F>(self: &Arc<Self>, interval: Duration, sweep: F) -> JoinHandle<()>
    where
        F: Fn(&Registry<T>) + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.reactor.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(reg) = weak.upgrade() else {
                    break;
                };
                sweep(&reg);
            }
        })
    }

    /// Cancel the periodic sweeps.
    pub fn stop(&self) {
        for sweep in self.sweeps.lock().drain(..) {
            sweep.abort();
        }
    }

    fn snapshot(&self) -> Vec<Endpoint<T>> {
        self.live.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl<T: Transport> Drop for Registry<T> {
    fn drop(&mut self) {
        for sweep in self.sweeps.get_mut().drain(..) {
            sweep.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::InprocTransport;
    use crate::transport::Packet;

    struct Sink;

    impl Handler<InprocTransport> for Sink {
        fn on_message(&self, _: &Endpoint<InprocTransport>, _: &Packet<String>) -> bool {
            true
        }
    }

    fn registry(options: PoolOptions) -> Registry<InprocTransport> {
        Registry::new(
            Reactor::try_current().unwrap(),
            options,
            EndpointOptions::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_find_remove() {
        let reg = registry(PoolOptions::default());
        let a = reg.create(Arc::new(Sink));
        let b = reg.create(Arc::new(Sink));
        assert!(reg.add(&a));
        assert!(reg.add(&b));
        assert_eq!((a.id(), b.id()), (0, 1));
        assert_eq!(reg.ids(), vec![0, 1]);

        assert!(reg.find(1).unwrap().same_as(&b));
        assert!(reg.remove(0));
        assert!(!reg.remove(0));
        assert!(!reg.exists(0));
        assert_eq!(reg.size(), 1);
        assert_eq!(reg.retired_size(), 1);

        // Identities are not recycled.
        let c = reg.create(Arc::new(Sink));
        reg.add(&c);
        assert_eq!(c.id(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn max_size_rejects() {
        let reg = registry(PoolOptions::default().with_max_size(1));
        assert!(reg.add(&reg.create(Arc::new(Sink))));
        assert!(!reg.add(&reg.create(Arc::new(Sink))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reuse_resets_retired_endpoint() {
        let reg = registry(PoolOptions::default().with_reuse(true));
        let first = reg.create(Arc::new(Sink));
        reg.add(&first);
        first.direct_send(&b"stale"[..], true);
        assert_eq!(first.pending_send_count(), 1);
        reg.remove(first.id());

        let second = reg.create(Arc::new(Sink));
        assert!(second.same_as(&first));
        assert_eq!(second.pending_send_count(), 0);
        assert_eq!(second.id(), crate::endpoint::UNASSIGNED);
        assert_eq!(reg.retired_size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeps_retire_and_free() {
        let reg = registry(PoolOptions::default());
        for _ in 0..3 {
            reg.add(&reg.create(Arc::new(Sink)));
        }
        let kept = reg.find(1).unwrap();
        let _token = kept.guard().token();

        assert_eq!(reg.clear_obsoleted(), 2);
        assert_eq!(reg.ids(), vec![1]);
        assert_eq!(reg.free_retired(1), 1);
        assert_eq!(reg.free_retired(usize::MAX), 1);
        assert_eq!(reg.retired_size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_sweep_runs() {
        let reg = Arc::new(registry(
            PoolOptions::default()
                .with_clear_interval(Some(Duration::from_millis(10)))
                .with_free_interval(None),
        ));
        reg.add(&reg.create(Arc::new(Sink)));
        reg.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(reg.size(), 0);
        assert_eq!(reg.retired_size(), 1);
        reg.stop();
    }
}
