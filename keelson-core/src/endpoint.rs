//! Connection endpoint: one logical connection's lifecycle, buffers and
//! dispatch sequencing.
//!
//! # Tasks
//!
//! A started endpoint runs up to two reactor tasks besides its timers:
//!
//! - the **reader** receives raw bytes, unpacks them, appends the resulting
//!   messages to the receive buffer as one batch and kicks dispatch; it
//!   pauses ("recv idle") while the receive buffer is full;
//! - the **writer** exists only while the send buffer is non-empty and drains
//!   it in enqueue order.
//!
//! Dispatch happens on the endpoint's [`Strand`]: exactly one message is
//! offered to the handler at a time, oldest first, and a declined message is
//! retried before anything newer.
//!
//! # Closing
//!
//! [`Endpoint::close`] stops timers and shuts the transport down. If no
//! reactor work is outstanding the finalization hooks run right away,
//! otherwise a delayed-close timer re-checks the [`AsyncGuard`] until the
//! endpoint is quiet and then finalizes. Either way `on_close` and
//! `after_close` run exactly once per close.

use crate::codec::{LengthPacker, LengthUnpacker, Packer, Unpacked, Unpacker};
use crate::error::{CodecError, EndpointError};
use crate::guard::AsyncGuard;
use crate::handler::{Fate, Handler};
use crate::latch::Latch;
use crate::options::{EndpointOptions, ResumeMode};
use crate::queue::MsgQueue;
use crate::reactor::Reactor;
use crate::stats::{Statistic, Statistics, Timed};
use crate::strand::Strand;
use crate::timer::{TimerId, Timers};
use crate::transport::{Packet, Transport};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Re-checks a full receive buffer.
pub const TIMER_CHECK_RECV: TimerId = 0;
/// Re-offers a message the handler declined.
pub const TIMER_DISPATCH_MSG: TimerId = 1;
/// Waits for outstanding work before finalizing a close.
pub const TIMER_DELAY_CLOSE: TimerId = 2;
pub const TIMER_HEARTBEAT_CHECK: TimerId = 3;
/// First identity available to user timers.
pub const TIMER_USER_BEGIN: TimerId = 10;

/// Identity of an endpoint that is not registered anywhere.
pub const UNASSIGNED: u64 = u64::MAX;

/// Packed bytes waiting in the send buffer.
struct Outgoing<P> {
    peer: Option<P>,
    body: Bytes,
}

/// Cloneable handle to one endpoint.
pub struct Endpoint<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    id: AtomicU64,
    reactor: Reactor,
    guard: AsyncGuard,
    strand: Strand,
    timers: Timers,
    options: RwLock<EndpointOptions>,

    handler: RwLock<Arc<dyn Handler<T>>>,
    transport: RwLock<Option<Arc<T>>>,
    packer: RwLock<Arc<dyn Packer>>,
    unpacker: Mutex<Box<dyn Unpacker>>,

    latch: Latch,
    started: AtomicBool,
    sending: AtomicBool,
    reading: AtomicBool,
    recv_idle: AtomicBool,
    dispatching: AtomicBool,
    delay_close_pending: AtomicBool,
    idle_since: Mutex<Option<Instant>>,
    reader: Mutex<Option<JoinHandle<()>>>,

    send_buffer: MsgQueue<Outgoing<T::Peer>>,
    recv_buffer: MsgQueue<Packet<T::Peer>>,
    last_dispatch: Mutex<Option<Timed<Packet<T::Peer>>>>,
    stats: Statistics,
}

/// Why the reader stopped.
#[derive(Debug, PartialEq, Eq)]
enum ReadExit {
    Idle,
    Done,
}

/// Clears the `reading` flag however the reader ends. Owned by the reader
/// future, so an abort before its first poll clears it too.
struct ReadingFlag<T: Transport>(Endpoint<T>);

impl<T: Transport> Drop for ReadingFlag<T> {
    fn drop(&mut self) {
        self.0.inner.reading.store(false, Ordering::SeqCst);
    }
}

impl<T: Transport> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Endpoint<T> {
    /// Endpoint with length-prefixed framing.
    pub fn new(reactor: Reactor, handler: Arc<dyn Handler<T>>, options: EndpointOptions) -> Self {
        Self::with_codec(
            reactor,
            handler,
            options,
            Arc::new(LengthPacker::default()),
            Box::new(LengthUnpacker::default()),
        )
    }

    pub fn with_codec(
        reactor: Reactor,
        handler: Arc<dyn Handler<T>>,
        options: EndpointOptions,
        packer: Arc<dyn Packer>,
        unpacker: Box<dyn Unpacker>,
    ) -> Self {
        let guard = AsyncGuard::new();
        let strand = Strand::new(reactor.handle().clone());
        let timers = Timers::new(reactor.handle().clone(), strand.clone(), guard.clone());
        Self {
            inner: Arc::new(Inner {
                id: AtomicU64::new(UNASSIGNED),
                reactor,
                guard,
                strand,
                timers,
                options: RwLock::new(options),
                handler: RwLock::new(handler),
                transport: RwLock::new(None),
                packer: RwLock::new(packer),
                unpacker: Mutex::new(unpacker),
                latch: Latch::new(),
                started: AtomicBool::new(false),
                sending: AtomicBool::new(false),
                reading: AtomicBool::new(false),
                recv_idle: AtomicBool::new(false),
                dispatching: AtomicBool::new(false),
                delay_close_pending: AtomicBool::new(false),
                idle_since: Mutex::new(None),
                reader: Mutex::new(None),
                send_buffer: MsgQueue::new(),
                recv_buffer: MsgQueue::new(),
                last_dispatch: Mutex::new(None),
                stats: Statistics::default(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Identity and collaborators
    // ---------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.inner.id.store(id, Ordering::Release);
    }

    /// True if both handles refer to the same endpoint.
    #[inline]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[inline]
    pub fn reactor(&self) -> &Reactor {
        &self.inner.reactor
    }

    #[inline]
    pub fn guard(&self) -> &AsyncGuard {
        &self.inner.guard
    }

    pub fn handler(&self) -> Arc<dyn Handler<T>> {
        self.inner.handler.read().clone()
    }

    pub fn set_handler(&self, handler: Arc<dyn Handler<T>>) {
        *self.inner.handler.write() = handler;
    }

    /// Swap the packer. Messages already in the send buffer keep the framing
    /// they were packed with.
    pub fn set_packer(&self, packer: Arc<dyn Packer>) {
        *self.inner.packer.write() = packer;
    }

    pub fn set_unpacker(&self, unpacker: Box<dyn Unpacker>) {
        *self.inner.unpacker.lock() = unpacker;
    }

    /// Bind the I/O object. Replaces any previous transport.
    pub fn attach(&self, transport: T) {
        *self.inner.transport.write() = Some(Arc::new(transport));
    }

    pub fn detach(&self) -> Option<Arc<T>> {
        self.inner.transport.write().take()
    }

    pub fn transport(&self) -> Option<Arc<T>> {
        self.inner.transport.read().clone()
    }

    pub fn options(&self) -> EndpointOptions {
        self.inner.options.read().clone()
    }

    pub fn msg_resuming_interval(&self) -> Duration {
        self.inner.options.read().msg_resuming_interval
    }

    pub fn set_msg_resuming_interval(&self, interval: Duration) {
        self.inner.options.write().msg_resuming_interval = interval;
    }

    pub fn msg_handling_interval(&self) -> Duration {
        self.inner.options.read().msg_handling_interval
    }

    pub fn set_msg_handling_interval(&self, interval: Duration) {
        self.inner.options.write().msg_handling_interval = interval;
    }

    pub fn stats(&self) -> &Statistics {
        &self.inner.stats
    }

    pub fn statistic(&self) -> Statistic {
        self.inner.stats.snapshot()
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    #[inline]
    pub fn started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Started with an open transport.
    pub fn is_ready(&self) -> bool {
        self.started() && self.transport().is_some_and(|t| t.is_open())
    }

    #[inline]
    pub fn is_sending(&self) -> bool {
        self.inner.sending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_recv_idle(&self) -> bool {
        self.inner.recv_idle.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatching.load(Ordering::Acquire)
    }

    /// A close is waiting for outstanding work to drain.
    #[inline]
    pub fn is_closing(&self) -> bool {
        self.inner.delay_close_pending.load(Ordering::Acquire)
    }

    /// Not started, not closing and nothing outstanding on the reactor.
    pub fn obsoleted(&self) -> bool {
        !self.started() && !self.is_closing() && !self.inner.guard.outstanding()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start receiving, sending and (if configured) heartbeat supervision.
    ///
    /// Returns false if the endpoint is already started, still finalizing a
    /// previous close, has no transport, or the reactor is stopped.
    pub fn start(&self) -> bool {
        let Some(_latch) = self.inner.latch.try_acquire() else {
            return false;
        };
        if self.started() || self.is_closing() || self.inner.reactor.is_stopped() {
            return false;
        }
        if self.transport().is_none() {
            warn!("[Endpoint {}] start without a transport", self.id());
            return false;
        }

        self.inner.started.store(true, Ordering::Release);
        self.do_start();
        true
    }

    fn do_start(&self) {
        let stats = &self.inner.stats;
        stats.mark_established();
        stats.touch_recv();

        // Nothing can be queued on the strand here: a previous close only
        // finalized once every token was released.
        self.inner.dispatching.store(false, Ordering::SeqCst);
        self.inner.recv_idle.store(false, Ordering::SeqCst);

        let (heartbeat, max_absence) = {
            let opts = self.inner.options.read();
            (opts.heartbeat_interval, opts.heartbeat_max_absence)
        };
        if let Some(interval) = heartbeat {
            self.start_heartbeat(interval, max_absence);
        }

        info!("[Endpoint {}] started", self.id());
        self.handler().on_start(self);

        self.send_msg();
        self.recv_msg();
        if self.inner.last_dispatch.lock().is_some() || !self.inner.recv_buffer.is_empty() {
            self.dispatch_msg();
        }
    }

    /// Stop all activity and finalize, now or once outstanding work drains.
    ///
    /// Idempotent and safe to call from any callback.
    pub fn close(&self) {
        let Some(_latch) = self.inner.latch.try_acquire() else {
            return;
        };
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }

        self.inner.timers.stop_all_timers(None);
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }
        if let Some(transport) = self.transport() {
            if transport.is_open() {
                transport.shutdown();
                self.inner.stats.mark_broken();
            }
        }

        if self.inner.reactor.is_stopped() || !self.inner.guard.outstanding() {
            debug!("[Endpoint {}] finalizing close", self.id());
            self.finalize();
        } else {
            self.inner.delay_close_pending.store(true, Ordering::Release);
            let interval = self.inner.options.read().delay_close_interval();
            debug!(
                "[Endpoint {}] {} operation(s) outstanding, delaying close",
                self.id(),
                self.inner.guard.count() - 1
            );
            let ep = self.clone();
            self.inner
                .timers
                .set_timer(TIMER_DELAY_CLOSE, interval, move |_| ep.delay_close());
        }
    }

    fn delay_close(&self) -> bool {
        if !self.inner.guard.is_last_in_callback() {
            // Anything but this timer has to go before finalizing.
            self.inner.timers.stop_all_timers(Some(TIMER_DELAY_CLOSE));
            return true;
        }

        self.inner.timers.detach(TIMER_DELAY_CLOSE);
        self.finalize();
        false
    }

    fn finalize(&self) {
        if let Some(transport) = self.transport() {
            transport.close();
        }
        let handler = self.handler();
        handler.on_close(self);
        handler.after_close(self);
        self.inner.delay_close_pending.store(false, Ordering::Release);
    }

    /// Return to a pristine, unstarted state before reuse.
    pub fn reset(&self) {
        if self.inner.delay_close_pending.swap(false, Ordering::AcqRel) {
            self.handler().on_close(self);
        }
        self.inner.timers.stop_all_timers(None);
        if let Some(reader) = self.inner.reader.lock().take() {
            reader.abort();
        }

        self.inner.started.store(false, Ordering::Release);
        self.inner.sending.store(false, Ordering::Release);
        self.inner.recv_idle.store(false, Ordering::Release);
        self.inner.dispatching.store(false, Ordering::Release);
        *self.inner.idle_since.lock() = None;

        self.inner.send_buffer.clear();
        self.inner.recv_buffer.clear();
        *self.inner.last_dispatch.lock() = None;

        self.inner.stats.reset();
        self.inner.unpacker.lock().reset();
        self.inner.packer.read().reset();
        self.set_id(UNASSIGNED);
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    /// Room for at least one more message without overflowing.
    pub fn is_send_buffer_available(&self) -> bool {
        self.inner.send_buffer.len() < self.inner.options.read().max_msg_num
    }

    /// Pack and queue a message for the default peer.
    ///
    /// Returns false only when the send buffer is full and `can_overflow` is
    /// not set. A message the packer refuses is logged and dropped.
    pub fn enqueue_send(&self, body: impl AsRef<[u8]>, can_overflow: bool) -> bool {
        self.enqueue(None, body.as_ref(), can_overflow)
    }

    /// Pack and queue a message for a specific peer.
    pub fn enqueue_send_to(&self, peer: T::Peer, body: impl AsRef<[u8]>, can_overflow: bool) -> bool {
        self.enqueue(Some(peer), body.as_ref(), can_overflow)
    }

    /// Queue already-framed bytes, bypassing the packer.
    pub fn direct_send(&self, packed: impl Into<Bytes>, can_overflow: bool) -> bool {
        self.push_send(
            Outgoing {
                peer: None,
                body: packed.into(),
            },
            can_overflow,
        )
    }

    pub fn direct_send_to(&self, peer: T::Peer, packed: impl Into<Bytes>, can_overflow: bool) -> bool {
        self.push_send(
            Outgoing {
                peer: Some(peer),
                body: packed.into(),
            },
            can_overflow,
        )
    }

    /// Queue a message, waiting for room in the send buffer.
    ///
    /// Gives up and returns false once the endpoint is no longer started.
    pub async fn safe_send(&self, body: Bytes) -> bool {
        loop {
            if self.enqueue_send(&body, false) {
                return true;
            }
            if !self.started() {
                return false;
            }
            let retry = self.inner.options.read().send_retry_interval;
            tokio::time::sleep(retry).await;
        }
    }

    fn enqueue(&self, peer: Option<T::Peer>, body: &[u8], can_overflow: bool) -> bool {
        if !can_overflow && !self.is_send_buffer_available() {
            return false;
        }
        let packed = self.inner.packer.read().pack(body);
        match packed {
            Ok(body) => self.push_send(Outgoing { peer, body }, can_overflow),
            Err(e) => {
                error!("[Endpoint {}] message dropped by packer: {}", self.id(), e);
                true
            }
        }
    }

    fn push_send(&self, item: Outgoing<T::Peer>, can_overflow: bool) -> bool {
        if can_overflow {
            self.inner.send_buffer.push(item);
        } else {
            let bound = self.inner.options.read().max_msg_num;
            if self.inner.send_buffer.push_bounded(item, bound).is_err() {
                return false;
            }
        }
        self.send_msg();
        true
    }

    /// Spawn the writer unless one is already draining.
    fn send_msg(&self) {
        if !self.is_ready() || self.inner.send_buffer.is_empty() {
            return;
        }
        if self
            .inner
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(transport) = self.transport() else {
            self.inner.sending.store(false, Ordering::Release);
            return;
        };

        let token = self.inner.guard.token();
        let ep = self.clone();
        drop(self.inner.reactor.spawn(async move {
            let _token = token;
            ep.write_loop(transport).await;
        }));
    }

    async fn write_loop(&self, transport: Arc<T>) {
        let max_batch = self.inner.options.read().max_send_batch;
        loop {
            let batch: Vec<_> = if T::CONNECTIONLESS {
                self.inner.send_buffer.pop_front().into_iter().collect()
            } else {
                self.inner.send_buffer.pop_batch(max_batch, |o| o.body.len())
            };

            if batch.is_empty() {
                self.inner.sending.store(false, Ordering::SeqCst);
                // A producer may have enqueued after the pop but before the store.
                if self.is_ready()
                    && !self.inner.send_buffer.is_empty()
                    && self
                        .inner
                        .sending
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                return;
            }

            if !self.write_batch(&transport, batch).await {
                self.inner.sending.store(false, Ordering::SeqCst);
                return;
            }
        }
    }

    /// Write one batch; false stops the writer.
    async fn write_batch(&self, transport: &T, batch: Vec<Timed<Outgoing<T::Peer>>>) -> bool {
        let Some(first) = batch.first() else {
            return true;
        };
        let peer = if T::CONNECTIONLESS {
            first.peer.clone().or_else(|| transport.default_peer())
        } else {
            transport.default_peer()
        };
        let Some(peer) = peer else {
            let err = io::Error::new(io::ErrorKind::NotConnected, "no destination for packet");
            self.handler().on_send_error(self, &err);
            return T::CONNECTIONLESS;
        };

        let begin = Instant::now();
        for item in &batch {
            self.inner
                .stats
                .add_send_delay(begin.saturating_duration_since(item.begin()));
        }

        let result = if batch.len() == 1 {
            transport.send(&first.body, &peer).await
        } else {
            let total = batch.iter().map(|o| o.body.len()).sum();
            let mut data = BytesMut::with_capacity(total);
            for item in &batch {
                data.extend_from_slice(&item.body);
            }
            transport.send(&data, &peer).await
        };
        self.inner.stats.add_send_time(begin.elapsed());

        match result {
            Ok(written) => {
                self.inner.stats.record_send(written, batch.len());
                trace!("[Endpoint {}] wrote {} bytes", self.id(), written);

                let handler = self.handler();
                let drained = self.inner.send_buffer.is_empty();
                let mut last = None;
                for item in batch {
                    let packet = Packet {
                        peer: peer.clone(),
                        body: item.into_inner().body,
                    };
                    handler.on_msg_send(self, &packet);
                    last = Some(packet);
                }
                if let (true, Some(last)) = (drained, last) {
                    handler.on_all_msg_send(self, &last);
                }
                true
            }
            Err(e) => {
                self.handler().on_send_error(self, &e);
                T::CONNECTIONLESS && self.is_ready()
            }
        }
    }

    // ---------------------------------------------------------------------
    // Receiving
    // ---------------------------------------------------------------------

    /// Spawn the reader unless one is already running.
    fn recv_msg(&self) {
        if !self.started() || self.inner.reactor.is_stopped() {
            return;
        }
        let Some(transport) = self.transport() else {
            return;
        };
        if self.inner.reading.swap(true, Ordering::SeqCst) {
            return;
        }

        let reading = ReadingFlag(self.clone());
        let token = self.inner.guard.token();
        let ep = self.clone();
        let mut reader = self.inner.reader.lock();
        *reader = Some(self.inner.reactor.spawn(async move {
            let _reading = reading;
            let _token = token;
            if ep.read_loop(transport).await == ReadExit::Idle {
                ep.pause_receiving();
            }
        }));
    }

    async fn read_loop(&self, transport: Arc<T>) -> ReadExit {
        let (read_size, max_msg_num) = {
            let opts = self.inner.options.read();
            (opts.read_buffer_size.max(1), opts.max_msg_num)
        };
        let mut buf = BytesMut::with_capacity(read_size);

        loop {
            if !self.started() {
                return ReadExit::Done;
            }
            if self.inner.recv_buffer.len() >= max_msg_num {
                return ReadExit::Idle;
            }

            buf.reserve(read_size);
            let result = transport.recv(&mut buf).await;
            if !self.started() {
                return ReadExit::Done;
            }

            let failure = match result {
                Ok((0, _)) if !T::CONNECTIONLESS => Some(EndpointError::ConnectionClosed),
                Ok((n, peer)) => {
                    let (batch, malformed) = self.unpack_batch(&mut buf, &peer);
                    self.inner.stats.record_recv(n, batch.len());
                    if !batch.is_empty() {
                        self.inner.recv_buffer.extend(batch);
                        self.dispatch_msg();
                    }
                    malformed.map(EndpointError::Codec)
                }
                Err(e) => Some(EndpointError::Io(e)),
            };

            if let Some(err) = failure {
                if !self.recv_failed(err).await {
                    return ReadExit::Done;
                }
            }
        }
    }

    /// Pull every complete message out of `buf`.
    fn unpack_batch(
        &self,
        buf: &mut BytesMut,
        peer: &T::Peer,
    ) -> (SmallVec<[Packet<T::Peer>; 4]>, Option<CodecError>) {
        let mut unpacker = self.inner.unpacker.lock();
        let mut batch = SmallVec::new();
        loop {
            match unpacker.unpack(buf) {
                Ok(Unpacked::Message(body)) => batch.push(Packet::new(peer.clone(), body)),
                Ok(Unpacked::Heartbeat) => trace!("[Endpoint {}] heartbeat received", self.id()),
                Ok(Unpacked::Incomplete) => break,
                Err(e) => {
                    buf.clear();
                    unpacker.reset();
                    return (batch, Some(e));
                }
            }
        }

        if T::CONNECTIONLESS && !buf.is_empty() {
            let trailing = buf.len();
            buf.clear();
            unpacker.reset();
            return (
                batch,
                Some(CodecError::malformed(format!("{trailing} trailing bytes in datagram"))),
            );
        }
        (batch, None)
    }

    /// Route a receive failure through the handler; true keeps reading.
    async fn recv_failed(&self, err: EndpointError) -> bool {
        let ep = self.clone();
        let fate = self
            .inner
            .strand
            .run(move || {
                ep.handler()
                    .on_recv_error(&ep, &err, Fate::default_for(T::CONNECTIONLESS))
            })
            .await
            .unwrap_or(Fate::Close);

        match fate {
            Fate::Close => {
                self.close();
                false
            }
            Fate::Continue => T::CONNECTIONLESS && self.is_ready(),
        }
    }

    fn pause_receiving(&self) {
        *self.inner.idle_since.lock() = Some(Instant::now());
        self.inner.recv_idle.store(true, Ordering::SeqCst);
        debug!("[Endpoint {}] receive buffer full, receiving paused", self.id());

        let (mode, interval, bound) = {
            let opts = self.inner.options.read();
            (opts.resume_mode, opts.msg_resuming_interval, opts.max_msg_num)
        };
        match mode {
            ResumeMode::Batch => {
                let ep = self.clone();
                self.inner
                    .timers
                    .set_timer(TIMER_CHECK_RECV, interval, move |_| !ep.resume_receiving());
            }
            ResumeMode::AfterHandling => {
                // Dispatch may have drained the buffer before `recv_idle` was visible.
                if self.inner.recv_buffer.len() < bound {
                    self.resume_receiving();
                }
            }
        }
    }

    /// Leave recv idle if the receive buffer has room. Returns false while
    /// the buffer is still full.
    fn resume_receiving(&self) -> bool {
        if !self.started() {
            return true;
        }
        if self.inner.recv_buffer.len() >= self.inner.options.read().max_msg_num {
            return false;
        }
        if self
            .inner
            .recv_idle
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        if let Some(since) = self.inner.idle_since.lock().take() {
            self.inner.stats.add_recv_idle(since.elapsed());
        }
        debug!("[Endpoint {}] receiving resumed", self.id());
        self.recv_msg();
        true
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn dispatch_msg(&self) {
        if self.inner.dispatching.swap(true, Ordering::SeqCst) {
            return;
        }
        self.post_dispatch();
    }

    fn post_dispatch(&self) {
        let token = self.inner.guard.token();
        let ep = self.clone();
        self.inner.strand.post(move || {
            let _token = token;
            ep.do_dispatch();
        });
    }

    /// Offer one message to the handler. Runs on the strand with
    /// `dispatching` held.
    fn do_dispatch(&self) {
        let retried = self.inner.last_dispatch.lock().take();
        let msg = match retried {
            Some(msg) => msg,
            None => match self.inner.recv_buffer.pop_front() {
                Some(msg) => {
                    self.inner.stats.add_dispatch_delay(msg.elapsed());
                    msg
                }
                None => {
                    self.inner.dispatching.store(false, Ordering::SeqCst);
                    // A batch may have landed after the pop but before the store.
                    if !self.inner.recv_buffer.is_empty()
                        && !self.inner.dispatching.swap(true, Ordering::SeqCst)
                    {
                        self.post_dispatch();
                    }
                    return;
                }
            },
        };

        let handler = self.handler();
        let begin = Instant::now();
        let accepted = handler.on_message(self, &msg);
        self.inner.stats.add_handle_time(begin.elapsed());

        if accepted {
            let after_handling =
                self.inner.options.read().resume_mode == ResumeMode::AfterHandling;
            if after_handling && self.is_recv_idle() {
                self.resume_receiving();
            }
            self.post_dispatch();
        } else {
            let mut msg = msg;
            msg.restart();
            *self.inner.last_dispatch.lock() = Some(msg);

            let ep = self.clone();
            self.inner.timers.set_timer(
                TIMER_DISPATCH_MSG,
                self.msg_handling_interval(),
                move |_| {
                    ep.post_dispatch();
                    false
                },
            );
        }
    }

    // ---------------------------------------------------------------------
    // Pending messages
    // ---------------------------------------------------------------------

    pub fn pending_send_count(&self) -> usize {
        self.inner.send_buffer.len()
    }

    pub fn pending_recv_count(&self) -> usize {
        self.inner.recv_buffer.len()
    }

    pub fn pop_first_pending_send(&self) -> Option<Bytes> {
        self.inner
            .send_buffer
            .pop_front()
            .map(|item| item.into_inner().body)
    }

    pub fn pop_first_pending_recv(&self) -> Option<Packet<T::Peer>> {
        self.inner.recv_buffer.pop_front().map(Timed::into_inner)
    }

    pub fn pop_all_pending_send(&self) -> Vec<Bytes> {
        self.inner
            .send_buffer
            .drain_all()
            .into_iter()
            .map(|item| item.into_inner().body)
            .collect()
    }

    pub fn pop_all_pending_recv(&self) -> Vec<Packet<T::Peer>> {
        self.inner
            .recv_buffer
            .drain_all()
            .into_iter()
            .map(Timed::into_inner)
            .collect()
    }

    // ---------------------------------------------------------------------
    // Heartbeat
    // ---------------------------------------------------------------------

    /// Supervise liveness every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero or `max_absence` is zero.
    pub fn start_heartbeat(&self, interval: Duration, max_absence: u32) {
        assert!(
            !interval.is_zero() && max_absence > 0,
            "heartbeat interval and max absence must be positive"
        );
        let ep = self.clone();
        self.inner.timers.set_timer(TIMER_HEARTBEAT_CHECK, interval, move |_| {
            ep.check_heartbeat(interval, max_absence)
        });
    }

    pub fn stop_heartbeat(&self) {
        self.inner.timers.stop_timer(TIMER_HEARTBEAT_CHECK);
    }

    /// One heartbeat tick: detect peer absence and keep the link warm.
    ///
    /// Returns false once the endpoint stops or is closed for silence.
    pub fn check_heartbeat(&self, interval: Duration, max_absence: u32) -> bool {
        if !self.started() {
            return false;
        }

        let now = Instant::now();
        if let (true, Some(last)) = (self.is_ready(), self.inner.stats.last_recv()) {
            let silence = now.saturating_duration_since(last);
            if silence >= interval * max_absence {
                let fate = self
                    .handler()
                    .on_heartbeat_timeout(self, Fate::default_for(T::CONNECTIONLESS));
                if fate == Fate::Close {
                    warn!(
                        "[Endpoint {}] nothing received for {:?}, closing",
                        self.id(),
                        silence
                    );
                    self.close();
                    return false;
                }
            }
        }

        let due = self
            .inner
            .stats
            .last_send()
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due && !self.is_sending() {
            let beat = self.inner.packer.read().heartbeat();
            if let Some(beat) = beat {
                self.direct_send(beat, true);
            }
        }
        true
    }

    // ---------------------------------------------------------------------
    // User timers
    // ---------------------------------------------------------------------

    /// Arm a user timer on the endpoint's strand.
    ///
    /// # Panics
    ///
    /// Panics if `id` is below [`TIMER_USER_BEGIN`].
    pub fn set_timer<F>(&self, id: TimerId, interval: Duration, callback: F)
    where
        F: Fn(TimerId) -> bool + Send + Sync + 'static,
    {
        assert!(
            id >= TIMER_USER_BEGIN,
            "timer ids below {TIMER_USER_BEGIN} are reserved"
        );
        self.inner.timers.set_timer(id, interval, callback);
    }

    pub fn stop_timer(&self, id: TimerId) -> bool {
        assert!(
            id >= TIMER_USER_BEGIN,
            "timer ids below {TIMER_USER_BEGIN} are reserved"
        );
        self.inner.timers.stop_timer(id)
    }

    #[inline]
    pub fn is_timer(&self, id: TimerId) -> bool {
        self.inner.timers.is_timer(id)
    }
}

impl<T: Transport> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id())
            .field("started", &self.started())
            .field("closing", &self.is_closing())
            .field("pending_send", &self.pending_send_count())
            .field("pending_recv", &self.pending_recv_count())
            .field("guard", &self.inner.guard)
            .finish()
    }
}
