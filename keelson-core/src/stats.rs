//! Per-endpoint traffic statistics.
//!
//! [`Statistics`] is the live, lock-free accumulator owned by an endpoint.
//! [`Statistic`] is a plain snapshot that can be printed, added and
//! subtracted, which is how interval reports are produced:
//!
//! ```rust
//! use keelson_core::stats::Statistics;
//!
//! let stats = Statistics::default();
//! let before = stats.snapshot();
//! stats.record_send(128, 2);
//! let delta = stats.snapshot() - before;
//! assert_eq!(delta.send_bytes, 128);
//! assert_eq!(delta.send_msgs, 2);
//! ```

use once_cell::sync::Lazy;
use std::fmt;
use std::ops::{Add, Deref, DerefMut, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide reference point for timestamps held in atomics.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Encode an instant as nanoseconds after [`EPOCH`], offset by one so that
/// zero can mean "never".
fn encode(at: Instant) -> u64 {
    let nanos = at.saturating_duration_since(*EPOCH).as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX - 1) + 1
}

fn decode(raw: u64) -> Option<Instant> {
    match raw {
        0 => None,
        n => Some(*EPOCH + Duration::from_nanos(n - 1)),
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Live counters, updated from reader, writer and dispatch paths.
#[derive(Debug, Default)]
pub struct Statistics {
    send_bytes: AtomicU64,
    send_msgs: AtomicU64,
    send_delay: AtomicU64,
    send_time: AtomicU64,

    recv_bytes: AtomicU64,
    recv_msgs: AtomicU64,
    dispatch_delay: AtomicU64,
    handle_time: AtomicU64,
    recv_idle: AtomicU64,

    last_send: AtomicU64,
    last_recv: AtomicU64,
    establish: AtomicU64,
    broken: AtomicU64,
}

impl Statistics {
    pub fn record_send(&self, bytes: usize, msgs: usize) {
        self.send_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.send_msgs.fetch_add(msgs as u64, Ordering::Relaxed);
        self.last_send.store(encode(Instant::now()), Ordering::Relaxed);
    }

    /// Time between enqueueing a packet and handing it to the transport.
    pub fn add_send_delay(&self, d: Duration) {
        self.send_delay.fetch_add(nanos(d), Ordering::Relaxed);
    }

    /// Time spent inside transport writes.
    pub fn add_send_time(&self, d: Duration) {
        self.send_time.fetch_add(nanos(d), Ordering::Relaxed);
    }

    pub fn record_recv(&self, bytes: usize, msgs: usize) {
        self.recv_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.recv_msgs.fetch_add(msgs as u64, Ordering::Relaxed);
        self.touch_recv();
    }

    /// Mark traffic as seen now without counting anything.
    pub fn touch_recv(&self) {
        self.last_recv.store(encode(Instant::now()), Ordering::Relaxed);
    }

    /// Time a message waited in the receive buffer before dispatch.
    pub fn add_dispatch_delay(&self, d: Duration) {
        self.dispatch_delay.fetch_add(nanos(d), Ordering::Relaxed);
    }

    /// Time the handler spent on a message.
    pub fn add_handle_time(&self, d: Duration) {
        self.handle_time.fetch_add(nanos(d), Ordering::Relaxed);
    }

    pub fn add_recv_idle(&self, d: Duration) {
        self.recv_idle.fetch_add(nanos(d), Ordering::Relaxed);
    }

    pub fn mark_established(&self) {
        self.establish.store(encode(Instant::now()), Ordering::Relaxed);
        self.broken.store(0, Ordering::Relaxed);
    }

    pub fn mark_broken(&self) {
        self.broken.store(encode(Instant::now()), Ordering::Relaxed);
    }

    #[inline]
    pub fn last_send(&self) -> Option<Instant> {
        decode(self.last_send.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn last_recv(&self) -> Option<Instant> {
        decode(self.last_recv.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        for counter in [
            &self.send_bytes,
            &self.send_msgs,
            &self.send_delay,
            &self.send_time,
            &self.recv_bytes,
            &self.recv_msgs,
            &self.dispatch_delay,
            &self.handle_time,
            &self.recv_idle,
            &self.last_send,
            &self.last_recv,
            &self.establish,
            &self.broken,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Statistic {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Statistic {
            send_bytes: load(&self.send_bytes),
            send_msgs: load(&self.send_msgs),
            send_delay: Duration::from_nanos(load(&self.send_delay)),
            send_time: Duration::from_nanos(load(&self.send_time)),
            recv_bytes: load(&self.recv_bytes),
            recv_msgs: load(&self.recv_msgs),
            dispatch_delay: Duration::from_nanos(load(&self.dispatch_delay)),
            handle_time: Duration::from_nanos(load(&self.handle_time)),
            recv_idle: Duration::from_nanos(load(&self.recv_idle)),
            last_send: self.last_send(),
            last_recv: self.last_recv(),
            established: decode(load(&self.establish)),
            broken: decode(load(&self.broken)),
        }
    }
}

/// Point-in-time copy of [`Statistics`].
///
/// `Add` and `Sub` combine the counters; the instants are taken from the
/// left-hand side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistic {
    pub send_bytes: u64,
    pub send_msgs: u64,
    pub send_delay: Duration,
    pub send_time: Duration,
    pub recv_bytes: u64,
    pub recv_msgs: u64,
    pub dispatch_delay: Duration,
    pub handle_time: Duration,
    pub recv_idle: Duration,
    pub last_send: Option<Instant>,
    pub last_recv: Option<Instant>,
    pub established: Option<Instant>,
    pub broken: Option<Instant>,
}

impl Add for Statistic {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            send_bytes: self.send_bytes + rhs.send_bytes,
            send_msgs: self.send_msgs + rhs.send_msgs,
            send_delay: self.send_delay + rhs.send_delay,
            send_time: self.send_time + rhs.send_time,
            recv_bytes: self.recv_bytes + rhs.recv_bytes,
            recv_msgs: self.recv_msgs + rhs.recv_msgs,
            dispatch_delay: self.dispatch_delay + rhs.dispatch_delay,
            handle_time: self.handle_time + rhs.handle_time,
            recv_idle: self.recv_idle + rhs.recv_idle,
            ..self
        }
    }
}

impl Sub for Statistic {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            send_bytes: self.send_bytes.saturating_sub(rhs.send_bytes),
            send_msgs: self.send_msgs.saturating_sub(rhs.send_msgs),
            send_delay: self.send_delay.saturating_sub(rhs.send_delay),
            send_time: self.send_time.saturating_sub(rhs.send_time),
            recv_bytes: self.recv_bytes.saturating_sub(rhs.recv_bytes),
            recv_msgs: self.recv_msgs.saturating_sub(rhs.recv_msgs),
            dispatch_delay: self.dispatch_delay.saturating_sub(rhs.dispatch_delay),
            handle_time: self.handle_time.saturating_sub(rhs.handle_time),
            recv_idle: self.recv_idle.saturating_sub(rhs.recv_idle),
            ..self
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "send:")?;
        writeln!(f, "  bytes: {}, msgs: {}", self.send_bytes, self.send_msgs)?;
        writeln!(f, "  delay: {:?}, write time: {:?}", self.send_delay, self.send_time)?;
        writeln!(f, "recv:")?;
        writeln!(f, "  bytes: {}, msgs: {}", self.recv_bytes, self.recv_msgs)?;
        writeln!(
            f,
            "  dispatch delay: {:?}, handle time: {:?}, idle: {:?}",
            self.dispatch_delay, self.handle_time, self.recv_idle
        )?;
        match (self.established, self.broken) {
            (Some(up), Some(down)) => write!(f, "connection lasted {:?}", down.saturating_duration_since(up)),
            (Some(up), None) => write!(f, "connection up for {:?}", up.elapsed()),
            _ => write!(f, "never connected"),
        }
    }
}

/// Item stamped with the instant it entered a buffer.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    item: T,
    begin: Instant,
}

impl<T> Timed<T> {
    pub fn new(item: T) -> Self {
        Self {
            item,
            begin: Instant::now(),
        }
    }

    pub(crate) fn stamped(item: T, begin: Instant) -> Self {
        Self { item, begin }
    }

    /// Re-stamp with the current instant.
    pub fn restart(&mut self) {
        self.begin = Instant::now();
    }

    #[inline]
    pub fn begin(&self) -> Instant {
        self.begin
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.begin.elapsed()
    }

    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> Deref for Timed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> DerefMut for Timed<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instants_survive_encoding() {
        let now = Instant::now();
        let back = decode(encode(now)).unwrap();
        assert!(back <= now && now - back < Duration::from_micros(1));
        assert_eq!(decode(0), None);
    }

    #[test]
    fn snapshot_and_reset() {
        let stats = Statistics::default();
        assert!(stats.last_recv().is_none());

        stats.record_recv(10, 1);
        stats.record_send(20, 2);
        stats.add_handle_time(Duration::from_millis(3));
        stats.mark_established();

        let snap = stats.snapshot();
        assert_eq!(snap.recv_bytes, 10);
        assert_eq!(snap.send_msgs, 2);
        assert_eq!(snap.handle_time, Duration::from_millis(3));
        assert!(snap.last_recv.is_some());
        assert!(snap.to_string().contains("connection up for"));

        stats.reset();
        assert_eq!(stats.snapshot(), Statistic::default());
    }

    #[test]
    fn arithmetic_keeps_left_instants() {
        let a = Statistic {
            recv_msgs: 5,
            recv_idle: Duration::from_millis(5),
            last_recv: Some(Instant::now()),
            ..Statistic::default()
        };
        let b = Statistic {
            recv_msgs: 2,
            recv_idle: Duration::from_millis(9),
            ..Statistic::default()
        };
        let sum = a + b;
        assert_eq!(sum.recv_msgs, 7);
        assert_eq!(sum.last_recv, a.last_recv);

        let diff = a - b;
        assert_eq!(diff.recv_msgs, 3);
        assert_eq!(diff.recv_idle, Duration::ZERO);
    }

    #[test]
    fn timed_restart_moves_begin() {
        let mut t = Timed::new(7u8);
        let first = t.begin();
        std::thread::sleep(Duration::from_millis(2));
        t.restart();
        assert!(t.begin() > first);
        assert_eq!(*t, 7);
        assert_eq!(t.into_inner(), 7);
    }
}
