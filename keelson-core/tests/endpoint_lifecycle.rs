//! Endpoint behaviour over the in-process transport.

use bytes::{Bytes, BytesMut};
use keelson_core::codec::{LengthPacker, LengthUnpacker, Packer, Unpacked, Unpacker};
use keelson_core::endpoint::Endpoint;
use keelson_core::handler::{Fate, Handler};
use keelson_core::inproc::{pair, InprocTransport};
use keelson_core::options::{EndpointOptions, ResumeMode};
use keelson_core::reactor::Reactor;
use keelson_core::transport::{Packet, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Ep = Endpoint<InprocTransport>;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Bytes>>,
    attempts: Mutex<HashMap<Bytes, usize>>,
    decline_once: Mutex<Vec<Bytes>>,
    busy: AtomicBool,
    overlaps: AtomicUsize,
    closes: AtomicUsize,
    after_closes: AtomicUsize,
    heartbeat_timeouts: AtomicUsize,
    tolerate_eof: bool,
    tolerate_silence: bool,
}

impl Recorder {
    fn seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }
}

impl Handler<InprocTransport> for Recorder {
    fn on_message(&self, _ep: &Ep, msg: &Packet<String>) -> bool {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        *self.attempts.lock().entry(msg.body.clone()).or_default() += 1;

        let accepted = {
            let mut decline = self.decline_once.lock();
            match decline.iter().position(|b| *b == msg.body) {
                Some(pos) => {
                    decline.remove(pos);
                    false
                }
                None => true,
            }
        };
        if accepted {
            self.seen.lock().push(msg.body.clone());
        }
        self.busy.store(false, Ordering::SeqCst);
        accepted
    }

    fn on_recv_error(&self, _ep: &Ep, _err: &keelson_core::error::EndpointError, default: Fate) -> Fate {
        if self.tolerate_eof {
            Fate::Continue
        } else {
            default
        }
    }

    fn on_heartbeat_timeout(&self, _ep: &Ep, default: Fate) -> Fate {
        self.heartbeat_timeouts.fetch_add(1, Ordering::SeqCst);
        if self.tolerate_silence {
            Fate::Continue
        } else {
            default
        }
    }

    fn on_close(&self, _ep: &Ep) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn after_close(&self, _ep: &Ep) {
        self.after_closes.fetch_add(1, Ordering::SeqCst);
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn frame(msg: &str) -> Bytes {
    LengthPacker::default().pack(msg.as_bytes()).unwrap()
}

fn started(rec: Arc<Recorder>, options: EndpointOptions) -> (Ep, InprocTransport) {
    let (local, remote) = pair("local", "remote");
    let ep = Endpoint::new(Reactor::try_current().unwrap(), rec, options);
    ep.attach(local);
    assert!(ep.start());
    (ep, remote)
}

async fn push(remote: &InprocTransport, bytes: &[u8]) {
    remote.send(bytes, &"local".to_string()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_chunk_two_messages_in_order() {
    let rec = Arc::new(Recorder::default());
    let (ep, remote) = started(rec.clone(), EndpointOptions::default());

    let mut chunk = BytesMut::new();
    chunk.extend_from_slice(&frame("A"));
    chunk.extend_from_slice(&frame("B"));
    push(&remote, &chunk).await;

    eventually("two messages", || rec.seen().len() == 2).await;
    assert_eq!(rec.seen(), ["A", "B"]);
    assert_eq!(ep.statistic().recv_msgs, 2);
    assert_eq!(ep.statistic().recv_bytes, chunk.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn split_frames_dispatch_in_order_without_overlap() {
    let rec = Arc::new(Recorder::default());
    let (_ep, remote) = started(rec.clone(), EndpointOptions::default());

    let mut wire = BytesMut::new();
    for i in 0..300 {
        wire.extend_from_slice(&frame(&i.to_string()));
    }
    // Odd chunk sizes so frames straddle reads.
    for piece in wire.chunks(7) {
        push(&remote, piece).await;
    }

    eventually("all messages", || rec.seen().len() == 300).await;
    let expected: Vec<String> = (0..300).map(|i| i.to_string()).collect();
    assert_eq!(rec.seen(), expected);
    assert_eq!(rec.overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn declined_message_is_retried_before_next() {
    let rec = Arc::new(Recorder::default());
    rec.decline_once.lock().push(Bytes::from_static(b"2"));
    let options = EndpointOptions::default().with_msg_handling_interval(Duration::from_millis(10));
    let (ep, remote) = started(rec.clone(), options);

    for m in ["1", "2", "3"] {
        push(&remote, &frame(m)).await;
    }

    eventually("three accepted", || rec.seen().len() == 3).await;
    assert_eq!(rec.seen(), ["1", "2", "3"]);
    assert_eq!(rec.attempts.lock()[&Bytes::from_static(b"2")], 2);
    assert_eq!(rec.attempts.lock()[&Bytes::from_static(b"3")], 1);
    assert!(!ep.is_dispatching() || ep.pending_recv_count() == 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_buffer_bound_and_overflow() {
    let rec = Arc::new(Recorder::default());
    let (local, _remote) = pair("local", "remote");
    let ep = Endpoint::new(
        Reactor::try_current().unwrap(),
        rec,
        EndpointOptions::default().with_max_msg_num(2),
    );
    ep.attach(local);

    // Not started: nothing drains the buffer.
    assert!(ep.enqueue_send("one", false));
    assert!(ep.enqueue_send("two", false));
    assert!(!ep.is_send_buffer_available());
    assert!(!ep.enqueue_send("three", false));
    assert_eq!(ep.pending_send_count(), 2);

    assert!(ep.enqueue_send("three", true));
    assert!(ep.enqueue_send("four", true));
    assert_eq!(ep.pending_send_count(), 4);

    assert_eq!(ep.pop_first_pending_send(), Some(frame("one")));
    assert_eq!(ep.pop_all_pending_send().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_preserve_enqueue_order() {
    let rec = Arc::new(Recorder::default());
    let (ep, remote) = started(rec, EndpointOptions::default().with_max_send_batch(64));

    let producer = ep.clone();
    let sender = tokio::spawn(async move {
        for i in 0..200 {
            assert!(producer.safe_send(Bytes::from(i.to_string())).await);
        }
    });

    let mut buf = BytesMut::new();
    let mut unpacker = LengthUnpacker::default();
    let mut got = Vec::new();
    while got.len() < 200 {
        remote.recv(&mut buf).await.unwrap();
        while let Unpacked::Message(m) = unpacker.unpack(&mut buf).unwrap() {
            got.push(String::from_utf8(m.to_vec()).unwrap());
        }
    }
    sender.await.unwrap();

    let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    assert_eq!(got, expected);
    eventually("stats settle", || ep.statistic().send_msgs == 200).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quiet_endpoint_closes_synchronously() {
    let rec = Arc::new(Recorder {
        tolerate_eof: true,
        ..Recorder::default()
    });
    let (ep, remote) = started(rec.clone(), EndpointOptions::default());

    // Peer goes away; the handler keeps the endpoint, so the reader just ends.
    remote.shutdown();
    eventually("reader gone", || !ep.guard().outstanding()).await;
    assert!(ep.started());

    ep.close();
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
    assert_eq!(rec.after_closes.load(Ordering::SeqCst), 1);
    assert!(!ep.is_closing());
    assert!(ep.obsoleted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_waits_for_outstanding_work() {
    let rec = Arc::new(Recorder::default());
    let (ep, _remote) = started(rec.clone(), EndpointOptions::default());

    let in_flight = ep.guard().token();
    ep.close();
    assert!(ep.is_closing());
    assert!(!ep.started());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rec.closes.load(Ordering::SeqCst), 0);

    drop(in_flight);
    eventually("finalized", || rec.closes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(rec.after_closes.load(Ordering::SeqCst), 1);
    eventually("quiesced", || ep.obsoleted()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_close_finalizes_once() {
    let rec = Arc::new(Recorder::default());
    let (ep, _remote) = started(rec.clone(), EndpointOptions::default());

    let barrier = Arc::new(std::sync::Barrier::new(8));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let ep = ep.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                ep.close();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    eventually("finalized", || rec.after_closes.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
    assert_eq!(rec.after_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_eof_closes_stream_endpoint() {
    let rec = Arc::new(Recorder::default());
    let (ep, remote) = started(rec.clone(), EndpointOptions::default());

    remote.shutdown();
    eventually("closed", || rec.after_closes.load(Ordering::SeqCst) == 1).await;
    assert!(!ep.started());
    assert!(ep.statistic().broken.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_times_out_once() {
    let rec = Arc::new(Recorder::default());
    let options = EndpointOptions::default().with_heartbeat(Duration::from_millis(20), 2);
    let (ep, remote) = started(rec.clone(), options);

    // Heartbeats go out while we wait.
    let mut buf = BytesMut::new();
    remote.recv(&mut buf).await.unwrap();
    assert_eq!(
        LengthUnpacker::default().unpack(&mut buf).unwrap(),
        Unpacked::Heartbeat
    );

    eventually("closed by heartbeat", || rec.closes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(rec.heartbeat_timeouts.load(Ordering::SeqCst), 1);
    assert!(!ep.started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tolerated_silence_keeps_firing() {
    let rec = Arc::new(Recorder {
        tolerate_silence: true,
        ..Recorder::default()
    });
    let options = EndpointOptions::default().with_heartbeat(Duration::from_millis(10), 1);
    let (ep, _remote) = started(rec.clone(), options);

    eventually("several timeouts", || rec.heartbeat_timeouts.load(Ordering::SeqCst) >= 3).await;
    assert!(ep.started());
    assert_eq!(rec.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_receive_buffer_pauses_and_resumes() {
    for mode in [ResumeMode::Batch, ResumeMode::AfterHandling] {
        let rec = Arc::new(Recorder::default());
        for m in ["0", "1", "2"] {
            rec.decline_once.lock().push(Bytes::from(m));
        }
        let options = EndpointOptions::default()
            .with_max_msg_num(1)
            .with_resume_mode(mode)
            .with_msg_resuming_interval(Duration::from_millis(5))
            .with_msg_handling_interval(Duration::from_millis(5));
        let (ep, remote) = started(rec.clone(), options);

        for i in 0..20 {
            push(&remote, &frame(&i.to_string())).await;
        }

        eventually("all delivered", || rec.seen().len() == 20).await;
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(rec.seen(), expected, "mode {mode:?}");
        eventually("receiving resumed", || {
            !ep.is_recv_idle() && ep.statistic().recv_idle > Duration::ZERO
        })
        .await;
        ep.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_input_is_a_receive_error() {
    let rec = Arc::new(Recorder::default());
    let (ep, remote) = started(rec.clone(), EndpointOptions::default());

    // Declares a 1-byte frame, shorter than the header itself.
    push(&remote, &[0, 1, 0xff]).await;
    eventually("closed", || rec.closes.load(Ordering::SeqCst) == 1).await;
    assert!(!ep.started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_timer_runs_until_false() {
    let rec = Arc::new(Recorder::default());
    let (ep, _remote) = started(rec, EndpointOptions::default());

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    ep.set_timer(keelson_core::endpoint::TIMER_USER_BEGIN, Duration::from_millis(5), move |_| {
        counter.fetch_add(1, Ordering::SeqCst) < 2
    });
    eventually("timer done", || !ep.is_timer(keelson_core::endpoint::TIMER_USER_BEGIN)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[should_panic(expected = "reserved")]
async fn reserved_timer_ids_are_refused() {
    let rec = Arc::new(Recorder::default());
    let (ep, _remote) = started(rec, EndpointOptions::default());
    ep.set_timer(keelson_core::endpoint::TIMER_DELAY_CLOSE, Duration::from_millis(5), |_| false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_restores_pristine_state() {
    let rec = Arc::new(Recorder {
        tolerate_eof: true,
        ..Recorder::default()
    });
    let (ep, remote) = started(rec.clone(), EndpointOptions::default());
    push(&remote, &frame("x")).await;
    eventually("received", || rec.seen().len() == 1).await;

    ep.close();
    eventually("finalized", || ep.obsoleted()).await;
    ep.enqueue_send("leftover", true);

    ep.reset();
    assert_eq!(ep.pending_send_count(), 0);
    assert_eq!(ep.statistic().recv_msgs, 0);
    assert_eq!(ep.id(), keelson_core::endpoint::UNASSIGNED);

    // A fresh transport brings it back to life.
    let (local, remote) = pair("local", "remote");
    ep.attach(local);
    assert!(ep.start());
    push(&remote, &frame("y")).await;
    eventually("received again", || rec.seen().len() == 2).await;
}

#[tokio::test(flavor = "current_thread")]
async fn restart_after_close_before_first_read() {
    let rec = Arc::new(Recorder::default());
    let (ep, _first_remote) = started(rec.clone(), EndpointOptions::default());
    // The reader task has not been polled yet.
    ep.close();
    eventually("finalized", || ep.obsoleted()).await;
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);

    let (local, remote) = pair("local", "remote");
    ep.attach(local);
    assert!(ep.start());
    push(&remote, &frame("X")).await;
    eventually("received after restart", || rec.seen().len() == 1).await;
    assert_eq!(rec.seen(), ["X"]);
}
