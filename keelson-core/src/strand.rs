//! Per-endpoint serialized execution context.
//!
//! A strand runs posted jobs one at a time, in posting order, on the shared
//! multi-threaded reactor. No worker thread is dedicated to it: the first
//! post onto an idle strand schedules a drain task that runs until the queue
//! is empty. Dispatch, timer callbacks, close and reset of one endpoint all
//! go through its strand, so user handlers observe them strictly ordered and
//! never concurrently.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Jobs drained per task before yielding the worker back to the reactor.
const DRAIN_BUDGET: usize = 64;

#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

struct StrandInner {
    handle: Handle,
    state: Mutex<State>,
}

struct State {
    jobs: VecDeque<Job>,
    running: bool,
}

impl Strand {
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(StrandInner {
                handle,
                state: Mutex::new(State {
                    jobs: VecDeque::new(),
                    running: false,
                }),
            }),
        }
    }

    /// Queue a job behind everything already posted.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.jobs.push_back(Box::new(job));
            !std::mem::replace(&mut state.running, true)
        };
        if schedule {
            Self::schedule(self.inner.clone());
        }
    }

    /// Queue a job and wait for its result.
    ///
    /// Resolves to `None` if the job panicked.
    pub fn run<F, R>(&self, job: F) -> impl Future<Output = Option<R>> + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(job());
        });
        async move { rx.await.ok() }
    }

    /// Jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    /// True while a drain task owns the strand.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    fn schedule(inner: Arc<StrandInner>) {
        let handle = inner.handle.clone();
        drop(handle.spawn(async move { drain(inner) }));
    }
}

fn drain(inner: Arc<StrandInner>) {
    let mut unwind = Unwind {
        inner: &inner,
        armed: true,
    };

    for _ in 0..DRAIN_BUDGET {
        let job = {
            let mut state = inner.state.lock();
            match state.jobs.pop_front() {
                Some(job) => job,
                None => {
                    state.running = false;
                    unwind.armed = false;
                    return;
                }
            }
        };
        job();
    }

    // Budget exhausted: keep ownership and continue in a fresh task.
    unwind.armed = false;
    Strand::schedule(inner.clone());
}

/// Keeps the strand alive when a job panics.
struct Unwind<'a> {
    inner: &'a Arc<StrandInner>,
    armed: bool,
}

impl Drop for Unwind<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let reschedule = {
            let mut state = self.inner.state.lock();
            if state.jobs.is_empty() {
                state.running = false;
                false
            } else {
                true
            }
        };
        if reschedule {
            Strand::schedule(self.inner.clone());
        }
    }
}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Strand")
            .field("pending", &state.jobs.len())
            .field("running", &state.running)
            .finish()
    }
}
