//! Shared reactor and the service pump that drives it.
//!
//! One multi-threaded tokio runtime executes every I/O completion and timer
//! firing for all endpoints registered with a [`ServicePump`]. Services
//! (single endpoints, registries, acceptors) plug into the pump through the
//! [`Service`] trait and are initialised when the pump starts.

use crate::options::PumpOptions;

use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable handle to the shared reactor.
///
/// Carries the runtime handle plus a `stopped` flag shared by every clone.
/// A stopped reactor still executes already-scheduled work; it only tells
/// endpoints not to start and to finalize synchronously on close.
#[derive(Clone, Debug)]
pub struct Reactor {
    handle: Handle,
    stopped: Arc<AtomicBool>,
}

impl Reactor {
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind to the runtime the caller is currently running on.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn try_current() -> io::Result<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| io::Error::other(format!("no reactor running: {e}")))
    }

    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::Release);
    }

    /// Schedule a future on the reactor.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Run a closure on a reactor worker.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn(async move { f() }));
    }
}

/// Something the pump starts and stops as a unit.
pub trait Service: Send + Sync {
    /// Bring the service up. Returns false if it failed to start.
    fn init(&self) -> bool;

    /// Bring the service down gracefully.
    fn uninit(&self);

    fn name(&self) -> &str {
        "service"
    }
}

/// Owner of the shared runtime and the services bound to it.
///
/// # Example
///
/// ```rust,no_run
/// use keelson_core::options::PumpOptions;
/// use keelson_core::reactor::ServicePump;
///
/// let pump = ServicePump::new(PumpOptions::default().with_worker_threads(2)).unwrap();
/// pump.start_service();
/// // ... register services, run ...
/// pump.stop_service();
/// ```
pub struct ServicePump {
    runtime: Option<Runtime>,
    reactor: Reactor,
    services: Mutex<Vec<Arc<dyn Service>>>,
    started: AtomicBool,
}

impl ServicePump {
    /// Build the runtime. Services are not started until [`start_service`](Self::start_service).
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built.
    pub fn new(options: PumpOptions) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .thread_name(options.thread_name.clone())
            .enable_all()
            .build()?;
        let reactor = Reactor::from_handle(runtime.handle().clone());
        reactor.set_stopped(true);

        debug!("[ServicePump] runtime up with {} workers", options.worker_threads.max(1));
        Ok(Self {
            runtime: Some(runtime),
            reactor,
            services: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn reactor(&self) -> Reactor {
        self.reactor.clone()
    }

    /// Register a service. If the pump is already running the service is
    /// initialised immediately.
    pub fn add_service(&self, service: Arc<dyn Service>) {
        let running = self.is_service_started();
        self.services.lock().push(service.clone());
        if running && !service.init() {
            warn!("[ServicePump] service '{}' failed to start", service.name());
        }
    }

    /// Start every registered service. Returns false if already started.
    pub fn start_service(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.reactor.set_stopped(false);
        let services: Vec<_> = self.services.lock().clone();
        for service in &services {
            if !service.init() {
                warn!("[ServicePump] service '{}' failed to start", service.name());
            }
        }

        info!("[ServicePump] started {} service(s)", services.len());
        true
    }

    /// Stop every registered service in reverse registration order.
    pub fn stop_service(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        let services: Vec<_> = self.services.lock().clone();
        for service in services.iter().rev() {
            service.uninit();
        }
        self.reactor.set_stopped(true);

        info!("[ServicePump] stopped");
    }

    #[inline]
    pub fn is_service_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_service_started()
    }

    #[inline]
    pub fn service_count(&self) -> usize {
        self.services.lock().len()
    }

    /// Drive a future to completion on the pump's runtime.
    ///
    /// Must not be called from inside the runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.reactor.handle().block_on(fut)
    }
}

impl Drop for ServicePump {
    fn drop(&mut self) {
        self.stop_service();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        uninits: AtomicUsize,
    }

    impl Service for Counting {
        fn init(&self) -> bool {
            self.inits.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn uninit(&self) {
            self.uninits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn start_stop_restart() {
        let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1)).unwrap();
        let svc = Arc::new(Counting::default());
        pump.add_service(svc.clone());
        assert!(pump.reactor().is_stopped());

        assert!(pump.start_service());
        assert!(!pump.start_service());
        assert!(!pump.reactor().is_stopped());
        pump.stop_service();
        assert!(pump.reactor().is_stopped());
        assert!(pump.start_service());
        pump.stop_service();

        assert_eq!(svc.inits.load(Ordering::SeqCst), 2);
        assert_eq!(svc.uninits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_service_is_initialised() {
        let pump = ServicePump::new(PumpOptions::default().with_worker_threads(1)).unwrap();
        pump.start_service();
        let svc = Arc::new(Counting::default());
        pump.add_service(svc.clone());
        assert_eq!(svc.inits.load(Ordering::SeqCst), 1);
        assert_eq!(pump.service_count(), 1);
    }

    #[test]
    fn post_runs_on_reactor() {
        let pump = ServicePump::new(PumpOptions::default().with_worker_threads(2)).unwrap();
        let (tx, rx) = flume::bounded(1);
        pump.reactor().post(move || {
            let _ = tx.send(std::thread::current().name().map(str::to_owned));
        });
        let name = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("keelson-worker"));
    }
}
