//! Service wrappers binding endpoints to a [`ServicePump`](crate::reactor::ServicePump).

use crate::endpoint::Endpoint;
use crate::handler::Handler;
use crate::reactor::Service;
use crate::registry::Registry;
use crate::transport::Transport;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Produces a fresh transport when a service (re)starts without an open one.
pub type Opener<T> = Box<dyn Fn() -> io::Result<T> + Send + Sync>;

/// Exactly one always-present endpoint.
pub struct SingleSocketService<T: Transport> {
    endpoint: Endpoint<T>,
    opener: Option<Opener<T>>,
    name: String,
}

impl<T: Transport> SingleSocketService<T> {
    pub fn new(endpoint: Endpoint<T>) -> Self {
        Self {
            endpoint,
            opener: None,
            name: "single-socket".to_string(),
        }
    }

    /// Reopen the transport on every `init` that finds it missing or closed.
    ///
    /// The opener runs inside the reactor's context, so it may register
    /// sockets with it.
    #[must_use]
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        self.opener = Some(Box::new(opener));
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }
}

impl<T: Transport> Service for SingleSocketService<T> {
    fn init(&self) -> bool {
        if let Some(opener) = &self.opener {
            let closed = self.endpoint.transport().map_or(true, |t| !t.is_open());
            if closed {
                let _ctx = self.endpoint.reactor().handle().enter();
                match opener() {
                    Ok(transport) => self.endpoint.attach(transport),
                    Err(e) => {
                        warn!("[{}] cannot open transport: {}", self.name, e);
                        return false;
                    }
                }
            }
        }
        self.endpoint.start()
    }

    fn uninit(&self) {
        self.endpoint.close();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A registry of endpoints started and stopped as a unit.
///
/// Endpoints added while the service is running are started right away;
/// endpoints added before that are started in bulk by `init`.
pub struct MultiSocketService<T: Transport> {
    registry: Arc<Registry<T>>,
    started: AtomicBool,
    name: String,
}

impl<T: Transport> MultiSocketService<T> {
    pub fn new(registry: Arc<Registry<T>>) -> Self {
        Self {
            registry,
            started: AtomicBool::new(false),
            name: "multi-socket".to_string(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry<T>> {
        &self.registry
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn create(&self, handler: Arc<dyn Handler<T>>) -> Endpoint<T> {
        self.registry.create(handler)
    }

    /// Register an endpoint, starting it if the service is running.
    pub fn add_socket(&self, ep: &Endpoint<T>) -> bool {
        if !self.registry.add(ep) {
            return false;
        }
        if self.is_started() {
            ep.start();
        }
        true
    }

    pub fn find(&self, id: u64) -> Option<Endpoint<T>> {
        self.registry.find(id)
    }

    pub fn exists(&self, id: u64) -> bool {
        self.registry.exists(id)
    }

    /// Detach an endpoint without closing it.
    pub fn remove(&self, id: u64) -> bool {
        self.registry.remove(id)
    }

    pub fn size(&self) -> usize {
        self.registry.size()
    }

    pub fn close_all(&self) {
        self.registry.close_all();
    }
}

impl<T: Transport> Service for MultiSocketService<T> {
    fn init(&self) -> bool {
        self.registry.for_each(|ep| {
            ep.start();
        });
        self.registry.start();
        self.started.store(true, Ordering::Release);
        info!("[{}] started {} endpoint(s)", self.name, self.registry.size());
        true
    }

    fn uninit(&self) {
        self.started.store(false, Ordering::Release);
        self.registry.stop();
        self.registry.close_all();
        info!("[{}] stopped", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
