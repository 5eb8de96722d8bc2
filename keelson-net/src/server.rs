//! TCP server service.
//!
//! Binds a listener when the pump starts, turns every accepted stream into a
//! registered endpoint with a handler from the factory, and closes them all
//! when the pump stops.

use crate::tcp::{tune, TcpOptions, TcpTransport};

use keelson_core::endpoint::Endpoint;
use keelson_core::handler::Handler;
use keelson_core::reactor::Service;
use keelson_core::registry::Registry;
use keelson_core::transport::Transport;

use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause after a failed accept, typically descriptor exhaustion.
const ACCEPT_RETRY: Duration = Duration::from_millis(500);

/// Builds the handler for each accepted connection.
pub type HandlerFactory<T> = Arc<dyn Fn() -> Arc<dyn Handler<T>> + Send + Sync>;

pub struct TcpServer {
    addr: SocketAddr,
    registry: Arc<Registry<TcpTransport>>,
    factory: HandlerFactory<TcpTransport>,
    tcp: TcpOptions,
    local_addr: Mutex<Option<SocketAddr>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    name: String,
}

impl TcpServer {
    pub fn new<F>(addr: SocketAddr, registry: Arc<Registry<TcpTransport>>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Handler<TcpTransport>> + Send + Sync + 'static,
    {
        Self {
            addr,
            registry,
            factory: Arc::new(factory),
            tcp: TcpOptions::default(),
            local_addr: Mutex::new(None),
            acceptor: Mutex::new(None),
            started: AtomicBool::new(false),
            name: format!("tcp-server {addr}"),
        }
    }

    #[must_use]
    pub fn with_tcp_options(mut self, tcp: TcpOptions) -> Self {
        self.tcp = tcp;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry<TcpTransport>> {
        &self.registry
    }

    /// Bound address while running; resolves port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.registry.size()
    }

    pub fn find(&self, id: u64) -> Option<Endpoint<TcpTransport>> {
        self.registry.find(id)
    }

    /// Queue `body` on every live connection without overflowing.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, body: &[u8]) -> usize {
        let mut sent = 0;
        self.registry.for_each(|ep| {
            if ep.is_ready() && ep.enqueue_send(body, false) {
                sent += 1;
            }
        });
        sent
    }

    fn bind(&self) -> io::Result<TcpListener> {
        let listener = std::net::TcpListener::bind(self.addr)?;
        listener.set_nonblocking(true)?;
        let _ctx = self.registry.reactor().handle().enter();
        TcpListener::from_std(listener)
    }
}

impl Service for TcpServer {
    fn init(&self) -> bool {
        if self.started.load(Ordering::Acquire) {
            return true;
        }

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                warn!("[{}] bind failed: {}", self.name, e);
                return false;
            }
        };
        let local = listener.local_addr().ok();
        *self.local_addr.lock() = local;

        // Connections closed by the previous run are retired first.
        self.registry.clear_obsoleted();
        self.registry.start();

        let task = self.registry.reactor().spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.factory.clone(),
            self.tcp.clone(),
        ));
        *self.acceptor.lock() = Some(task);
        self.started.store(true, Ordering::Release);
        info!("[{}] listening on {:?}", self.name, local);
        true
    }

    fn uninit(&self) {
        self.started.store(false, Ordering::Release);
        if let Some(task) = self.acceptor.lock().take() {
            task.abort();
        }
        *self.local_addr.lock() = None;
        self.registry.stop();
        self.registry.close_all();
        info!("[{}] stopped", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry<TcpTransport>>,
    factory: HandlerFactory<TcpTransport>,
    tcp: TcpOptions,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("[TcpServer] accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY).await;
                continue;
            }
        };

        if let Err(e) = tune(&stream, &tcp) {
            debug!("[TcpServer] tuning {} failed: {}", peer, e);
        }
        let transport = match TcpTransport::new(stream) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("[TcpServer] dropping {}: {}", peer, e);
                continue;
            }
        };

        let ep = registry.create(factory());
        ep.attach(transport);
        if !registry.add(&ep) {
            warn!("[TcpServer] registry full, refusing {}", peer);
            if let Some(transport) = ep.detach() {
                transport.close();
            }
            continue;
        }
        if ep.start() {
            debug!("[TcpServer] accepted {} as endpoint {}", peer, ep.id());
        } else {
            registry.remove(ep.id());
        }
    }
}
