//! TCP client side: connecting endpoints and keeping them connected.

use crate::tcp::{TcpOptions, TcpTransport};

use keelson_core::endpoint::Endpoint;
use keelson_core::error::EndpointError;
use keelson_core::guard::AsyncToken;
use keelson_core::handler::{Fate, Handler};
use keelson_core::options::ReconnectOptions;
use keelson_core::reactor::Service;
use keelson_core::reconnect::ReconnectState;
use keelson_core::transport::{Packet, Transport};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connect `ep` to `addr` and start it.
///
/// # Errors
///
/// Returns the connect error, or an error if the endpoint refuses to start
/// (already started, still closing, or the reactor is stopped).
pub async fn connect(ep: &Endpoint<TcpTransport>, addr: SocketAddr, tcp: &TcpOptions) -> io::Result<()> {
    let transport = TcpTransport::connect(addr, tcp).await?;
    attach_and_start(ep, transport)
}

fn attach_and_start(ep: &Endpoint<TcpTransport>, transport: TcpTransport) -> io::Result<()> {
    ep.attach(transport);
    if ep.start() {
        Ok(())
    } else {
        Err(io::Error::other("endpoint refused to start"))
    }
}

/// Shared on/off state for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectSwitch(Arc<AtomicBool>);

impl Default for ReconnectSwitch {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl ReconnectSwitch {
    pub fn enable(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct Target {
    addr: SocketAddr,
    tcp: TcpOptions,
    backoff: ReconnectOptions,
    switch: ReconnectSwitch,
}

/// Connect with exponential backoff until it works, attempts run out, or
/// reconnection is switched off.
async fn connect_with_backoff(ep: Endpoint<TcpTransport>, target: Target, first_now: bool, _token: AsyncToken) {
    let mut backoff = ReconnectState::new(&target.backoff);
    let mut delay = if first_now {
        Some(std::time::Duration::ZERO)
    } else {
        backoff.next_delay()
    };

    while let Some(wait) = delay {
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        if !target.switch.is_enabled() || ep.reactor().is_stopped() || ep.started() {
            return;
        }

        match TcpTransport::connect(target.addr, &target.tcp).await {
            Ok(transport) if target.switch.is_enabled() => match attach_and_start(&ep, transport) {
                Ok(()) => {
                    info!("[TcpClient] connected to {}", target.addr);
                    return;
                }
                Err(e) => debug!("[TcpClient] {}: {}", target.addr, e),
            },
            Ok(transport) => {
                transport.close();
                return;
            }
            Err(e) => debug!("[TcpClient] connecting to {} failed: {}", target.addr, e),
        }
        delay = backoff.next_delay();
    }
    warn!(
        "[TcpClient] giving up on {} after {} attempt(s)",
        target.addr,
        backoff.attempt()
    );
}

/// Handler wrapper that reconnects its endpoint after every close.
///
/// All hooks are forwarded to the wrapped handler; once `after_close` has
/// run, a reconnect is scheduled with exponential backoff unless the
/// [`ReconnectSwitch`] is off.
pub struct Reconnect<H> {
    inner: H,
    target: Target,
}

impl<H: Handler<TcpTransport>> Reconnect<H> {
    pub fn new(inner: H, addr: SocketAddr) -> Self {
        Self {
            inner,
            target: Target {
                addr,
                tcp: TcpOptions::default(),
                backoff: ReconnectOptions::default(),
                switch: ReconnectSwitch::default(),
            },
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ReconnectOptions) -> Self {
        self.target.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_tcp_options(mut self, tcp: TcpOptions) -> Self {
        self.target.tcp = tcp;
        self
    }

    #[inline]
    pub fn inner(&self) -> &H {
        &self.inner
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.target.addr
    }

    /// Handle for turning reconnection off and on.
    pub fn switch(&self) -> ReconnectSwitch {
        self.target.switch.clone()
    }
}

impl<H: Handler<TcpTransport>> Handler<TcpTransport> for Reconnect<H> {
    fn on_message(&self, ep: &Endpoint<TcpTransport>, msg: &Packet<SocketAddr>) -> bool {
        self.inner.on_message(ep, msg)
    }

    fn on_start(&self, ep: &Endpoint<TcpTransport>) {
        self.inner.on_start(ep);
    }

    fn on_msg_send(&self, ep: &Endpoint<TcpTransport>, packet: &Packet<SocketAddr>) {
        self.inner.on_msg_send(ep, packet);
    }

    fn on_all_msg_send(&self, ep: &Endpoint<TcpTransport>, last: &Packet<SocketAddr>) {
        self.inner.on_all_msg_send(ep, last);
    }

    fn on_send_error(&self, ep: &Endpoint<TcpTransport>, err: &io::Error) {
        self.inner.on_send_error(ep, err);
    }

    fn on_recv_error(&self, ep: &Endpoint<TcpTransport>, err: &EndpointError, default: Fate) -> Fate {
        self.inner.on_recv_error(ep, err, default)
    }

    fn on_heartbeat_timeout(&self, ep: &Endpoint<TcpTransport>, default: Fate) -> Fate {
        self.inner.on_heartbeat_timeout(ep, default)
    }

    fn on_close(&self, ep: &Endpoint<TcpTransport>) {
        self.inner.on_close(ep);
    }

    fn after_close(&self, ep: &Endpoint<TcpTransport>) {
        self.inner.after_close(ep);
        if !self.target.switch.is_enabled() || ep.reactor().is_stopped() {
            return;
        }
        debug!("[TcpClient] scheduling reconnect to {}", self.target.addr);
        let token = ep.guard().token();
        let task = ep
            .reactor()
            .spawn(connect_with_backoff(ep.clone(), self.target.clone(), false, token));
        drop(task);
    }
}

/// Service running one client endpoint against a fixed server address.
///
/// `init` connects in the background (retrying with backoff); `uninit`
/// switches reconnection off and closes the endpoint.
pub struct TcpClient {
    endpoint: Endpoint<TcpTransport>,
    target: Target,
    name: String,
}

impl TcpClient {
    pub fn new(endpoint: Endpoint<TcpTransport>, addr: SocketAddr) -> Self {
        Self {
            endpoint,
            target: Target {
                addr,
                tcp: TcpOptions::default(),
                backoff: ReconnectOptions::default(),
                switch: ReconnectSwitch::default(),
            },
            name: format!("tcp-client {addr}"),
        }
    }

    /// Share the switch of the endpoint's [`Reconnect`] handler, so stopping
    /// the service also stops reconnection.
    #[must_use]
    pub fn with_switch(mut self, switch: ReconnectSwitch) -> Self {
        self.target.switch = switch;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ReconnectOptions) -> Self {
        self.target.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_tcp_options(mut self, tcp: TcpOptions) -> Self {
        self.target.tcp = tcp;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Endpoint<TcpTransport> {
        &self.endpoint
    }
}

impl Service for TcpClient {
    fn init(&self) -> bool {
        self.target.switch.enable();
        let task = self.endpoint.reactor().spawn(connect_with_backoff(
            self.endpoint.clone(),
            self.target.clone(),
            true,
            self.endpoint.guard().token(),
        ));
        drop(task);
        true
    }

    fn uninit(&self) {
        self.target.switch.disable();
        self.endpoint.close();
    }

    fn name(&self) -> &str {
        &self.name
    }
}
