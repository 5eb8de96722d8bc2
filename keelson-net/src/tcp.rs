//! TCP stream transport.
//!
//! The stream is split into owned halves so the endpoint's reader and writer
//! tasks never contend. A duplicated `socket2` handle stays behind for
//! shutdown and option tuning, which works no matter which half is busy.

use keelson_core::transport::Transport;

use async_lock::Mutex;
use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{SockRef, Socket, TcpKeepalive};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Socket tuning applied to accepted and connected streams.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm
    ///
    /// - Default: true
    pub nodelay: bool,

    /// Idle time before keepalive probes; `None` leaves keepalive off
    ///
    /// - Default: None
    pub keepalive: Option<Duration>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: None,
        }
    }
}

impl TcpOptions {
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_keepalive(mut self, idle: Option<Duration>) -> Self {
        self.keepalive = idle;
        self
    }
}

/// Apply `options` to a stream.
///
/// # Errors
///
/// Returns an error if a socket option cannot be set.
pub fn tune(stream: &TcpStream, options: &TcpOptions) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(options.nodelay)?;
    set_keepalive(&sock, options.keepalive)
}

fn set_keepalive(sock: &Socket, idle: Option<Duration>) -> io::Result<()> {
    match idle {
        Some(idle) => sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle)),
        None => sock.set_keepalive(false),
    }
}

pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    raw: Socket,
    local: SocketAddr,
    peer: SocketAddr,
    open: AtomicBool,
}

impl TcpTransport {
    /// Take ownership of a connected stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream's addresses cannot be read or its handle cannot
    /// be duplicated.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let raw = SockRef::from(&stream).try_clone()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            raw,
            local,
            peer,
            open: AtomicBool::new(true),
        })
    }

    /// Connect and tune a new stream.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or an error from [`tune`] or [`new`](Self::new).
    pub async fn connect(addr: SocketAddr, options: &TcpOptions) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tune(&stream, options)?;
        Self::new(stream)
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.raw.set_nodelay(nodelay)
    }

    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_keepalive(&self, idle: Option<Duration>) -> io::Result<()> {
        set_keepalive(&self.raw, idle)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Peer = SocketAddr;
    const CONNECTIONLESS: bool = false;

    async fn recv(&self, buf: &mut BytesMut) -> io::Result<(usize, SocketAddr)> {
        if !self.is_open() {
            return Ok((0, self.peer));
        }
        let mut reader = self.reader.lock().await;
        let n = reader.read_buf(buf).await?;
        Ok((n, self.peer))
    }

    async fn send(&self, data: &[u8], _peer: &SocketAddr) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "tcp stream is shut down"));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        Ok(data.len())
    }

    fn default_peer(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.raw.shutdown(Shutdown::Both) {
                debug!("[TCP] shutdown of {} failed: {}", self.peer, e);
            }
        }
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}
