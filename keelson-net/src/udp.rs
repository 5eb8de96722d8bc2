//! UDP datagram transport.
//!
//! Connectionless: every received datagram carries its sender, and each
//! send names its destination (the configured default peer unless the
//! message was queued with an explicit one). Pair it with
//! [`RawPacker`](keelson_core::codec::RawPacker) /
//! [`RawUnpacker`](keelson_core::codec::RawUnpacker) so one datagram is one
//! message; a length-prefixed codec also works as long as every datagram
//! holds whole frames.

use keelson_core::transport::Transport;

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddr,
    peer: Option<SocketAddr>,
    open: AtomicBool,
}

impl UdpTransport {
    /// Bind `local`, sending to `peer` by default.
    ///
    /// Must be called from within the reactor (or with its handle entered).
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub fn bind(local: SocketAddr, peer: Option<SocketAddr>) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        Ok(Self {
            local: socket.local_addr()?,
            socket,
            peer,
            open: AtomicBool::new(true),
        })
    }

    /// Bound address; resolves port 0.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl Transport for UdpTransport {
    type Peer = SocketAddr;
    const CONNECTIONLESS: bool = true;

    /// Appends one datagram; anything beyond the spare capacity of `buf` is
    /// truncated by the OS.
    async fn recv(&self, buf: &mut BytesMut) -> io::Result<(usize, SocketAddr)> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "udp socket is shut down"));
        }
        self.socket.recv_buf_from(buf).await
    }

    async fn send(&self, data: &[u8], peer: &SocketAddr) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "udp socket is shut down"));
        }
        self.socket.send_to(data, peer).await
    }

    fn default_peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn close(&self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_datagrams_carry_sender() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None).unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), Some(a.local_addr())).unwrap();
        assert_eq!(b.default_peer(), Some(a.local_addr()));

        b.send(b"one", &a.local_addr()).await.unwrap();
        b.send(b"two", &a.local_addr()).await.unwrap();

        let mut buf = BytesMut::with_capacity(64);
        let (n, from) = a.recv(&mut buf).await.unwrap();
        assert_eq!((n, from), (3, b.local_addr()));
        let (n, _) = a.recv(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..], b"onetwo");

        a.shutdown();
        assert!(a.recv(&mut buf).await.is_err());
    }
}
