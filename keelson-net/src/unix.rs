//! Unix domain datagram transport.
//!
//! Like UDP, but peers are socket paths. The local path is unlinked before
//! binding and again on close.

use keelson_core::transport::Transport;

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UnixDatagram;
use tracing::debug;

#[derive(Debug)]
pub struct UnixDatagramTransport {
    socket: UnixDatagram,
    local: PathBuf,
    peer: Option<PathBuf>,
    open: AtomicBool,
}

impl UnixDatagramTransport {
    /// Bind `local`, sending to `peer` by default.
    ///
    /// Must be called from within the reactor (or with its handle entered).
    ///
    /// # Errors
    ///
    /// Returns an error if a stale socket file cannot be removed or the bind
    /// fails.
    pub fn bind(local: impl AsRef<Path>, peer: Option<PathBuf>) -> io::Result<Self> {
        let local = local.as_ref().to_path_buf();
        if local.exists() {
            std::fs::remove_file(&local)?;
        }
        let socket = std::os::unix::net::UnixDatagram::bind(&local)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: UnixDatagram::from_std(socket)?,
            local,
            peer,
            open: AtomicBool::new(true),
        })
    }

    #[inline]
    pub fn local_path(&self) -> &Path {
        &self.local
    }

    #[inline]
    pub fn peer_path(&self) -> Option<&Path> {
        self.peer.as_deref()
    }
}

#[async_trait]
impl Transport for UnixDatagramTransport {
    /// Sender path; empty for unnamed senders.
    type Peer = PathBuf;
    const CONNECTIONLESS: bool = true;

    async fn recv(&self, buf: &mut BytesMut) -> io::Result<(usize, PathBuf)> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "unix socket is shut down"));
        }
        let (n, from) = self.socket.recv_buf_from(buf).await?;
        let from = from.as_pathname().map(Path::to_path_buf).unwrap_or_default();
        Ok((n, from))
    }

    async fn send(&self, data: &[u8], peer: &PathBuf) -> io::Result<usize> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "unix socket is shut down"));
        }
        self.socket.send_to(data, peer).await
    }

    fn default_peer(&self) -> Option<PathBuf> {
        self.peer.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn close(&self) {
        self.shutdown();
        if let Err(e) = std::fs::remove_file(&self.local) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("[Unix] cannot unlink {}: {}", self.local.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("keelson-{}-{}.sock", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_exchange_and_unlink() {
        let (pa, pb) = (socket_path("unit-a"), socket_path("unit-b"));
        let a = UnixDatagramTransport::bind(&pa, Some(pb.clone())).unwrap();
        let b = UnixDatagramTransport::bind(&pb, Some(pa.clone())).unwrap();

        a.send(b"hello", &a.default_peer().unwrap()).await.unwrap();
        let mut buf = BytesMut::with_capacity(64);
        let (n, from) = b.recv(&mut buf).await.unwrap();
        assert_eq!((n, from.as_path(), &buf[..]), (5, pa.as_path(), &b"hello"[..]));

        a.close();
        b.close();
        assert!(!pa.exists() && !pb.exists());
    }
}
