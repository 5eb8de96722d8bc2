//! The I/O boundary an endpoint drives.
//!
//! A [`Transport`] wraps one OS-level (or in-process) channel. Endpoints only
//! ever hold it behind an `Arc`, and a reader task and a writer task may use
//! it concurrently, so every method takes `&self`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;

/// A message together with the peer it came from or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<P> {
    pub peer: P,
    pub body: Bytes,
}

impl<P> Packet<P> {
    pub fn new(peer: P, body: impl Into<Bytes>) -> Self {
        Self {
            peer,
            body: body.into(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Peer address type.
    type Peer: Clone + fmt::Debug + Send + Sync + 'static;

    /// Datagram-style transports have no end-of-stream signal: a zero-length
    /// receive is an empty datagram, errors are per-datagram, and heartbeat
    /// absence does not imply the peer is gone.
    const CONNECTIONLESS: bool;

    /// Receive into the spare capacity of `buf`, appending.
    ///
    /// Stream transports return `Ok((0, _))` at end of stream. Datagram
    /// transports append exactly one datagram.
    async fn recv(&self, buf: &mut BytesMut) -> io::Result<(usize, Self::Peer)>;

    /// Write all of `data` to `peer`.
    async fn send(&self, data: &[u8], peer: &Self::Peer) -> io::Result<usize>;

    /// Peer used when a message is sent without an explicit destination.
    fn default_peer(&self) -> Option<Self::Peer>;

    fn is_open(&self) -> bool;

    /// Graceful shutdown: pending receives complete, no new sends go out.
    fn shutdown(&self);

    /// Hard close, releasing the underlying handle.
    fn close(&self);
}
