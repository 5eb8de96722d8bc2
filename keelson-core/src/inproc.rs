//! In-process stream transport.
//!
//! Two [`InprocTransport`]s joined by a pair of channels behave like the two
//! ends of a stream connection without touching the OS: chunks written on one
//! end are read on the other, and shutting one end down is seen by the peer
//! as end of stream.
//!
//! Endpoints can be joined directly with [`pair`], or by name through an
//! [`InprocListener`]:
//!
//! ```rust,no_run
//! use keelson_core::inproc::{connect, InprocListener};
//!
//! # async fn example() -> std::io::Result<()> {
//! let listener = InprocListener::bind("inproc://echo")?;
//! let client = connect("inproc://echo")?;
//! let server_side = listener.accept().await?;
//! # Ok(())
//! # }
//! ```

use crate::transport::Transport;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use flume::{Receiver, Sender};
use futures::{select, FutureExt};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Named listeners, keyed without the `inproc://` prefix.
static LISTENERS: Lazy<DashMap<String, Sender<InprocTransport>>> = Lazy::new(DashMap::new);

/// One end of an in-process connection. The peer is the other end's name.
pub struct InprocTransport {
    peer: String,
    tx: Mutex<Option<Sender<Bytes>>>,
    rx: Receiver<Bytes>,
    open: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl InprocTransport {
    fn new(peer: String, tx: Sender<Bytes>, rx: Receiver<Bytes>) -> Self {
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        Self {
            peer,
            tx: Mutex::new(Some(tx)),
            rx,
            open: AtomicBool::new(true),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        }
    }

    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Two connected ends, named `a` and `b`.
pub fn pair(a: &str, b: &str) -> (InprocTransport, InprocTransport) {
    let (a_tx, b_rx) = flume::unbounded();
    let (b_tx, a_rx) = flume::unbounded();
    (
        InprocTransport::new(b.to_string(), a_tx, a_rx),
        InprocTransport::new(a.to_string(), b_tx, b_rx),
    )
}

#[async_trait]
impl Transport for InprocTransport {
    type Peer = String;
    const CONNECTIONLESS: bool = false;

    async fn recv(&self, buf: &mut BytesMut) -> io::Result<(usize, String)> {
        if !self.is_open() {
            return Ok((0, self.peer.clone()));
        }
        select! {
            chunk = self.rx.recv_async().fuse() => match chunk {
                Ok(chunk) => {
                    buf.extend_from_slice(&chunk);
                    Ok((chunk.len(), self.peer.clone()))
                }
                // Every sender is gone: the peer shut down.
                Err(_) => Ok((0, self.peer.clone())),
            },
            _ = self.shutdown_rx.recv_async().fuse() => Ok((0, self.peer.clone())),
        }
    }

    async fn send(&self, data: &[u8], _peer: &String) -> io::Result<usize> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "inproc end is shut down"));
        };
        tx.send_async(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "inproc peer dropped"))?;
        Ok(data.len())
    }

    fn default_peer(&self) -> Option<String> {
        Some(self.peer.clone())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        self.tx.lock().take();
        self.shutdown_tx.lock().take();
    }

    fn close(&self) {
        self.shutdown();
        self.rx.drain().for_each(drop);
    }
}

/// Accepts in-process connections under a name.
///
/// The name is released when the listener is dropped.
pub struct InprocListener {
    name: String,
    incoming: Receiver<InprocTransport>,
}

impl InprocListener {
    /// Register `endpoint` (`inproc://<name>`).
    ///
    /// # Errors
    ///
    /// Fails if the URI is invalid or the name is already bound.
    pub fn bind(endpoint: &str) -> io::Result<Self> {
        let name = validate_and_extract_name(endpoint)?;
        let (tx, rx) = flume::unbounded();

        match LISTENERS.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("inproc endpoint '{name}' is already bound"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(Self {
                    name: name.to_string(),
                    incoming: rx,
                })
            }
        }
    }

    /// Wait for the next connection.
    ///
    /// # Errors
    ///
    /// Only fails if the listener was unregistered underneath us.
    pub async fn accept(&self) -> io::Result<InprocTransport> {
        self.incoming
            .recv_async()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "inproc listener unbound"))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        LISTENERS.remove(&self.name);
    }
}

/// Connect to a bound `inproc://<name>`.
///
/// # Errors
///
/// Fails if the URI is invalid or nothing is bound under the name.
pub fn connect(endpoint: &str) -> io::Result<InprocTransport> {
    let name = validate_and_extract_name(endpoint)?;
    let listener = LISTENERS.get(name).map(|entry| entry.value().clone());
    let Some(listener) = listener else {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("inproc endpoint '{name}' not found (must bind before connect)"),
        ));
    };

    let (client, server) = pair(&format!("{name}#client"), name);
    listener
        .send(server)
        .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "inproc listener gone"))?;
    Ok(client)
}

/// Names currently bound, for diagnostics.
pub fn bound_names() -> Vec<String> {
    LISTENERS.iter().map(|entry| entry.key().clone()).collect()
}

fn validate_and_extract_name(endpoint: &str) -> io::Result<&str> {
    const PREFIX: &str = "inproc://";

    let Some(name) = endpoint.strip_prefix(PREFIX) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("inproc endpoint must start with '{PREFIX}', got: '{endpoint}'"),
        ));
    };
    if name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "inproc endpoint name cannot be empty",
        ));
    }
    Ok(name)
}
