//! # Keelson
//!
//! An asynchronous TCP/UDP endpoint framework built on tokio.
//!
//! ## Architecture
//!
//! - **`keelson-core`**: outstanding-operation guard, strands, timers, the
//!   endpoint state machine, the endpoint registry, services and codecs
//! - **`keelson-net`**: TCP, UDP and Unix datagram transports (feature `net`)
//! - **`keelson`**: public API surface (this crate)
//!
//! Every endpoint runs its handler callbacks one at a time, in arrival order,
//! buffers outbound messages with a bounded queue, supervises its peer with
//! heartbeats, and closes safely: finalization waits until no asynchronous
//! operation still refers to the endpoint.
//!
//! ## Quick Start
//!
//! ### Echo server
//!
//! ```rust,no_run
//! # #[cfg(feature = "net")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use keelson::prelude::*;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl Handler<TcpTransport> for Echo {
//!     fn on_message(&self, ep: &Endpoint<TcpTransport>, msg: &Packet<std::net::SocketAddr>) -> bool {
//!         ep.enqueue_send(&msg.body, true)
//!     }
//! }
//!
//! let pump = ServicePump::new(PumpOptions::default())?;
//! let registry = Arc::new(Registry::new(
//!     pump.reactor(),
//!     PoolOptions::default(),
//!     EndpointOptions::default(),
//! ));
//! let server = TcpServer::new("127.0.0.1:5050".parse()?, registry, || {
//!     Arc::new(Echo) as Arc<dyn Handler<TcpTransport>>
//! });
//! pump.add_service(Arc::new(server));
//! pump.start_service();
//! # Ok(())
//! # }
//! ```
//!
//! ### In-process pair
//!
//! ```rust
//! use keelson::prelude::*;
//! use keelson::inproc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (a, b) = inproc::pair("a", "b");
//! b.send(b"\x00\x05hi!", &"a".to_string()).await.unwrap();
//! # let _ = a;
//! # }
//! ```
//!
//! ## Logging
//!
//! Lifecycle events are emitted through `tracing`. Call
//! [`dev_tracing::init_tracing`] to print them when `RUST_LOG` is set.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

pub use bytes::Bytes;

pub use keelson_core::{
    codec, endpoint, error, guard, handler, inproc, options, queue, reactor, reconnect, registry,
    service, stats, strand, timer, transport,
};

/// Socket transports.
#[cfg(feature = "net")]
pub mod net {
    pub use keelson_net::*;
}

/// Everything needed to write handlers and wire up services.
pub mod prelude {
    pub use keelson_core::prelude::*;

    #[cfg(feature = "net")]
    pub use keelson_net::{
        connect, Address, Reconnect, ReconnectSwitch, TcpClient, TcpOptions, TcpServer,
        TcpTransport, UdpTransport,
    };

    #[cfg(all(feature = "net", unix))]
    pub use keelson_net::UnixDatagramTransport;

    pub use bytes::Bytes;
}
