//! # Keelson Net
//!
//! Socket transports for keelson endpoints, built on tokio:
//! - **TCP**: [`TcpTransport`], the [`TcpServer`] acceptor service, and the
//!   client side ([`connect`], [`Reconnect`], [`TcpClient`])
//! - **UDP**: [`UdpTransport`]
//! - **Unix datagram** (Unix only): [`UnixDatagramTransport`]
//! - **Addresses**: [`Address`] parsing for `tcp://`, `udp://` and `unix://`

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod addr;
pub mod client;
pub mod server;
pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod unix;

pub use addr::{Address, AddressError};
pub use client::{connect, Reconnect, ReconnectSwitch, TcpClient};
pub use server::{HandlerFactory, TcpServer};
pub use tcp::{TcpOptions, TcpTransport};
pub use udp::UdpTransport;
#[cfg(unix)]
pub use unix::UnixDatagramTransport;
