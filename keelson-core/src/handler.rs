//! User callbacks attached to an endpoint.
//!
//! `on_message`, `on_recv_error`, `on_heartbeat_timeout` and the delayed
//! close hooks run on the endpoint's strand, one at a time and in order.
//! The send notifications run on the writer task. `on_start` and a close
//! that finalizes synchronously run on the caller's thread.

use crate::endpoint::Endpoint;
use crate::error::EndpointError;
use crate::transport::{Packet, Transport};

use std::io;
use tracing::{info, warn};

/// What to do with a connection after a receive error or heartbeat timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Close,
    Continue,
}

impl Fate {
    /// Default for a transport kind: streams close, datagrams carry on.
    #[inline]
    pub const fn default_for(connectionless: bool) -> Self {
        if connectionless {
            Self::Continue
        } else {
            Self::Close
        }
    }
}

pub trait Handler<T: Transport>: Send + Sync + 'static {
    /// Deliver one received message.
    ///
    /// Returning `false` leaves the message in place; it is offered again
    /// after the endpoint's handling interval, ahead of anything newer.
    fn on_message(&self, ep: &Endpoint<T>, msg: &Packet<T::Peer>) -> bool;

    /// Called from `start` once the endpoint is live.
    fn on_start(&self, _ep: &Endpoint<T>) {}

    /// A packet reached the transport.
    fn on_msg_send(&self, _ep: &Endpoint<T>, _packet: &Packet<T::Peer>) {}

    /// The send buffer drained; `last` is the final packet written.
    fn on_all_msg_send(&self, _ep: &Endpoint<T>, _last: &Packet<T::Peer>) {}

    fn on_send_error(&self, ep: &Endpoint<T>, err: &io::Error) {
        warn!("[Endpoint {}] send failed: {}", ep.id(), err);
    }

    /// Decide the connection's fate after a failed receive, end of stream
    /// or malformed input.
    fn on_recv_error(&self, ep: &Endpoint<T>, err: &EndpointError, default: Fate) -> Fate {
        match err {
            EndpointError::ConnectionClosed => info!("[Endpoint {}] peer closed", ep.id()),
            other => warn!("[Endpoint {}] receive failed: {}", ep.id(), other),
        }
        default
    }

    /// Decide the connection's fate when the peer went silent.
    fn on_heartbeat_timeout(&self, _ep: &Endpoint<T>, default: Fate) -> Fate {
        default
    }

    /// First finalization hook.
    fn on_close(&self, ep: &Endpoint<T>) {
        info!("[Endpoint {}] closed", ep.id());
    }

    /// Second finalization hook, after `on_close`.
    fn after_close(&self, _ep: &Endpoint<T>) {}
}
