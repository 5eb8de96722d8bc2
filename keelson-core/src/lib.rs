//! Keelson Core
//!
//! Connection lifecycle kernel shared by every keelson transport:
//! - Outstanding-operation tracking (`guard`)
//! - Shared reactor and service pump (`reactor`)
//! - Per-endpoint serialized execution (`strand`)
//! - Named, repeatable timers (`timer`)
//! - Endpoint state machine (`endpoint`) and its user hooks (`handler`)
//! - Object pool with identity assignment (`registry`)
//! - Single- and multi-endpoint services (`service`)
//! - Message framing (`codec`)
//! - In-process transport (`inproc`)

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::must_use_candidate)]
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod guard;
pub mod handler;
pub mod inproc;
pub mod latch;
pub mod options;
pub mod queue;
pub mod reactor;
pub mod reconnect;
pub mod registry;
pub mod service;
pub mod stats;
pub mod strand;
pub mod timer;
pub mod transport;

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::codec::{LengthPacker, LengthUnpacker, Packer, RawPacker, RawUnpacker, Unpacked, Unpacker};
    pub use crate::endpoint::{Endpoint, TIMER_USER_BEGIN, UNASSIGNED};
    pub use crate::error::{CodecError, EndpointError, Result};
    pub use crate::guard::{AsyncGuard, AsyncToken};
    pub use crate::handler::{Fate, Handler};
    pub use crate::options::{EndpointOptions, PoolOptions, PumpOptions, ReconnectOptions, ResumeMode};
    pub use crate::reactor::{Reactor, Service, ServicePump};
    pub use crate::reconnect::ReconnectState;
    pub use crate::registry::Registry;
    pub use crate::service::{MultiSocketService, SingleSocketService};
    pub use crate::stats::{Statistic, Timed};
    pub use crate::transport::{Packet, Transport};
}
