/// Keelson Error Types
///
/// Errors surfaced by endpoints, codecs and transports.

use std::io;
use thiserror::Error;

/// Framing errors raised by packers and unpackers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Message exceeds what the framing strategy can carry
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Inbound bytes do not form a valid frame
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl CodecError {
    /// Create a malformed-frame error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Main error type for endpoint operations
#[derive(Error, Debug)]
pub enum EndpointError {
    /// IO error reported by the transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing error reported by the unpacker or packer
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Peer closed the stream (EOF)
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Endpoint has no transport attached or the transport is not open
    #[error("Endpoint not ready")]
    NotReady,

    /// Connection attempt failed
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Reactor has been shut down
    #[error("Reactor shut down")]
    Shutdown,
}

/// Result type alias for endpoint operations
pub type Result<T> = std::result::Result<T, EndpointError>;

impl EndpointError {
    /// Create a not-connected error with a message
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::NotReady => true,
            _ => false,
        }
    }

    /// Check if this is a connection error
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::NotConnected(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
