//! Transport addresses.
//!
//! Parses `tcp://`, `udp://` and (on Unix) `unix://` URIs into a typed
//! [`Address`].

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `tcp://host:port`
    Tcp(SocketAddr),
    /// `udp://host:port`
    Udp(SocketAddr),
    /// `unix:///path/to/socket` (Unix only)
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Address {
    /// Parse an address from a string.
    ///
    /// ```
    /// use keelson_net::addr::Address;
    ///
    /// let addr = Address::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(addr.is_tcp());
    /// assert_eq!(addr.to_string(), "tcp://127.0.0.1:5555");
    ///
    /// assert!(Address::parse("udp://[::1]:9000").unwrap().is_udp());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] for an unknown scheme or a bad address.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        s.parse()
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Address::Tcp(_))
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, Address::Udp(_))
    }

    #[cfg(unix)]
    pub fn is_unix(&self) -> bool {
        matches!(self, Address::Unix(_))
    }

    /// The socket address of a `tcp://` or `udp://` address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Tcp(addr) | Address::Udp(addr) => Some(*addr),
            #[cfg(unix)]
            Address::Unix(_) => None,
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            Ok(Address::Tcp(parse_socket_addr(addr)?))
        } else if let Some(addr) = s.strip_prefix("udp://") {
            Ok(Address::Udp(parse_socket_addr(addr)?))
        } else if let Some(path) = s.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(AddressError::InvalidPath(s.to_string()));
                }
                Ok(Address::Unix(PathBuf::from(path)))
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                Err(AddressError::UnixNotSupported)
            }
        } else {
            Err(AddressError::InvalidScheme(s.to_string()))
        }
    }
}

fn parse_socket_addr(addr: &str) -> Result<SocketAddr, AddressError> {
    addr.parse::<SocketAddr>()
        .map_err(|_| AddressError::InvalidSocketAddress(addr.to_string()))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "tcp://{addr}"),
            Address::Udp(addr) => write!(f, "udp://{addr}"),
            #[cfg(unix)]
            Address::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Errors that can occur when parsing addresses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid scheme in address: {0} (expected tcp://, udp:// or unix://)")]
    InvalidScheme(String),

    #[error("Invalid socket address: {0}")]
    InvalidSocketAddress(String),

    #[error("Invalid socket path: {0}")]
    InvalidPath(String),

    #[error("Unix domain sockets not supported on this platform")]
    UnixNotSupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_and_udp() {
        let tcp = Address::parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(tcp.socket_addr(), Some("127.0.0.1:5555".parse().unwrap()));
        let udp = Address::parse("udp://[::1]:5555").unwrap();
        assert!(udp.is_udp());
        assert_eq!(udp.to_string(), "udp://[::1]:5555");
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix() {
        let addr = Address::parse("unix:///tmp/keelson.sock").unwrap();
        assert!(addr.is_unix());
        assert_eq!(addr.socket_addr(), None);
        assert_eq!(addr.to_string(), "unix:///tmp/keelson.sock");
        assert!(matches!(
            Address::parse("unix://"),
            Err(AddressError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            Address::parse("http://127.0.0.1:80"),
            Err(AddressError::InvalidScheme(_))
        ));
        assert!(matches!(
            Address::parse("tcp://localhost:port"),
            Err(AddressError::InvalidSocketAddress(_))
        ));
    }
}
