//! Peer addressing for TCP and UNIX-domain transports.
//!
//! A peer is either an IPv4 address plus port or a filesystem socket path.
//! Addresses string-round-trip exactly: `tcp://127.0.0.1:5555` and
//! `unix:///tmp/carbon.sock`.

use std::fmt;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    /// TCP over IPv4: `tcp://host:port`
    Tcp(SocketAddrV4),
    /// UNIX-domain stream socket: `unix:///path/to/socket`
    Unix(PathBuf),
}

impl PeerAddr {
    /// Parse an address from a string.
    ///
    /// ```
    /// use carbon_core::net::addr::PeerAddr;
    ///
    /// let addr = PeerAddr::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(addr.is_tcp());
    ///
    /// let addr = PeerAddr::parse("unix:///tmp/test.sock").unwrap();
    /// assert!(addr.is_unix());
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddrError> {
        s.parse()
    }

    #[must_use]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }

    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// Port of a TCP address, `None` for UNIX sockets.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp(sa) => Some(sa.port()),
            Self::Unix(_) => None,
        }
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(sa: SocketAddrV4) -> Self {
        Self::Tcp(sa)
    }
}

impl FromStr for PeerAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let sa = addr
                .parse::<SocketAddrV4>()
                .map_err(|_| AddrError::InvalidTcpAddress(addr.to_string()))?;
            Ok(Self::Tcp(sa))
        } else if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                Err(AddrError::EmptyUnixPath)
            } else {
                Ok(Self::Unix(PathBuf::from(path)))
            }
        } else {
            Err(AddrError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(sa) => write!(f, "tcp://{sa}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Errors from parsing a peer address.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("invalid scheme in address: {0} (expected tcp:// or unix://)")]
    InvalidScheme(String),

    #[error("invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("empty UNIX socket path")]
    EmptyUnixPath,
}
