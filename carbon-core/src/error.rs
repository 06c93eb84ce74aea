//! Error codes shared by the runtime and every network service.
//!
//! Completion events carry results across threads, so the error type is
//! `Clone` and keeps only the `io::ErrorKind` of an underlying I/O failure
//! rather than the full `io::Error`.

use std::io;
use thiserror::Error;

/// Transport and runtime errors surfaced by Carbon operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Operation cannot complete right now (EAGAIN / EWOULDBLOCK).
    #[error("operation would block")]
    WouldBlock,

    /// Connection closed by the remote peer.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Remote peer refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// Deadline fired before the operation completed.
    #[error("operation timed out")]
    TimedOut,

    /// Operation aborted through a breaker.
    #[error("operation canceled")]
    Canceled,

    /// Socket exists but is not connected.
    #[error("socket is not connected")]
    NotConnected,

    /// Socket is closed or otherwise unusable.
    #[error("bad socket")]
    BadSocket,

    /// Wire-format violation (bad magic, checksum, lengths, ...).
    #[error("framing violation")]
    InvalidFrame,

    /// Invalid argument or unknown handle.
    #[error("invalid argument")]
    InvalidArg,

    /// Non-blocking connect is still in flight.
    #[error("connection in progress")]
    InProgress,

    /// A configured limit was exceeded.
    #[error("limit exceeded")]
    TooBig,

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Interrupted by a signal; callers may retry.
    #[error("interrupted")]
    Interrupted,

    /// No such session, connection or name.
    #[error("no such entry")]
    NotFound,

    /// Any other transport error.
    #[error("i/o error: {0:?}")]
    Io(io::ErrorKind),
}

/// Result type alias for Carbon operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Connection-closed class: the transport is gone and the owner must
    /// tear the connection down (at most one disconnect notification).
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionReset
                | Self::ConnectionRefused
                | Self::Io(io::ErrorKind::BrokenPipe)
                | Self::Io(io::ErrorKind::ConnectionAborted)
                | Self::Io(io::ErrorKind::UnexpectedEof)
        )
    }

    /// Transient class: retrying the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted | Self::TimedOut)
    }

    /// Map a raw OS errno, as returned through `SO_ERROR` or a failed
    /// syscall, onto the Carbon error set.
    #[must_use]
    pub fn from_errno(errno: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(errno))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::ConnectionReset => Self::ConnectionReset,
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::NotConnected => Self::NotConnected,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::InvalidInput => Self::InvalidArg,
            io::ErrorKind::InvalidData => Self::InvalidFrame,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            io::ErrorKind::NotFound => Self::NotFound,
            kind => Self::Io(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::ConnectionReset.is_disconnect());
        assert!(Error::ConnectionRefused.is_disconnect());
        assert!(Error::Io(io::ErrorKind::BrokenPipe).is_disconnect());
        assert!(!Error::TimedOut.is_disconnect());
        assert!(!Error::NotConnected.is_disconnect());
        assert!(!Error::Canceled.is_disconnect());
    }

    #[test]
    fn test_io_error_mapping() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(Error::from(err), Error::WouldBlock);

        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(Error::from(err), Error::ConnectionReset);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::from_errno(libc::ECONNREFUSED), Error::ConnectionRefused);
        assert_eq!(Error::from_errno(libc::EINTR), Error::Interrupted);
    }
}
