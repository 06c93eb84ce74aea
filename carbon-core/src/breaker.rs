//! Cross-thread cancellation for blocking socket waits.
//!
//! A breaker is a non-blocking pipe. The readable end is polled next to the
//! socket; another thread writes one byte (`trip`) to wake the blocked
//! `select`, which then reports [`Error::Canceled`](crate::error::Error).
//! This is the only legitimate way to abort a blocking I/O from outside the
//! owning thread.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Pipe {
    rd: OwnedFd,
    wr: OwnedFd,
}

/// Pipe-backed wakeup channel attached to a cancellable blocking point.
#[derive(Debug, Default)]
pub struct Breaker {
    pipe: Mutex<Option<Pipe>>,
}

impl Breaker {
    /// Create a disabled breaker.
    #[must_use]
    pub const fn new() -> Self {
        Self { pipe: Mutex::new(None) }
    }

    /// Create the pipe pair. Enabling an enabled breaker is a no-op.
    pub fn enable(&self) -> Result<()> {
        let mut guard = self.pipe.lock();
        if guard.is_some() {
            return Ok(());
        }

        let mut fds = [0i32; 2];
        // SAFETY: fds points at two writable ints; pipe2 fills them on success.
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if ret < 0 {
            return Err(Error::from(io::Error::last_os_error()));
        }

        // SAFETY: pipe2 succeeded, both descriptors are owned by us alone.
        let (rd, wr) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        *guard = Some(Pipe { rd, wr });
        Ok(())
    }

    /// Drop the pipe pair. Must not race an in-flight `select` on this
    /// breaker; disable only from the owning thread or after it stopped.
    pub fn disable(&self) {
        *self.pipe.lock() = None;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.pipe.lock().is_some()
    }

    /// Readable end for `poll(2)`, if enabled.
    #[must_use]
    pub fn read_fd(&self) -> Option<RawFd> {
        self.pipe.lock().as_ref().map(|p| p.rd.as_raw_fd())
    }

    /// Wake any `select` blocked on this breaker. A full pipe already wakes
    /// the reader, so `EAGAIN` is not an error. Tripping a disabled breaker
    /// is a no-op.
    pub fn trip(&self) {
        let guard = self.pipe.lock();
        if let Some(pipe) = guard.as_ref() {
            let byte = [1u8];
            // SAFETY: writing one byte from a valid stack buffer.
            let ret = unsafe { libc::write(pipe.wr.as_raw_fd(), byte.as_ptr().cast(), 1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    tracing::debug!(target: "carbon::breaker", %err, "breaker trip failed");
                }
            }
        }
    }

    /// Drain all pending wakeups.
    pub fn reset(&self) {
        let guard = self.pipe.lock();
        if let Some(pipe) = guard.as_ref() {
            let mut buf = [0u8; 64];
            loop {
                // SAFETY: reading into a valid stack buffer of the given size.
                let ret =
                    unsafe { libc::read(pipe.rd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
                if ret <= 0 {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_breaker_is_inert() {
        let breaker = Breaker::new();
        assert!(!breaker.is_enabled());
        assert!(breaker.read_fd().is_none());
        breaker.trip();
        breaker.reset();
    }

    #[test]
    fn test_trip_makes_read_fd_readable() {
        let breaker = Breaker::new();
        breaker.enable().unwrap();
        let fd = breaker.read_fd().unwrap();

        breaker.trip();

        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        assert_eq!(n, 1);
        assert_ne!(pfd.revents & libc::POLLIN, 0);
    }

    #[test]
    fn test_reset_drains_all_trips() {
        let breaker = Breaker::new();
        breaker.enable().unwrap();
        breaker.trip();
        breaker.trip();
        breaker.reset();

        let fd = breaker.read_fd().unwrap();
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let n = unsafe { libc::poll(&mut pfd, 1, 0) };
        assert_eq!(n, 0);
    }

    #[test]
    fn test_enable_twice_keeps_pipe() {
        let breaker = Breaker::new();
        breaker.enable().unwrap();
        let fd = breaker.read_fd().unwrap();
        breaker.enable().unwrap();
        assert_eq!(breaker.read_fd().unwrap(), fd);
    }
}
