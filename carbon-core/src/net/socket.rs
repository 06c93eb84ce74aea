//! Non-blocking stream socket with deadline-bounded operations.
//!
//! Every socket is created non-blocking; the blocking entry points
//! (`connect`, `send`, `recv`, `recv_line`) are loops over `select` plus a
//! non-blocking syscall, bounded by the caller's timeout. `select` also
//! watches the socket's [`Breaker`], so any blocked operation can be aborted
//! from another thread and reports [`Error::Canceled`].
//!
//! # Safety
//!
//! Readiness polling goes through `poll(2)` on raw descriptors and receive
//! buffers are passed to `recv_with_flags` as `MaybeUninit` slices. The
//! unsafe blocks are confined to this module.

#![allow(unsafe_code)]

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use socket2::{Domain, SockAddr, Type};

use crate::breaker::Breaker;
use crate::error::{Error, Result};
use crate::net::addr::PeerAddr;

/// Readiness classes for [`Socket::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    Both,
}

impl Interest {
    const fn events(self) -> i16 {
        match self {
            Self::Read => libc::POLLIN | libc::POLLPRI,
            Self::Write => libc::POLLOUT,
            Self::Both => libc::POLLIN | libc::POLLPRI | libc::POLLOUT,
        }
    }
}

/// Receive completion policy for [`Socket::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Return after the first non-empty chunk.
    Any,
    /// Loop until the whole buffer is filled.
    Full,
}

/// Non-blocking TCP (IPv4) or UNIX-domain stream socket with a breaker.
///
/// All operations take `&self`; a socket shared through `Arc` supports a
/// sender and a receiver thread working the same connection concurrently.
#[derive(Debug)]
pub struct Socket {
    inner: socket2::Socket,
    breaker: Breaker,
    open: AtomicBool,
}

fn sockaddr_of(addr: &PeerAddr) -> io::Result<SockAddr> {
    match addr {
        PeerAddr::Tcp(sa) => Ok(SockAddr::from(*sa)),
        PeerAddr::Unix(path) => SockAddr::unix(path),
    }
}

fn peer_addr_of(sa: &SockAddr) -> Option<PeerAddr> {
    if let Some(std::net::SocketAddr::V4(v4)) = sa.as_socket() {
        return Some(PeerAddr::Tcp(v4));
    }
    sa.as_pathname().map(|p| PeerAddr::Unix(PathBuf::from(p)))
}

fn remaining(start: Instant, timeout: Duration) -> Result<Duration> {
    timeout.checked_sub(start.elapsed()).ok_or(Error::TimedOut)
}

impl Socket {
    fn from_inner(inner: socket2::Socket) -> Self {
        Self { inner, breaker: Breaker::new(), open: AtomicBool::new(true) }
    }

    /// Create a fresh non-blocking stream socket for `addr`'s domain with
    /// the standard options applied.
    fn new_stream(addr: &PeerAddr) -> Result<socket2::Socket> {
        let domain = match addr {
            PeerAddr::Tcp(_) => Domain::IPV4,
            PeerAddr::Unix(_) => Domain::UNIX,
        };
        let sock = socket2::Socket::new(domain, Type::STREAM, None)?;
        sock.set_nonblocking(true)?;
        if addr.is_tcp() {
            sock.set_reuse_address(true)?;
            sock.set_reuse_port(true)?;
            if let Err(err) = sock.set_nodelay(true) {
                tracing::warn!(target: "carbon::socket", %err, "cannot set TCP_NODELAY");
            }
        }
        Ok(sock)
    }

    /// Begin a non-blocking connect. Returns the socket and whether the
    /// connection already completed; when it did not, finish with
    /// [`finish_connect`](Self::finish_connect).
    pub fn start_connect(addr: &PeerAddr, bind: Option<&PeerAddr>) -> Result<(Self, bool)> {
        let sock = Self::new_stream(addr)?;
        if let Some(bind_addr) = bind {
            sock.bind(&sockaddr_of(bind_addr)?)?;
        }

        match sock.connect(&sockaddr_of(addr)?) {
            Ok(()) => Ok((Self::from_inner(sock), true)),
            Err(err)
                if err.raw_os_error() == Some(libc::EINPROGRESS)
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                Ok((Self::from_inner(sock), false))
            }
            Err(err) => {
                tracing::trace!(target: "carbon::socket", %addr, %err, "connect failed");
                Err(Error::from(err))
            }
        }
    }

    /// Wait for an in-flight connect to finish within `timeout`.
    pub fn finish_connect(&self, timeout: Duration) -> Result<()> {
        self.select(Interest::Both, timeout).map_err(|err| {
            // A reset while connecting means nobody is listening.
            if err == Error::ConnectionReset {
                Error::ConnectionRefused
            } else {
                err
            }
        })?;

        if let Some(err) = self.inner.take_error()? {
            tracing::trace!(target: "carbon::socket", %err, "connect completed with error");
            return Err(Error::from(err));
        }
        Ok(())
    }

    /// Connect to a peer, blocking up to `timeout`.
    pub fn connect(addr: &PeerAddr, timeout: Duration, bind: Option<&PeerAddr>) -> Result<Self> {
        let (sock, connected) = Self::start_connect(addr, bind)?;
        if !connected {
            sock.finish_connect(timeout)?;
        }
        tracing::trace!(target: "carbon::socket", %addr, "connected");
        Ok(sock)
    }

    /// Bind `addr` and start listening.
    pub fn listen(addr: &PeerAddr, backlog: i32) -> Result<Self> {
        let sock = Self::new_stream(addr)?;
        sock.bind(&sockaddr_of(addr)?)?;
        sock.listen(backlog)?;
        Ok(Self::from_inner(sock))
    }

    /// Take one pending connection off the accept queue. Non-blocking:
    /// callers `select(Interest::Read, ..)` first.
    pub fn accept(&self) -> Result<(Self, Option<PeerAddr>)> {
        if !self.is_open() {
            return Err(Error::BadSocket);
        }
        let (sock, sa) = self.inner.accept()?;
        sock.set_nonblocking(true)?;
        if sa.is_ipv4() {
            if let Err(err) = sock.set_nodelay(true) {
                tracing::warn!(target: "carbon::socket", %err, "cannot set TCP_NODELAY");
            }
        }
        Ok((Self::from_inner(sock), peer_addr_of(&sa)))
    }

    /// Await readiness on the socket within `timeout`.
    ///
    /// Wakes on breaker input as well, reporting [`Error::Canceled`] after
    /// draining it. `POLLHUP` without the requested readiness maps to
    /// [`Error::ConnectionReset`].
    pub fn select(&self, interest: Interest, timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(Error::BadSocket);
        }

        let start = Instant::now();
        loop {
            let left = remaining(start, timeout)?;
            let ms = i32::try_from(left.as_millis()).unwrap_or(i32::MAX).max(1);

            let mut fds = [
                libc::pollfd { fd: self.inner.as_raw_fd(), events: interest.events(), revents: 0 },
                libc::pollfd { fd: -1, events: libc::POLLIN, revents: 0 },
            ];
            let nfds = if let Some(fd) = self.breaker.read_fd() {
                fds[1].fd = fd;
                2
            } else {
                1
            };

            // SAFETY: fds is a valid array of nfds initialized pollfd entries.
            let n = unsafe { libc::poll(fds.as_mut_ptr(), nfds, ms) };
            if n == 0 {
                continue; // deadline re-checked at the top
            }
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Err(Error::Interrupted);
                }
                tracing::debug!(target: "carbon::socket", %err, "poll failed");
                return Err(Error::from(err));
            }

            if nfds == 2 && (fds[1].revents & (libc::POLLIN | libc::POLLPRI)) != 0 {
                self.breaker.reset();
                return Err(Error::Canceled);
            }

            let revents = fds[0].revents;
            if (revents & interest.events()) != 0 {
                return Ok(());
            }
            if (revents & libc::POLLNVAL) != 0 {
                return Err(Error::BadSocket);
            }
            if (revents & libc::POLLHUP) != 0 {
                return Err(Error::ConnectionReset);
            }
            if (revents & libc::POLLERR) != 0 {
                let err = self.inner.take_error().ok().flatten();
                return Err(err.map_or(Error::Io(io::ErrorKind::Other), Error::from));
            }
        }
    }

    fn send_nb(&self, buf: &[u8]) -> Result<usize> {
        match self.inner.send_with_flags(buf, libc::MSG_NOSIGNAL) {
            Ok(0) => Err(Error::ConnectionReset),
            Ok(n) => Ok(n),
            Err(err) => Err(Error::from(err)),
        }
    }

    fn recv_nb(&self, buf: &mut [u8]) -> Result<usize> {
        // SAFETY: MaybeUninit<u8> and u8 have identical layout; the buffer
        // is fully initialized, so exposing it as uninit is sound.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        match self.inner.recv_with_flags(uninit, libc::MSG_NOSIGNAL) {
            Ok(0) => {
                tracing::trace!(target: "carbon::socket", "connection closed by peer");
                Err(Error::ConnectionReset)
            }
            Ok(n) => Ok(n),
            Err(err) => Err(Error::from(err)),
        }
    }

    /// Send the whole buffer, blocking up to `timeout`. Partial progress
    /// continues within the deadline; the deadline firing first is
    /// [`Error::TimedOut`].
    pub fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::BadSocket);
        }

        let start = Instant::now();
        let mut sent = 0;
        while sent < buf.len() {
            self.select(Interest::Write, remaining(start, timeout)?)?;
            match self.send_nb(&buf[sent..]) {
                Ok(n) => sent += n,
                Err(Error::WouldBlock) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(sent)
    }

    /// Receive into `buf`, blocking up to `timeout`.
    ///
    /// [`RecvMode::Any`] returns after the first chunk; [`RecvMode::Full`]
    /// keeps reading until the buffer is full. Peer EOF is
    /// [`Error::ConnectionReset`].
    pub fn recv(&self, buf: &mut [u8], mode: RecvMode, timeout: Duration) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::BadSocket);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut got = 0;
        while got < buf.len() {
            self.select(Interest::Read, remaining(start, timeout)?)?;
            match self.recv_nb(&mut buf[got..]) {
                Ok(n) => {
                    got += n;
                    if mode == RecvMode::Any {
                        break;
                    }
                }
                Err(Error::WouldBlock) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(got)
    }

    /// Receive bytes until `eol` is seen or `max_len` bytes arrived,
    /// appending to `buf`. Returns the number of bytes read (including the
    /// EOL marker when found).
    pub fn recv_line(
        &self,
        buf: &mut Vec<u8>,
        eol: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::BadSocket);
        }

        let start = Instant::now();
        let mut got = 0;
        let mut byte = [0u8; 1];
        while got < max_len {
            self.select(Interest::Read, remaining(start, timeout)?)?;
            match self.recv_nb(&mut byte) {
                Ok(_) => {
                    buf.push(byte[0]);
                    got += 1;
                    if !eol.is_empty() && buf.ends_with(eol) {
                        break;
                    }
                }
                Err(Error::WouldBlock) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(got)
    }

    /// Half-close both directions and mark the socket closed. The
    /// descriptor itself lives until the last reference drops, so threads
    /// blocked on it observe EOF rather than a dangling fd.
    pub fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.inner.shutdown(std::net::Shutdown::Both);
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<PeerAddr> {
        self.inner.local_addr().ok().as_ref().and_then(peer_addr_of)
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<PeerAddr> {
        self.inner.peer_addr().ok().as_ref().and_then(peer_addr_of)
    }

    /// Local TCP port, mostly useful after binding port 0.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr().and_then(|a| a.port())
    }

    pub fn breaker_enable(&self) -> Result<()> {
        self.breaker.enable()
    }

    pub fn breaker_disable(&self) {
        self.breaker.disable();
    }

    /// Wake any thread blocked in [`select`](Self::select) on this socket.
    pub fn breaker_trip(&self) {
        self.breaker.trip();
    }

    pub fn breaker_reset(&self) {
        self.breaker.reset();
    }
}
