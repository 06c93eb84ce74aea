//! One-shot container exchange.
//!
//! Connect, send one container, receive one reply, close. For transient
//! probes where keeping a connector or client alive is not worth it; the
//! whole exchange shares a single deadline.

use std::time::{Duration, Instant};

use carbon_core::codec::WireCodec;
use carbon_core::error::{Error, Result};
use carbon_core::net::addr::PeerAddr;
use carbon_core::net::socket::Socket;

/// Single-exchange helper over any framed codec.
#[derive(Debug, Clone)]
pub struct PacketIo<C> {
    codec: C,
    timeout: Duration,
}

impl<C: WireCodec> PacketIo<C> {
    #[must_use]
    pub fn new(codec: C, timeout: Duration) -> Self {
        Self { codec, timeout }
    }

    fn left(&self, start: Instant) -> Result<Duration> {
        self.timeout.checked_sub(start.elapsed()).ok_or(Error::TimedOut)
    }

    /// Connect to `dst` (optionally binding `src`), send `request` and
    /// return the first reply. The connection is closed either way.
    pub fn execute(
        &self,
        request: &C::Frame,
        dst: &PeerAddr,
        src: Option<&PeerAddr>,
    ) -> Result<C::Frame> {
        let start = Instant::now();

        let socket = Socket::connect(dst, self.timeout, src).map_err(|err| {
            tracing::debug!(target: "carbon::packet_io", %dst, %err, "connect failed");
            err
        })?;

        self.codec.send_frame(&socket, request, self.left(start)?).map_err(|err| {
            tracing::debug!(target: "carbon::packet_io", %dst, %err, "send failed");
            err
        })?;

        let reply = self.codec.recv_frame(&socket, self.left(start)?).map_err(|err| {
            tracing::debug!(target: "carbon::packet_io", %dst, %err, "no reply");
            err
        });
        socket.shutdown();
        reply
    }
}
