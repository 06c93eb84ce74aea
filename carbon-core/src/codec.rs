//! Framed-transport codec seam.
//!
//! A codec turns a byte-oriented socket into a stream of typed frames.
//! Services (connector, server, client) are generic over this trait; VEP is
//! the one implementation in this workspace.

use std::time::Duration;

use crate::error::Result;
use crate::net::socket::Socket;

/// A framed transport codec: deadline-bounded frame send/receive over a
/// [`Socket`].
///
/// `Frame` is refcounted or otherwise cheap to clone, because frames ride
/// inside events shared between the sender and in-flight queues. A
/// receive constructs a fresh frame (the "clone from a template" rule):
/// decoder state is never shared with producers.
pub trait WireCodec: Send + Sync + 'static {
    type Frame: Clone + Send + Sync + 'static;

    /// Encode and stream one frame within `timeout`.
    fn send_frame(&self, socket: &Socket, frame: &Self::Frame, timeout: Duration) -> Result<()>;

    /// Receive one complete frame within `timeout`. Any framing violation
    /// is terminal for the connection; the caller closes it.
    fn recv_frame(&self, socket: &Socket, timeout: Duration) -> Result<Self::Frame>;
}
