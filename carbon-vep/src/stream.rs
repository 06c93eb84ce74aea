//! Blocking, deadline-bounded container I/O over a socket.
//!
//! One container per logical message; the encoded buffer goes out in a
//! single send call. Receives read the fixed header, the optional address
//! extension and then exactly the declared body, continuing across short
//! reads until complete or the deadline fires. A framing violation maps to
//! [`Error::InvalidFrame`]; the transport owner closes the connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use carbon_core::codec::WireCodec;
use carbon_core::error::{Error, Result};
use carbon_core::net::socket::{RecvMode, Socket};

use crate::codec::{
    assemble, decode_addr_ext, decode_header, encode, ADDR_EXT_SIZE, HEADER_SIZE,
};
use crate::container::Container;

fn remaining(start: Instant, timeout: Duration) -> Result<Duration> {
    timeout.checked_sub(start.elapsed()).ok_or(Error::TimedOut)
}

/// Serialize and send one container within `timeout`.
pub fn send_container(socket: &Socket, container: &Container, timeout: Duration) -> Result<()> {
    let wire = encode(container);
    tracing::trace!(target: "carbon::vep", len = wire.len(), ctype = container.ctype(),
        "sending container");
    socket.send(&wire, timeout)?;
    Ok(())
}

/// Receive one complete container within `timeout`.
pub fn recv_container(socket: &Socket, timeout: Duration) -> Result<Container> {
    let start = Instant::now();

    let mut raw_head = [0u8; HEADER_SIZE];
    socket.recv(&mut raw_head, RecvMode::Full, timeout)?;
    let head = decode_header(&raw_head)?;

    let addr = if head.has_addr() {
        let mut raw_ext = [0u8; ADDR_EXT_SIZE];
        socket.recv(&mut raw_ext, RecvMode::Full, remaining(start, timeout)?)?;
        Some(decode_addr_ext(&raw_ext)?)
    } else {
        None
    };

    let mut body = vec![0u8; head.body_len as usize];
    if !body.is_empty() {
        socket.recv(&mut body, RecvMode::Full, remaining(start, timeout)?)?;
    }

    let container = assemble(head, addr, &body)?;
    tracing::trace!(target: "carbon::vep", ctype = container.ctype(),
        packets = container.packet_count(), "received container");
    Ok(container)
}

/// The VEP implementation of the framed-transport codec seam.
///
/// Frames are `Arc<Container>`: cheap to clone into events and shared
/// between the sender and the in-flight send queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct VepCodec;

impl WireCodec for VepCodec {
    type Frame = Arc<Container>;

    fn send_frame(&self, socket: &Socket, frame: &Self::Frame, timeout: Duration) -> Result<()> {
        send_container(socket, frame, timeout)
    }

    fn recv_frame(&self, socket: &Socket, timeout: Duration) -> Result<Self::Frame> {
        recv_container(socket, timeout).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::CONTAINER_APP;
    use carbon_core::net::addr::PeerAddr;
    use carbon_core::net::socket::Interest;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    const LONG: Duration = Duration::from_secs(5);

    fn loopback_pair() -> (Socket, Socket) {
        let any = PeerAddr::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let listener = Socket::listen(&any, 8).unwrap();
        let port = listener.local_port().unwrap();
        let addr = PeerAddr::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));

        let client = Socket::connect(&addr, LONG, None).unwrap();
        listener.select(Interest::Read, LONG).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn sample() -> Container {
        let mut container = Container::new(CONTAINER_APP);
        container.insert_packet_with(0x10, b"hello").unwrap();
        container.insert_packet_with(0x20, &[7u8; 5000]).unwrap();
        container
    }

    #[test]
    fn test_container_over_socket() {
        let (client, server) = loopback_pair();
        let sent = sample();

        send_container(&client, &sent, LONG).unwrap();
        let received = recv_container(&server, LONG).unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_recv_survives_chunked_transport() {
        let (client, server) = loopback_pair();
        let wire = encode(&sample());

        let writer = thread::spawn(move || {
            // Dribble the container out in small bursts.
            for chunk in wire.chunks(64) {
                client.send(chunk, LONG).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
            client
        });

        let received = recv_container(&server, LONG).unwrap();
        writer.join().unwrap();
        assert_eq!(received, sample());
    }

    #[test]
    fn test_garbage_is_invalid_frame() {
        let (client, server) = loopback_pair();
        client.send(&[0xFFu8; 64], LONG).unwrap();

        let err = recv_container(&server, LONG).unwrap_err();
        assert_eq!(err, Error::InvalidFrame);
    }

    #[test]
    fn test_recv_timeout_when_idle() {
        let (_client, server) = loopback_pair();
        let err = recv_container(&server, Duration::from_millis(80)).unwrap_err();
        assert_eq!(err, Error::TimedOut);
    }
}
