//! VEP wire format: container header encode/decode and the incremental
//! stream decoder.
//!
//! All multi-byte fields are little-endian. The fixed header is 20 bytes;
//! containers carrying source/destination addresses append a 20-byte
//! extension (src, dst, four reserved words). The checksum is CRC-16/ARC
//! over the body bytes only.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::container::{Container, FLAG_ADDR};
use crate::crc::crc16;
use crate::packet::{Packet, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PACKET_TYPE_NONE};

/// Identification string opening every container.
pub const MAGIC: [u8; 4] = *b"veri";

/// Protocol version.
pub const VERSION: u32 = 1;

/// Fixed container header size.
pub const HEADER_SIZE: usize = 20;

/// Optional address extension size.
pub const ADDR_EXT_SIZE: usize = 20;

/// Maximum container body size (excluding the header).
pub const MAX_CONTAINER_SIZE: usize = 16 * 1024 * 1024;

/// Framing violations. Any of these is terminal for the connection that
/// produced the bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad magic")]
    BadMagic,

    #[error("unsupported protocol version {0}")]
    BadVersion(u32),

    #[error("reserved flag bits set: {0:#010x}")]
    ReservedFlags(u32),

    #[error("nonzero reserved header words")]
    ReservedWords,

    #[error("container body of {0} bytes exceeds limit")]
    ContainerTooBig(u32),

    #[error("packet body of {0} bytes exceeds limit")]
    PacketTooBig(u32),

    #[error("packet header overruns container body")]
    Truncated,

    #[error("zero packet type")]
    ZeroPacketType,

    #[error("checksum mismatch: header {header:#06x}, computed {computed:#06x}")]
    Checksum { header: u16, computed: u16 },

    #[error("trailing bytes after container body")]
    TrailingBytes,
}

impl From<FrameError> for carbon_core::error::Error {
    fn from(err: FrameError) -> Self {
        tracing::debug!(target: "carbon::vep", %err, "framing violation");
        Self::InvalidFrame
    }
}

/// Decoded fixed-header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub ctype: u16,
    pub flags: u32,
    pub body_len: u32,
    pub crc: u16,
}

impl Head {
    #[must_use]
    pub const fn has_addr(&self) -> bool {
        self.flags & FLAG_ADDR != 0
    }
}

/// Encode a container into a single contiguous buffer, ready for one send
/// call.
#[must_use]
pub fn encode(container: &Container) -> Bytes {
    let body_len = container.body_len();
    let ext = if container.addr().is_some() { ADDR_EXT_SIZE } else { 0 };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + ext + body_len);

    let mut body = BytesMut::with_capacity(body_len);
    for packet in container.packets() {
        body.put_u32_le(packet.ptype());
        body.put_u32_le(packet.len() as u32);
        body.put_slice(packet.body());
    }

    buf.put_slice(&MAGIC);
    buf.put_u32_le(VERSION);
    buf.put_u16_le(container.ctype());
    buf.put_u32_le(container.flags());
    buf.put_u32_le(body_len as u32);
    buf.put_u16_le(crc16(&body));

    if let Some((src, dst)) = container.addr() {
        buf.put_u16_le(src);
        buf.put_u16_le(dst);
        buf.put_bytes(0, 16);
    }

    buf.put_slice(&body);
    buf.freeze()
}

/// Parse and validate the fixed 20-byte header. Length and flag checks run
/// here, before any body byte is looked at.
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Result<Head, FrameError> {
    let mut buf = &buf[..];

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }

    let version = buf.get_u32_le();
    if version != VERSION {
        return Err(FrameError::BadVersion(version));
    }

    let ctype = buf.get_u16_le();
    let flags = buf.get_u32_le();
    if flags & !FLAG_ADDR != 0 {
        // crypt/compress/packed are reserved and never valid on the wire.
        return Err(FrameError::ReservedFlags(flags));
    }

    let body_len = buf.get_u32_le();
    if body_len as usize > MAX_CONTAINER_SIZE {
        return Err(FrameError::ContainerTooBig(body_len));
    }

    let crc = buf.get_u16_le();
    Ok(Head { ctype, flags, body_len, crc })
}

/// Parse the 20-byte address extension.
pub fn decode_addr_ext(buf: &[u8; ADDR_EXT_SIZE]) -> Result<(u16, u16), FrameError> {
    let mut buf = &buf[..];
    let src = buf.get_u16_le();
    let dst = buf.get_u16_le();
    if buf.iter().any(|&b| b != 0) {
        return Err(FrameError::ReservedWords);
    }
    Ok((src, dst))
}

/// Walk the container body into its ordered packet list. Consumes exactly
/// `body`; any overrun or zero packet type fails.
pub fn decode_packets(body: &[u8]) -> Result<Vec<Packet>, FrameError> {
    let mut packets = Vec::new();
    let mut buf = body;

    while !buf.is_empty() {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let ptype = buf.get_u32_le();
        if ptype == PACKET_TYPE_NONE {
            return Err(FrameError::ZeroPacketType);
        }
        let len = buf.get_u32_le();
        if len as usize > MAX_PACKET_SIZE {
            return Err(FrameError::PacketTooBig(len));
        }
        if buf.len() < len as usize {
            return Err(FrameError::Truncated);
        }
        let packet = Packet::with_body(ptype, &buf[..len as usize])
            .expect("length checked against packet limit");
        buf.advance(len as usize);
        packets.push(packet);
    }

    Ok(packets)
}

pub(crate) fn assemble(
    head: Head,
    addr: Option<(u16, u16)>,
    body: &[u8],
) -> Result<Container, FrameError> {
    let computed = crc16(body);
    if computed != head.crc {
        return Err(FrameError::Checksum { header: head.crc, computed });
    }

    let mut container = Container::new(head.ctype);
    container.set_addr_opt(addr);
    for packet in decode_packets(body)? {
        container.push_packet(packet);
    }
    Ok(container)
}

/// Decode one container from an exact-length buffer.
pub fn decode(buf: &[u8]) -> Result<Container, FrameError> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::Truncated);
    }
    let head = decode_header(buf[..HEADER_SIZE].try_into().expect("length checked"))?;

    let mut offset = HEADER_SIZE;
    let addr = if head.has_addr() {
        if buf.len() < offset + ADDR_EXT_SIZE {
            return Err(FrameError::Truncated);
        }
        let ext = buf[offset..offset + ADDR_EXT_SIZE].try_into().expect("length checked");
        offset += ADDR_EXT_SIZE;
        Some(decode_addr_ext(ext)?)
    } else {
        None
    };

    let body_len = head.body_len as usize;
    if buf.len() < offset + body_len {
        return Err(FrameError::Truncated);
    }
    if buf.len() > offset + body_len {
        return Err(FrameError::TrailingBytes);
    }
    assemble(head, addr, &buf[offset..])
}

#[derive(Clone, Copy)]
enum DecodeState {
    Header,
    AddrExt { head: Head },
    Body { head: Head, addr: Option<(u16, u16)> },
}

/// Incremental container decoder for non-blocking receive paths.
///
/// Feed arbitrary chunkings of the byte stream; complete containers come
/// out in order. The first framing violation poisons the decoder: the
/// frame boundary is lost and the connection must be dropped.
pub struct VepDecoder {
    buf: BytesMut,
    state: DecodeState,
    poisoned: Option<FrameError>,
}

impl Default for VepDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VepDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(HEADER_SIZE),
            state: DecodeState::Header,
            poisoned: None,
        }
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed by a decoded container.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn fail(&mut self, err: FrameError) -> Result<Option<Container>, FrameError> {
        self.poisoned = Some(err);
        Err(err)
    }

    /// Decode the next complete container.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next(&mut self) -> Result<Option<Container>, FrameError> {
        if let Some(err) = self.poisoned {
            return Err(err);
        }

        loop {
            match self.state {
                DecodeState::Header => {
                    if self.buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let raw: [u8; HEADER_SIZE] =
                        self.buf[..HEADER_SIZE].try_into().expect("length checked");
                    let head = match decode_header(&raw) {
                        Ok(head) => head,
                        Err(err) => return self.fail(err),
                    };
                    self.buf.advance(HEADER_SIZE);
                    self.state = if head.has_addr() {
                        DecodeState::AddrExt { head }
                    } else {
                        DecodeState::Body { head, addr: None }
                    };
                }

                DecodeState::AddrExt { head } => {
                    if self.buf.len() < ADDR_EXT_SIZE {
                        return Ok(None);
                    }
                    let raw: [u8; ADDR_EXT_SIZE] =
                        self.buf[..ADDR_EXT_SIZE].try_into().expect("length checked");
                    let addr = match decode_addr_ext(&raw) {
                        Ok(addr) => addr,
                        Err(err) => return self.fail(err),
                    };
                    self.buf.advance(ADDR_EXT_SIZE);
                    self.state = DecodeState::Body { head, addr: Some(addr) };
                }

                DecodeState::Body { head, addr } => {
                    let body_len = head.body_len as usize;
                    if self.buf.len() < body_len {
                        return Ok(None);
                    }
                    let body = self.buf.split_to(body_len);
                    self.state = DecodeState::Header;
                    return match assemble(head, addr, &body) {
                        Ok(container) => Ok(Some(container)),
                        Err(err) => self.fail(err),
                    };
                }
            }
        }
    }
}
