//! VEP packets: the typed, length-delimited sub-messages of a container.

use smallvec::SmallVec;

use carbon_core::error::{Error, Result};

/// Packet header on the wire: type (u32 LE) + body length (u32 LE).
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum packet body size.
pub const MAX_PACKET_SIZE: usize = 8 * 1024 * 1024;

/// Inline body capacity before the packet spills to the heap.
pub const PACKET_INLINE_SIZE: usize = 4096;

/// The null packet type; never valid on the wire.
pub const PACKET_TYPE_NONE: u32 = 0;

/// A typed sub-message owned by exactly one container.
///
/// The body starts in an inline one-page buffer and grows onto the heap for
/// larger payloads, up to [`MAX_PACKET_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    ptype: u32,
    body: SmallVec<[u8; PACKET_INLINE_SIZE]>,
}

impl Packet {
    /// Create an empty packet of the given type.
    #[must_use]
    pub fn new(ptype: u32) -> Self {
        Self { ptype, body: SmallVec::new() }
    }

    /// Create a packet carrying `data`.
    pub fn with_body(ptype: u32, data: &[u8]) -> Result<Self> {
        let mut packet = Self::new(ptype);
        packet.put_data(data)?;
        Ok(packet)
    }

    /// Append bytes to the body.
    ///
    /// # Errors
    ///
    /// [`Error::TooBig`] when the body would exceed [`MAX_PACKET_SIZE`].
    pub fn put_data(&mut self, data: &[u8]) -> Result<()> {
        if self.body.len() + data.len() > MAX_PACKET_SIZE {
            tracing::debug!(target: "carbon::vep", "packet data overflow");
            return Err(Error::TooBig);
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    #[must_use]
    pub fn ptype(&self) -> u32 {
        self.ptype
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// A valid packet has a non-zero type and an in-limit body.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ptype != PACKET_TYPE_NONE && self.body.len() <= MAX_PACKET_SIZE
    }

    /// Header plus body length on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.body.len()
    }
}
