//! VEP containers: the outer framed message, a header plus an ordered list
//! of packets.

use std::fmt;

use crate::names;
use crate::packet::Packet;

/// Container type carried in the header.
pub type ContainerType = u16;

/// Framework-level container: system packets (version, stats, ...).
pub const CONTAINER_SYSTEM: ContainerType = 0;
/// First application container type.
pub const CONTAINER_APP: ContainerType = 1;

/// Optional source/destination slot in the container header.
pub type VepAddr = u16;

pub const ADDR_NONE: VepAddr = 0;
pub const ADDR_BROADCAST: VepAddr = 0xFFFF;

/// Container flag bits. `CRYPT`, `COMPRESS` and `PACKED` are reserved: the
/// encoder never sets them and the decoder rejects them.
pub const FLAG_CRYPT: u32 = 0x0000_0001;
pub const FLAG_COMPRESS: u32 = 0x0000_0002;
pub const FLAG_PACKED: u32 = 0x0000_0004;
/// Source/destination addresses present in the header.
pub const FLAG_ADDR: u32 = 0x0000_0008;

/// An outer framed message. Shared between the sender and the in-flight
/// send queue as `Arc<Container>`; receive paths build fresh containers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Container {
    ctype: ContainerType,
    addr: Option<(VepAddr, VepAddr)>,
    packets: Vec<Packet>,
}

impl Container {
    /// Create an empty container of the given type.
    #[must_use]
    pub fn new(ctype: ContainerType) -> Self {
        Self { ctype, addr: None, packets: Vec::new() }
    }

    /// Create a container holding one empty packet of `ptype`.
    #[must_use]
    pub fn with_packet(ctype: ContainerType, ptype: u32) -> Self {
        let mut container = Self::new(ctype);
        container.packets.push(Packet::new(ptype));
        container
    }

    /// Append an empty packet and return it for filling.
    pub fn insert_packet(&mut self, ptype: u32) -> &mut Packet {
        self.packets.push(Packet::new(ptype));
        self.packets.last_mut().expect("just pushed")
    }

    /// Append a packet carrying `data`.
    pub fn insert_packet_with(&mut self, ptype: u32, data: &[u8]) -> carbon_core::error::Result<()> {
        self.packets.push(Packet::with_body(ptype, data)?);
        Ok(())
    }

    /// Append data to the packet at `index`.
    pub fn append_data(&mut self, index: usize, data: &[u8]) -> carbon_core::error::Result<()> {
        match self.packets.get_mut(index) {
            Some(packet) => packet.put_data(data),
            None => Err(carbon_core::error::Error::InvalidArg),
        }
    }

    /// Drop every packet and the address slots; the type stays.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.addr = None;
    }

    #[must_use]
    pub fn ctype(&self) -> ContainerType {
        self.ctype
    }

    /// Header flags as encoded on the wire.
    #[must_use]
    pub fn flags(&self) -> u32 {
        if self.addr.is_some() {
            FLAG_ADDR
        } else {
            0
        }
    }

    /// Set the optional source/destination address slots.
    pub fn set_addr(&mut self, src: VepAddr, dst: VepAddr) {
        self.addr = Some((src, dst));
    }

    #[must_use]
    pub fn addr(&self) -> Option<(VepAddr, VepAddr)> {
        self.addr
    }

    pub(crate) fn set_addr_opt(&mut self, addr: Option<(VepAddr, VepAddr)>) {
        self.addr = addr;
    }

    #[must_use]
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    #[must_use]
    pub fn packet(&self, index: usize) -> Option<&Packet> {
        self.packets.get(index)
    }

    #[must_use]
    pub fn packet_mut(&mut self, index: usize) -> Option<&mut Packet> {
        self.packets.get_mut(index)
    }

    /// Type of the packet at `index`, [`crate::packet::PACKET_TYPE_NONE`]
    /// when out of range.
    #[must_use]
    pub fn packet_type(&self, index: usize) -> u32 {
        self.packets.get(index).map_or(crate::packet::PACKET_TYPE_NONE, Packet::ptype)
    }

    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Total body length on the wire (sum of encoded packets).
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.packets.iter().map(Packet::encoded_len).sum()
    }

    /// Every packet valid; empty containers are valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.packets.iter().all(Packet::is_valid)
    }

    pub(crate) fn push_packet(&mut self, packet: Packet) {
        self.packets.push(packet);
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", names::container_name(self.ctype))?;
        for (index, packet) in self.packets.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", names::packet_name(self.ctype, packet.ptype()))?;
        }
        write!(f, "] {} byte(s)", self.body_len())
    }
}
