//! SYSTEM container payloads.
//!
//! Containers of type [`CONTAINER_SYSTEM`] carry framework-level requests:
//! version probes, connector statistics, operation results. Payloads are
//! little-endian like the rest of the wire format.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use carbon_core::error::{Error, Result};

use crate::container::{Container, CONTAINER_SYSTEM};

pub const SYS_PACKET_NONE: u32 = 0;
pub const SYS_PACKET_RESULT: u32 = 1;
pub const SYS_PACKET_VERSION: u32 = 2;
pub const SYS_PACKET_VERSION_REPLY: u32 = 3;
pub const SYS_PACKET_MEMORY_STAT: u32 = 4;
pub const SYS_PACKET_MEMORY_STAT_REPLY: u32 = 5;
pub const SYS_PACKET_NETCONN_STAT: u32 = 6;
pub const SYS_PACKET_NETCONN_STAT_REPLY: u32 = 7;

/// A component version, packed on the wire as a u32 (major in the high
/// half).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        (self.major as u32) << 16 | self.minor as u32
    }

    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        Self { major: (raw >> 16) as u16, minor: raw as u16 }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// VERSION_REPLY payload: application version first, library version
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionReply {
    pub application: Version,
    pub library: Version,
}

/// NETCONN_STAT_REPLY payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetConnStats {
    pub send: u64,
    pub recv: u64,
    pub fail: u64,
    pub connect: u64,
    pub accept: u64,
    pub connections: u64,
}

fn system_container(ptype: u32, payload: &[u8]) -> Container {
    let mut container = Container::new(CONTAINER_SYSTEM);
    container
        .insert_packet_with(ptype, payload)
        .expect("system payloads are far below the packet limit");
    container
}

fn system_payload(container: &Container, ptype: u32, len: usize) -> Result<&[u8]> {
    if container.ctype() != CONTAINER_SYSTEM {
        return Err(Error::InvalidArg);
    }
    let packet = container.packet(0).ok_or(Error::InvalidFrame)?;
    if packet.ptype() != ptype || packet.len() != len {
        return Err(Error::InvalidFrame);
    }
    Ok(packet.body())
}

/// Empty VERSION probe.
#[must_use]
pub fn version_request() -> Container {
    system_container(SYS_PACKET_VERSION, &[])
}

#[must_use]
pub fn version_reply(reply: &VersionReply) -> Container {
    let mut body = BytesMut::with_capacity(8);
    body.put_u32_le(reply.application.to_u32());
    body.put_u32_le(reply.library.to_u32());
    system_container(SYS_PACKET_VERSION_REPLY, &body)
}

pub fn parse_version_reply(container: &Container) -> Result<VersionReply> {
    let mut body = system_payload(container, SYS_PACKET_VERSION_REPLY, 8)?;
    Ok(VersionReply {
        application: Version::from_u32(body.get_u32_le()),
        library: Version::from_u32(body.get_u32_le()),
    })
}

/// RESULT packet carrying an operation status code.
#[must_use]
pub fn result_reply(code: i32) -> Container {
    system_container(SYS_PACKET_RESULT, &code.to_le_bytes())
}

pub fn parse_result(container: &Container) -> Result<i32> {
    let mut body = system_payload(container, SYS_PACKET_RESULT, 4)?;
    Ok(body.get_i32_le())
}

/// Empty NETCONN_STAT probe.
#[must_use]
pub fn netconn_stat_request() -> Container {
    system_container(SYS_PACKET_NETCONN_STAT, &[])
}

#[must_use]
pub fn netconn_stat_reply(stats: &NetConnStats) -> Container {
    let mut body = BytesMut::with_capacity(48);
    body.put_u64_le(stats.send);
    body.put_u64_le(stats.recv);
    body.put_u64_le(stats.fail);
    body.put_u64_le(stats.connect);
    body.put_u64_le(stats.accept);
    body.put_u64_le(stats.connections);
    system_container(SYS_PACKET_NETCONN_STAT_REPLY, &body)
}

pub fn parse_netconn_stats(container: &Container) -> Result<NetConnStats> {
    let mut body = system_payload(container, SYS_PACKET_NETCONN_STAT_REPLY, 48)?;
    Ok(NetConnStats {
        send: body.get_u64_le(),
        recv: body.get_u64_le(),
        fail: body.get_u64_le(),
        connect: body.get_u64_le(),
        accept: body.get_u64_le(),
        connections: body.get_u64_le(),
    })
}
