//! # Carbon VEP
//!
//! **Internal framing crate for Carbon.**
//!
//! The VEP wire format: containers (magic `veri`, version 1, little-endian,
//! CRC-16/ARC over the body) carrying one or more typed, length-delimited
//! packets. Container bodies are capped at 16 MiB, packet bodies at 8 MiB.
//!
//! For application development use the `carbon` crate, which provides the
//! connector/server/client services on top of this format.

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod codec;
pub mod container;
pub mod crc;
pub mod names;
pub mod packet;
pub mod stream;
pub mod system;

pub use codec::{FrameError, VepDecoder, MAX_CONTAINER_SIZE};
pub use container::{Container, ContainerType, CONTAINER_APP, CONTAINER_SYSTEM};
pub use packet::{Packet, MAX_PACKET_SIZE};
pub use stream::VepCodec;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::container::{Container, CONTAINER_APP, CONTAINER_SYSTEM};
    pub use crate::packet::Packet;
    pub use crate::stream::VepCodec;
    pub use crate::system::Version;
}
