//! # Carbon
//!
//! Typed, length-delimited, multi-packet message exchange over TCP and
//! UNIX-domain sockets, coordinated by a uniform event-and-timer runtime.
//!
//! ## Architecture
//!
//! Carbon is structured in three layers:
//!
//! - **`carbon-core`**: event loops, timers, sessions, sync barrier,
//!   breaker-equipped sockets
//! - **`carbon-vep`**: the VEP container/packet wire format
//! - **`carbon`**: connector, server and client services (this crate)
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use carbon::prelude::*;
//!
//! # fn main() -> carbon::Result<()> {
//! let runtime = Runtime::new(Version::new(1, 0));
//!
//! // The application's own loop; completion events arrive here.
//! let mut lp = EventLoop::<VepEvent>::new("app");
//!
//! let client = NetClient::new(
//!     VepCodec,
//!     ClientConfig::default(),
//!     runtime.sessions(),
//!     EventTarget::broadcast(lp.handle()),
//! );
//!
//! let addr = PeerAddr::parse("tcp://127.0.0.1:5555").unwrap();
//! client.connect_sync(&addr, &mut lp, Duration::from_secs(5))?;
//!
//! // One request, one reply, correlated by session id.
//! let request = Arc::new(Container::with_packet(CONTAINER_APP, 1));
//! let reply = client.io_sync(request, &mut lp, Duration::from_secs(5))?;
//! println!("reply has {} packets", reply.packet_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Every logical actor is a thread with a single-threaded event loop;
//! cross-actor communication is an event posted to a peer's loop or a
//! work item on a shared queue. Blocking waits are cancellable through
//! socket breakers; sync calls park the caller on its own loop until the
//! completion with the matching session id arrives.

#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod config;
pub mod connector;
pub mod events;
pub mod packet_io;
pub mod responder;
pub mod runtime;
pub mod server;
mod server_conn;

/// Development helpers (tests)
pub mod dev_tracing;

// Re-export the layers underneath.
pub use carbon_core::error::{Error, Result};
pub use carbon_core::event::{Address, Envelope, EventReceiver, ReceiverId};
pub use carbon_core::event_loop::{EventLoop, EventLoopThread, EventTarget, LoopHandle};
pub use carbon_core::net::addr::PeerAddr;
pub use carbon_core::net::socket::Socket;
pub use carbon_core::session::{SessionId, SessionRegistry, NO_SESSION};
pub use carbon_core::timer::{Timer, TimerMode};
pub use carbon_vep::{Container, Packet, VepCodec, CONTAINER_APP, CONTAINER_SYSTEM};

pub use client::NetClient;
pub use connector::Connector;
pub use events::{ConnHandle, NetEvent};
pub use packet_io::PacketIo;
pub use responder::{SysResponder, VepEvent};
pub use runtime::Runtime;
pub use server::NetServer;

/// Prelude module for convenient imports
///
/// ```rust
/// use carbon::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::NetClient;
    pub use crate::config::{ClientConfig, ConnectorConfig, ServerConfig};
    pub use crate::connector::Connector;
    pub use crate::events::{ConnHandle, NetEvent};
    pub use crate::packet_io::PacketIo;
    pub use crate::responder::{SysResponder, VepEvent};
    pub use crate::runtime::Runtime;
    pub use crate::server::NetServer;
    pub use carbon_core::error::{Error, Result};
    pub use carbon_core::event_loop::{EventLoop, EventLoopThread, EventTarget};
    pub use carbon_core::net::addr::PeerAddr;
    pub use carbon_core::session::{SessionId, NO_SESSION};
    pub use carbon_core::timer::{Timer, TimerMode};
    pub use carbon_vep::container::{Container, CONTAINER_APP, CONTAINER_SYSTEM};
    pub use carbon_vep::system::Version;
    pub use carbon_vep::VepCodec;
}
