//! Carbon Core
//!
//! This crate contains the runtime building blocks of the Carbon framework:
//! - Event loop and addressed event dispatch (`event`, `event_loop`)
//! - Timers with lazy-invalidation heaps (`timer`)
//! - Process-wide session identifiers (`session`)
//! - Sync barrier for blocking on async completions (`sync`)
//! - Breaker-equipped non-blocking sockets (`breaker`, `net`)
//! - The framed-transport codec seam (`codec`)
//! - Error codes (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::match_same_arms)]

pub mod breaker;
pub mod codec;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod net;
pub mod session;
pub mod sync;
pub mod timer;

// Small prelude for downstream crates; kept minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::codec::WireCodec;
    pub use crate::error::{Error, Result};
    pub use crate::event::{Address, Envelope, EventReceiver, ReceiverId};
    pub use crate::event_loop::{EventLoop, EventLoopThread, EventTarget, LoopHandle};
    pub use crate::net::addr::PeerAddr;
    pub use crate::net::socket::{Interest, RecvMode, Socket};
    pub use crate::session::{SessionId, SessionRegistry, NO_SESSION};
    pub use crate::timer::{Timer, TimerMode};
}
