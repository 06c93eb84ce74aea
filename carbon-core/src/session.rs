//! Process-wide session identifiers.
//!
//! A session id correlates a sent container with its completion event and/or
//! reply. Ids are non-zero, monotonically increasing and never reused while
//! an outstanding operation still references them; `0` is the "no session"
//! sentinel.

use std::sync::atomic::{AtomicU64, Ordering};

/// Correlates an operation with its completion event and/or reply.
pub type SessionId = u64;

/// Sentinel meaning "no session": no completion event is expected.
pub const NO_SESSION: SessionId = 0;

/// Monotonic allocator of unique session ids, safe under concurrent callers.
#[derive(Debug)]
pub struct SessionRegistry {
    next: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Allocate the next session id. Never returns [`NO_SESSION`].
    pub fn next(&self) -> SessionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
