//! Event addressing and receiver plumbing.
//!
//! The loop is generic over the concrete event enum a deployment defines;
//! payload shapes are tagged variants on that enum, so dispatch never needs
//! runtime type discrimination. The [`Envelope`] trait is the only thing
//! the runtime asks of an event: a cheap clone (payloads are refcounted)
//! and the session id used by completion matching.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::session::{SessionId, NO_SESSION};

static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(1);

/// Requirements on a deployment's event enum.
pub trait Envelope: Clone + Send + 'static {
    /// Session this event completes, or [`NO_SESSION`].
    fn session(&self) -> SessionId {
        NO_SESSION
    }
}

/// Identity of a receiver registered on some event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

impl ReceiverId {
    pub(crate) fn alloc() -> Self {
        Self(NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recv-{}", self.0)
    }
}

/// Destination of a posted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// One registered receiver.
    To(ReceiverId),
    /// Every receiver bound to the loop.
    Broadcast,
}

/// Handler bound to an event loop. Returns whether the event was consumed;
/// unconsumed events are logged and discarded by the loop.
pub trait EventReceiver<E>: Send {
    fn process_event(&mut self, event: &E) -> bool;
}

impl<E, F> EventReceiver<E> for F
where
    F: FnMut(&E) -> bool + Send,
{
    fn process_event(&mut self, event: &E) -> bool {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_ids_unique() {
        let a = ReceiverId::alloc();
        let b = ReceiverId::alloc();
        assert_ne!(a, b);
    }

    #[test]
    fn test_closure_receiver() {
        let mut seen = 0u32;
        {
            let mut receiver = |event: &u32| {
                seen = *event;
                true
            };
            // u32 stands in for an event enum here.
            assert!(receiver.process_event(&7));
        }
        assert_eq!(seen, 7);
    }
}
