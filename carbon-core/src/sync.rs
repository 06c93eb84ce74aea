//! Sync barrier: park a caller on its own event loop until a
//! session-matched event arrives.
//!
//! The barrier turns any asynchronous, session-addressed service into a
//! blocking call bounded by a timeout. The caller must own the loop: the
//! wait *pumps* the loop inline, so events keep flowing (and are offered to
//! the barrier) while the caller is "blocked". One barrier per loop; the
//! `&mut EventLoop` receiver makes a second concurrent wait impossible and
//! a re-entrant one an error.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::event::Envelope;
use crate::event_loop::EventLoop;
use crate::session::{SessionId, NO_SESSION};

/// Barrier slot attached to a loop while a sync call is in flight.
pub(crate) struct Barrier<E> {
    session: SessionId,
    captured: VecDeque<E>,
}

impl<E: Envelope> Barrier<E> {
    fn new(session: SessionId) -> Self {
        Self { session, captured: VecDeque::new() }
    }

    /// Called by the loop for every dispatched event; keeps a clone of
    /// those completing the awaited session.
    pub(crate) fn offer(&mut self, event: &E) {
        if self.session != NO_SESSION && event.session() == self.session {
            self.captured.push_back(event.clone());
        }
    }
}

impl<E: Envelope> EventLoop<E> {
    /// Block on this loop until an event completes `session` and passes
    /// `accept`, or `timeout` fires.
    ///
    /// Attach the barrier by calling this *after* issuing the async
    /// operation; events queued in between are still seen because they are
    /// only offered at dispatch, and dispatch happens inside this wait.
    /// Session-matched events that `accept` declines (say, a send
    /// completion when the caller wants the reply) are dropped from the
    /// barrier after their normal delivery.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] when the deadline fires; no future event is
    /// consumed. [`Error::WouldBlock`] when a barrier is already attached
    /// (one outstanding barrier per loop).
    pub fn wait_sync_matching(
        &mut self,
        session: SessionId,
        timeout: Duration,
        mut accept: impl FnMut(&E) -> bool,
    ) -> Result<E> {
        if self.barrier.is_some() {
            tracing::debug!(target: "carbon::sync", name = %self.name(),
                "barrier already attached");
            return Err(Error::WouldBlock);
        }

        self.barrier = Some(Barrier::new(session));
        let deadline = Instant::now() + timeout;

        let result = loop {
            self.dispatch_pending();

            let mut matched = None;
            if let Some(barrier) = self.barrier.as_mut() {
                while let Some(event) = barrier.captured.pop_front() {
                    if accept(&event) {
                        matched = Some(event);
                        break;
                    }
                }
            }
            if let Some(event) = matched {
                break Ok(event);
            }

            let now = Instant::now();
            if now >= deadline {
                break Err(Error::TimedOut);
            }
            let next = match self.next_timer_deadline() {
                Some(t) if t < deadline => t,
                _ => deadline,
            };
            self.park_until(Some(next));
        };

        self.barrier = None;
        result
    }

    /// [`wait_sync_matching`](Self::wait_sync_matching) accepting the first
    /// event whose session matches.
    pub fn wait_sync(&mut self, session: SessionId, timeout: Duration) -> Result<E> {
        self.wait_sync_matching(session, timeout, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct Completion {
        session: SessionId,
        value: u32,
    }

    impl Envelope for Completion {
        fn session(&self) -> SessionId {
            self.session
        }
    }

    #[test]
    fn test_wait_returns_matching_session() {
        let mut lp = EventLoop::new("sync-test");
        let handle = lp.handle();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.post_broadcast(Completion { session: 9, value: 1 });
            handle.post_broadcast(Completion { session: 7, value: 2 });
        });

        let event = lp.wait_sync(7, Duration::from_secs(2)).unwrap();
        producer.join().unwrap();

        assert_eq!(event, Completion { session: 7, value: 2 });
        assert!(lp.barrier.is_none());
    }

    #[test]
    fn test_wait_times_out() {
        let mut lp = EventLoop::<Completion>::new("sync-test");

        let start = Instant::now();
        let err = lp.wait_sync(1, Duration::from_millis(100)).unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err, Error::TimedOut);
        assert!(elapsed >= Duration::from_millis(95), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "returned late: {elapsed:?}");
    }

    #[test]
    fn test_filter_skips_unwanted_completions() {
        let mut lp = EventLoop::new("sync-test");
        let handle = lp.handle();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            // Same session: a send completion first, then the reply.
            handle.post_broadcast(Completion { session: 3, value: 0 });
            handle.post_broadcast(Completion { session: 3, value: 42 });
        });

        let event = lp
            .wait_sync_matching(3, Duration::from_secs(2), |event| event.value != 0)
            .unwrap();
        producer.join().unwrap();

        assert_eq!(event.value, 42);
    }

    #[test]
    fn test_events_still_dispatch_while_waiting() {
        let mut lp = EventLoop::new("sync-test");
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = std::sync::Arc::clone(&seen);
        lp.add_receiver(Box::new(move |_: &Completion| {
            sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            true
        }));

        let handle = lp.handle();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.post_broadcast(Completion { session: 99, value: 1 });
            handle.post_broadcast(Completion { session: 5, value: 2 });
        });

        lp.wait_sync(5, Duration::from_secs(2)).unwrap();
        producer.join().unwrap();

        // Both events reached the registered receiver, barrier or not.
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
