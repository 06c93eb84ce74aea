//! Per-connection server actor.
//!
//! One accepted socket, one long-lived actor thread with its own event
//! loop. The iteration is: dispatch pending events (the `ServerDoSend`
//! path) and timers, then block on the socket with the breaker armed; on
//! readable, perform one receive. Producers waking the loop trip the
//! breaker only while the actor is actually parked in `select`, so an
//! in-progress receive is never cancelled from under a queued send.
//!
//! The actor emits `ServerDisconnected` at most once, when the socket is
//! observed closed either locally or by the peer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use carbon_core::codec::WireCodec;
use carbon_core::error::Error;
use carbon_core::event_loop::{EventLoop, EventTarget, LoopHandle};
use carbon_core::net::socket::{Interest, Socket};
use carbon_core::session::{SessionId, NO_SESSION};

use crate::events::{ConnHandle, NetEvent};
use crate::server::ServerStats;

/// Idle select slice when no timer is armed.
const IDLE_SLICE: Duration = Duration::from_secs(60);

/// Backoff after an I/O error before the next iteration.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) struct ConnActor<C: WireCodec> {
    lp: LoopHandle<NetEvent<C::Frame>>,
    rid: carbon_core::event::ReceiverId,
    socket: Arc<Socket>,
    join: Option<thread::JoinHandle<()>>,
}

impl<C: WireCodec> ConnActor<C> {
    /// Queue a send on this connection's loop.
    pub(crate) fn post_send(&self, frame: C::Frame, session: SessionId) {
        self.lp.post_to(self.rid, NetEvent::ServerDoSend { frame, session });
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.socket.is_open()
    }

    /// Close the socket and stop the actor. The actor's exit path emits
    /// the (deduplicated) disconnect notification.
    pub(crate) fn stop(&mut self) {
        self.socket.shutdown();
        self.lp.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl<C: WireCodec> Drop for ConnActor<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn notify_closed<F: Clone + Send + Sync + 'static>(
    parent: &EventTarget<NetEvent<F>>,
    conn: ConnHandle,
    disconnect_sent: &AtomicBool,
) {
    if !disconnect_sent.swap(true, Ordering::AcqRel) {
        tracing::debug!(target: "carbon::server", %conn, "connection closed, notifying");
        parent.post(NetEvent::ServerDisconnected { conn });
    }
}

/// Spawn the actor thread for an accepted socket.
pub(crate) fn spawn<C: WireCodec>(
    codec: Arc<C>,
    conn: ConnHandle,
    socket: Arc<Socket>,
    parent: EventTarget<NetEvent<C::Frame>>,
    send_timeout: Duration,
    recv_timeout: Duration,
    stats: Arc<ServerStats>,
) -> io::Result<ConnActor<C>> {
    if socket.breaker_enable().is_err() {
        return Err(io::Error::new(io::ErrorKind::Other, "cannot enable breaker"));
    }

    let mut lp = EventLoop::new(&format!("srv-{conn}"));
    let handle = lp.handle();
    let disconnect_sent = Arc::new(AtomicBool::new(false));
    let in_select = Arc::new(AtomicBool::new(false));

    // Wake a parked select, never an in-progress receive.
    {
        let socket = Arc::clone(&socket);
        let in_select = Arc::clone(&in_select);
        handle.set_wake_hook(Some(Arc::new(move || {
            if in_select.load(Ordering::Acquire) {
                socket.breaker_trip();
            }
        })));
    }

    let rid = {
        let codec = Arc::clone(&codec);
        let socket = Arc::clone(&socket);
        let parent = parent.clone();
        let stats = Arc::clone(&stats);
        let disconnect_sent = Arc::clone(&disconnect_sent);
        lp.add_receiver(Box::new(move |event: &NetEvent<C::Frame>| match event {
            NetEvent::ServerDoSend { frame, session } => {
                do_send(
                    codec.as_ref(),
                    &socket,
                    frame,
                    *session,
                    &parent,
                    conn,
                    send_timeout,
                    &stats,
                    &disconnect_sent,
                );
                true
            }
            _ => false,
        }))
    };

    let actor_socket = Arc::clone(&socket);
    let join = thread::Builder::new().name(format!("carbon-srv-{conn}")).spawn(move || {
        actor_main(
            lp,
            codec,
            conn,
            &actor_socket,
            &parent,
            recv_timeout,
            &stats,
            &disconnect_sent,
            &in_select,
        );
    })?;

    Ok(ConnActor { lp: handle, rid, socket, join: Some(join) })
}

#[allow(clippy::too_many_arguments)]
fn do_send<C: WireCodec>(
    codec: &C,
    socket: &Arc<Socket>,
    frame: &C::Frame,
    session: SessionId,
    parent: &EventTarget<NetEvent<C::Frame>>,
    conn: ConnHandle,
    send_timeout: Duration,
    stats: &ServerStats,
    disconnect_sent: &AtomicBool,
) {
    match codec.send_frame(socket, frame, send_timeout) {
        Ok(()) => {
            stats.count_send();
            tracing::trace!(target: "carbon::server", %conn, session, "container sent");
            if session != NO_SESSION {
                parent.post(NetEvent::ServerSent { session, result: Ok(()) });
            }
        }
        Err(err) => {
            stats.count_fail();
            tracing::debug!(target: "carbon::server", %conn, session, %err, "send failed");
            if session != NO_SESSION {
                parent.post(NetEvent::ServerSent { session, result: Err(err) });
            }
            if err.is_disconnect() {
                socket.shutdown();
                notify_closed(parent, conn, disconnect_sent);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn actor_main<C: WireCodec>(
    mut lp: EventLoop<NetEvent<C::Frame>>,
    codec: Arc<C>,
    conn: ConnHandle,
    socket: &Arc<Socket>,
    parent: &EventTarget<NetEvent<C::Frame>>,
    recv_timeout: Duration,
    stats: &ServerStats,
    disconnect_sent: &AtomicBool,
    in_select: &AtomicBool,
) {
    tracing::debug!(target: "carbon::server", %conn, "connection actor running");

    while !lp.is_done() {
        lp.dispatch_pending();
        if lp.is_done() {
            break;
        }

        let slice = match lp.next_timer_deadline() {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    continue; // timers due, dispatch again
                }
                left.min(IDLE_SLICE)
            }
            None => IDLE_SLICE,
        };

        in_select.store(true, Ordering::Release);
        if lp.handle().has_pending_events() {
            // An event slipped in before the breaker was armed.
            in_select.store(false, Ordering::Release);
            continue;
        }
        let ready = socket.select(Interest::Read, slice);
        in_select.store(false, Ordering::Release);

        match ready {
            Ok(()) => {
                let received = codec.recv_frame(socket, recv_timeout);
                socket.breaker_reset();
                match received {
                    Ok(frame) => {
                        stats.count_recv();
                        disconnect_sent.store(false, Ordering::Release);
                        parent.post(NetEvent::ServerRecv { conn, frame });
                    }
                    Err(Error::TimedOut | Error::Canceled | Error::Interrupted) => {}
                    Err(err) => {
                        stats.count_fail();
                        tracing::debug!(target: "carbon::server", %conn, %err,
                            "receive failed");
                        socket.shutdown();
                        notify_closed(parent, conn, disconnect_sent);
                        lp.park_until(Some(Instant::now() + ERROR_BACKOFF));
                    }
                }
            }
            Err(Error::Canceled) => {
                // Breaker: new events queued, or the owner is stopping us.
                socket.breaker_reset();
            }
            Err(Error::TimedOut) => {}
            Err(err) => {
                tracing::debug!(target: "carbon::server", %conn, %err, "socket wait failed");
                socket.shutdown();
                notify_closed(parent, conn, disconnect_sent);
                lp.park_until(Some(Instant::now() + ERROR_BACKOFF));
            }
        }
    }

    // The socket being closed at exit is the "observed closed locally"
    // case; the notification is deduplicated.
    if !socket.is_open() {
        notify_closed(parent, conn, disconnect_sent);
    }
    tracing::debug!(target: "carbon::server", %conn, "connection actor stopped");
}
