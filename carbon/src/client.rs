//! Network client: the single-connection counterpart of the server actor.
//!
//! One actor thread owns the connection; the public API posts command
//! events (`ClientDo*`) to the actor's loop and completions come back to
//! the parent receiver as `NET_CLIENT_*` events. The `*_sync` variants
//! ride the caller's own loop barrier, so they must be issued from the
//! thread that owns that loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use carbon_core::codec::WireCodec;
use carbon_core::error::{Error, Result};
use carbon_core::event_loop::{EventLoop, EventLoopThread, EventTarget};
use carbon_core::net::addr::PeerAddr;
use carbon_core::net::socket::Socket;
use carbon_core::session::{SessionId, SessionRegistry, NO_SESSION};

use crate::config::ClientConfig;
use crate::events::NetEvent;

struct Shared<C: WireCodec> {
    codec: Arc<C>,
    config: ClientConfig,
    sessions: Arc<SessionRegistry>,
    parent: EventTarget<NetEvent<C::Frame>>,
    socket: Mutex<Option<Arc<Socket>>>,
    ever_connected: AtomicBool,
}

impl<C: WireCodec> Shared<C> {
    fn current_socket(&self) -> Option<Arc<Socket>> {
        self.socket.lock().clone()
    }

    /// Drop the connection; any blocked operation on it is woken.
    fn close_socket(&self) {
        if let Some(socket) = self.socket.lock().take() {
            socket.shutdown();
            socket.breaker_trip();
        }
    }

    fn do_connect(&self, addr: &PeerAddr, session: SessionId) {
        self.close_socket();
        let result = match Socket::connect(addr, self.config.connect_timeout, None) {
            Ok(socket) => {
                let enabled = socket.breaker_enable();
                match enabled {
                    Ok(()) => {
                        tracing::debug!(target: "carbon::client", %addr, "connected");
                        *self.socket.lock() = Some(Arc::new(socket));
                        self.ever_connected.store(true, Ordering::Release);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => {
                tracing::debug!(target: "carbon::client", %addr, %err, "connect failed");
                Err(err)
            }
        };
        if session != NO_SESSION {
            self.parent.post(NetEvent::ClientConnected { session, result });
        }
    }

    fn do_send(&self, frame: &C::Frame, session: SessionId) {
        let result = match self.current_socket() {
            Some(socket) => {
                let sent = self.codec.send_frame(&socket, frame, self.config.send_timeout);
                if let Err(err) = sent {
                    tracing::debug!(target: "carbon::client", session, %err, "send failed");
                    if err.is_disconnect() {
                        self.close_socket();
                    }
                }
                sent
            }
            None => Err(Error::NotConnected),
        };
        if session != NO_SESSION {
            self.parent.post(NetEvent::ClientSent { session, result });
        }
    }

    fn do_recv(&self, session: SessionId) {
        let result = match self.current_socket() {
            Some(socket) => {
                match self.codec.recv_frame(&socket, self.config.recv_timeout) {
                    Ok(frame) => Ok(frame),
                    Err(err) => {
                        tracing::debug!(target: "carbon::client", session, %err,
                            "receive failed");
                        if err == Error::InvalidFrame {
                            // Framing violations close the connection.
                            self.close_socket();
                            Err(Error::ConnectionReset)
                        } else {
                            if err.is_disconnect() {
                                self.close_socket();
                            }
                            Err(err)
                        }
                    }
                }
            }
            None => Err(Error::NotConnected),
        };
        self.parent.post(NetEvent::ClientRecv { session, result });
    }
}

/// Single-connection client with asynchronous (event-driven) and
/// synchronous (blocking-on-session) operations.
pub struct NetClient<C: WireCodec> {
    shared: Arc<Shared<C>>,
    actor: Mutex<Option<EventLoopThread<NetEvent<C::Frame>>>>,
    actor_target: EventTarget<NetEvent<C::Frame>>,
}

impl<C: WireCodec> NetClient<C> {
    /// Create the client and its actor thread. Completion events go to
    /// `parent`.
    pub fn new(
        codec: C,
        config: ClientConfig,
        sessions: Arc<SessionRegistry>,
        parent: EventTarget<NetEvent<C::Frame>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            codec: Arc::new(codec),
            config,
            sessions,
            parent,
            socket: Mutex::new(None),
            ever_connected: AtomicBool::new(false),
        });

        let actor_shared = Arc::clone(&shared);
        let (actor, rid) = EventLoopThread::spawn_with_receiver(
            "carbon-client",
            move |event: &NetEvent<C::Frame>| match event {
                NetEvent::ClientDoConnect { addr, session } => {
                    actor_shared.do_connect(addr, *session);
                    true
                }
                NetEvent::ClientDoSend { frame, session } => {
                    actor_shared.do_send(frame, *session);
                    true
                }
                NetEvent::ClientDoRecv { session } => {
                    actor_shared.do_recv(*session);
                    true
                }
                NetEvent::ClientDoDisconnect => {
                    actor_shared.close_socket();
                    true
                }
                _ => false,
            },
        )
        .expect("spawn client actor");

        let actor_target = EventTarget::new(actor.handle(), rid);
        Self { shared, actor: Mutex::new(Some(actor)), actor_target }
    }

    /// Connect in the background; completion arrives as
    /// `ClientConnected { session }`.
    pub fn connect_async(&self, addr: &PeerAddr, session: SessionId) -> Result<()> {
        self.actor_target
            .post(NetEvent::ClientDoConnect { addr: addr.clone(), session });
        Ok(())
    }

    /// Connect, blocking the caller's loop up to `timeout`.
    pub fn connect_sync(
        &self,
        addr: &PeerAddr,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<()> {
        let session = self.shared.sessions.next();
        self.connect_async(addr, session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ClientConnected { .. })
        })?;
        match event {
            NetEvent::ClientConnected { result, .. } => result,
            _ => Ok(()),
        }
    }

    /// Queue one send; completion arrives as `ClientSent { session }`.
    pub fn send(&self, frame: C::Frame, session: SessionId) -> Result<()> {
        self.actor_target.post(NetEvent::ClientDoSend { frame, session });
        Ok(())
    }

    /// Send, blocking the caller's loop up to `timeout`.
    pub fn send_sync(
        &self,
        frame: C::Frame,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<()> {
        let session = self.shared.sessions.next();
        self.send(frame, session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ClientSent { .. })
        })?;
        match event {
            NetEvent::ClientSent { result, .. } => result,
            _ => Ok(()),
        }
    }

    /// Queue one receive; the container (or error) arrives as
    /// `ClientRecv { session }`.
    pub fn recv(&self, session: SessionId) -> Result<()> {
        self.actor_target.post(NetEvent::ClientDoRecv { session });
        Ok(())
    }

    /// Receive one container, blocking the caller's loop up to `timeout`.
    pub fn recv_sync(
        &self,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<C::Frame> {
        let session = self.shared.sessions.next();
        self.recv(session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ClientRecv { .. })
        })?;
        match event {
            NetEvent::ClientRecv { result, .. } => result,
            _ => Err(Error::InvalidArg),
        }
    }

    /// Send, then receive one reply; both completions carry `session`.
    pub fn io(&self, frame: C::Frame, session: SessionId) -> Result<()> {
        self.actor_target.post(NetEvent::ClientDoSend { frame, session });
        self.actor_target.post(NetEvent::ClientDoRecv { session });
        Ok(())
    }

    /// [`io`](NetClient::io), blocking the caller's loop until the reply
    /// or `timeout`. Never returns a reply from a different session.
    pub fn io_sync(
        &self,
        frame: C::Frame,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<C::Frame> {
        let session = self.shared.sessions.next();
        self.io(frame, session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ClientRecv { .. }) || event.error().is_some()
        })?;
        match event {
            NetEvent::ClientRecv { result, .. } => result,
            other => Err(other.error().unwrap_or(Error::InvalidArg)),
        }
    }

    /// `Ok` when connected, [`Error::NotConnected`] after a lost or closed
    /// connection, [`Error::InvalidArg`] when never connected.
    pub fn is_connected(&self) -> Result<()> {
        match self.shared.current_socket() {
            Some(socket) if socket.is_open() => Ok(()),
            Some(_) => Err(Error::NotConnected),
            None if self.shared.ever_connected.load(Ordering::Acquire) => {
                Err(Error::NotConnected)
            }
            None => Err(Error::InvalidArg),
        }
    }

    /// Close the connection. Any blocked operation returns
    /// [`Error::Canceled`] or a closed-connection error.
    pub fn disconnect(&self) {
        self.shared.close_socket();
    }

    /// Disconnect and stop the actor thread.
    pub fn shutdown(&self) {
        self.shared.close_socket();
        let actor = self.actor.lock().take();
        if let Some(mut actor) = actor {
            actor.stop();
        }
    }
}

impl<C: WireCodec> Drop for NetClient<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
