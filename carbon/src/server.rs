//! Network server: listener plus one actor per accepted connection.
//!
//! The listen thread accepts sockets until `stop_listen` is called or the
//! connection cap is reached; over-cap accepts are dropped (and counted),
//! never queued. Connections live in an arena keyed by [`ConnHandle`]:
//! the actor holds the handle, the server looks it up, and removal
//! invalidates only the arena entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;

use carbon_core::codec::WireCodec;
use carbon_core::error::{Error, Result};
use carbon_core::event_loop::{EventLoop, EventTarget};
use carbon_core::net::addr::PeerAddr;
use carbon_core::net::socket::{Interest, Socket};
use carbon_core::session::{SessionId, SessionRegistry};

use crate::config::ServerConfig;
use crate::events::{ConnHandle, NetEvent};
use crate::server_conn::{self, ConnActor};

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    /// No longer accepting; existing connections still served.
    Draining,
    Stopped,
}

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    client: AtomicU64,
    client_fail: AtomicU64,
    recv: AtomicU64,
    send: AtomicU64,
    fail: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    /// Accepted clients.
    pub client: u64,
    /// Dropped or failed accepts.
    pub client_fail: u64,
    pub recv: u64,
    pub send: u64,
    pub fail: u64,
    /// Currently open connections.
    pub connections: u64,
}

impl ServerStats {
    pub(crate) fn count_recv(&self) {
        self.recv.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn count_send(&self) {
        self.send.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn count_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }
}

struct Listener {
    socket: Arc<Socket>,
    join: thread::JoinHandle<()>,
}

struct Shared<C: WireCodec> {
    codec: Arc<C>,
    config: ServerConfig,
    sessions: Arc<SessionRegistry>,
    parent: EventTarget<NetEvent<C::Frame>>,
    conns: Mutex<HashMap<ConnHandle, ConnActor<C>>>,
    next_conn: AtomicU64,
    listener: Mutex<Option<Listener>>,
    state: Mutex<ServerState>,
    stats: Arc<ServerStats>,
}

/// Listening server with permanent per-connection actors. Cheap to clone;
/// clones share the connection arena.
pub struct NetServer<C: WireCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: WireCodec> Clone for NetServer<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: WireCodec> NetServer<C> {
    /// Create an idle server. `parent` receives `ServerConnected`,
    /// `ServerRecv`, `ServerSent` and `ServerDisconnected` events.
    pub fn new(
        codec: C,
        config: ServerConfig,
        sessions: Arc<SessionRegistry>,
        parent: EventTarget<NetEvent<C::Frame>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                codec: Arc::new(codec),
                config,
                sessions,
                parent,
                conns: Mutex::new(HashMap::new()),
                next_conn: AtomicU64::new(1),
                listener: Mutex::new(None),
                state: Mutex::new(ServerState::Idle),
                stats: Arc::new(ServerStats::default()),
            }),
        }
    }

    /// Start accepting connections on `addr`.
    pub fn start_listen(&self, addr: &PeerAddr) -> Result<()> {
        let mut guard = self.shared.listener.lock();
        if guard.is_some() {
            return Err(Error::InvalidArg);
        }

        let listener = Arc::new(Socket::listen(addr, self.shared.config.backlog)?);
        listener.breaker_enable()?;
        tracing::info!(target: "carbon::server", %addr, "server listening");

        let shared = Arc::clone(&self.shared);
        let accept_socket = Arc::clone(&listener);
        let join = thread::Builder::new()
            .name("carbon-srv-accept".into())
            .spawn(move || accept_main(&shared, &accept_socket))?;
        *guard = Some(Listener { socket: listener, join });
        *self.shared.state.lock() = ServerState::Listening;
        Ok(())
    }

    /// Stop accepting. Existing connections keep running.
    pub fn stop_listen(&self) {
        let listener = self.shared.listener.lock().take();
        if let Some(listener) = listener {
            listener.socket.shutdown();
            listener.socket.breaker_trip();
            let _ = listener.join.join();
        }

        let mut state = self.shared.state.lock();
        if *state == ServerState::Listening {
            *state = if self.shared.conns.lock().is_empty() {
                ServerState::Idle
            } else {
                ServerState::Draining
            };
        }
    }

    /// Local listen address while listening (useful after binding port 0).
    #[must_use]
    pub fn listen_addr(&self) -> Option<PeerAddr> {
        self.shared.listener.lock().as_ref().and_then(|l| l.socket.local_addr())
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.shared.state.lock()
    }

    /// Queue `frame` for sending on `conn`. The completion arrives at the
    /// parent receiver as `ServerSent` unless `session` is
    /// [`NO_SESSION`](carbon_core::session::NO_SESSION).
    pub fn send(&self, frame: C::Frame, conn: ConnHandle, session: SessionId) -> Result<()> {
        let conns = self.shared.conns.lock();
        match conns.get(&conn) {
            Some(actor) => {
                actor.post_send(frame, session);
                Ok(())
            }
            None => {
                tracing::debug!(target: "carbon::server", %conn, session,
                    "send on unknown connection");
                self.shared.stats.count_fail();
                Err(Error::NotFound)
            }
        }
    }

    /// [`send`](NetServer::send), blocking the parent's loop until the
    /// completion or `timeout`. Must be called from the thread owning
    /// `lp`, the loop the parent receiver is bound to.
    pub fn send_sync(
        &self,
        frame: C::Frame,
        conn: ConnHandle,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<()> {
        let session = self.shared.sessions.next();
        self.send(frame, conn, session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ServerSent { .. })
        })?;
        match event {
            NetEvent::ServerSent { result, .. } => result,
            _ => Ok(()),
        }
    }

    /// Close `conn` and remove it from the arena. The actor emits the
    /// disconnect notification (once) on its way out.
    pub fn disconnect(&self, conn: ConnHandle) -> Result<()> {
        let actor = self.shared.conns.lock().remove(&conn);
        match actor {
            Some(mut actor) => {
                actor.stop();
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// `Ok` when `conn` is open, [`Error::NotConnected`] when closed,
    /// [`Error::InvalidArg`] when no such connection exists.
    pub fn is_connected(&self, conn: ConnHandle) -> Result<()> {
        let conns = self.shared.conns.lock();
        match conns.get(&conn) {
            Some(actor) if actor.is_connected() => Ok(()),
            Some(_) => Err(Error::NotConnected),
            None => Err(Error::InvalidArg),
        }
    }

    /// Close every connection and delete its actor.
    pub fn close_connections(&self) {
        loop {
            let next = {
                let mut conns = self.shared.conns.lock();
                let key = conns.keys().next().copied();
                key.and_then(|k| conns.remove(&k))
            };
            match next {
                Some(mut actor) => actor.stop(),
                None => break,
            }
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.conns.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            client: self.shared.stats.client.load(Ordering::Relaxed),
            client_fail: self.shared.stats.client_fail.load(Ordering::Relaxed),
            recv: self.shared.stats.recv.load(Ordering::Relaxed),
            send: self.shared.stats.send.load(Ordering::Relaxed),
            fail: self.shared.stats.fail.load(Ordering::Relaxed),
            connections: self.shared.conns.lock().len() as u64,
        }
    }

    /// Stop listening, close all connections, final state.
    pub fn shutdown(&self) {
        self.stop_listen();
        self.close_connections();
        *self.shared.state.lock() = ServerState::Stopped;
        tracing::info!(target: "carbon::server", "server stopped");
    }
}

fn accept_main<C: WireCodec>(shared: &Arc<Shared<C>>, listener: &Arc<Socket>) {
    loop {
        match listener.select(Interest::Read, Duration::from_secs(60)) {
            Ok(()) => match listener.accept() {
                Ok((socket, peer)) => accept_client(shared, socket, peer),
                Err(Error::WouldBlock | Error::Interrupted) => {}
                Err(err) => {
                    tracing::debug!(target: "carbon::server", %err, "accept failed");
                    if err == Error::BadSocket {
                        break;
                    }
                }
            },
            Err(Error::TimedOut | Error::Interrupted) => {}
            Err(_) => break,
        }
    }
    tracing::debug!(target: "carbon::server", "listen thread stopped");
}

fn accept_client<C: WireCodec>(shared: &Arc<Shared<C>>, socket: Socket, peer: Option<PeerAddr>) {
    let count = shared.conns.lock().len();
    if count >= shared.config.max_connections {
        tracing::debug!(target: "carbon::server", count, "too many clients, client dropped");
        shared.stats.client_fail.fetch_add(1, Ordering::Relaxed);
        socket.shutdown();
        return;
    }

    let conn = ConnHandle(shared.next_conn.fetch_add(1, Ordering::Relaxed));
    tracing::debug!(target: "carbon::server", %conn, peer = ?peer, "accepted client");

    let actor = server_conn::spawn(
        Arc::clone(&shared.codec),
        conn,
        Arc::new(socket),
        shared.parent.clone(),
        shared.config.send_timeout,
        shared.config.recv_timeout,
        Arc::clone(&shared.stats),
    );
    match actor {
        Ok(actor) => {
            shared.conns.lock().insert(conn, actor);
            shared.stats.client.fetch_add(1, Ordering::Relaxed);
            shared.parent.post(NetEvent::ServerConnected { conn });
        }
        Err(err) => {
            tracing::error!(target: "carbon::server", %err, "cannot start connection actor");
            shared.stats.client_fail.fetch_add(1, Ordering::Relaxed);
        }
    }
}
