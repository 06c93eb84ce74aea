//! Symmetric peer endpoint: dials out, listens, and moves containers in
//! both directions.
//!
//! Outbound sends are work items on a shared queue drained by a pool of
//! I/O workers; each worker owns the socket for the duration of one send
//! and posts the `ConnSent` completion to the originating receiver. Every
//! connection, dialed or accepted, gets a reader thread streaming inbound
//! containers as `ConnRecv` events. A reader's terminal error posts a
//! `ConnRecv` carrying the error — the synthetic disconnect — and removes
//! the connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
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
use carbon_core::session::{SessionId, SessionRegistry, NO_SESSION};

use crate::config::ConnectorConfig;
use crate::events::NetEvent;

/// Counters surfaced through the NETCONN_STAT system packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub send: u64,
    pub recv: u64,
    pub fail: u64,
    pub connect: u64,
    pub accept: u64,
    pub connections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    send: AtomicU64,
    recv: AtomicU64,
    fail: AtomicU64,
    connect: AtomicU64,
    accept: AtomicU64,
}

struct Connection<C: WireCodec> {
    socket: Arc<Socket>,
    /// Remote address for dialed connections; accepted UNIX peers may be
    /// anonymous.
    peer: Option<PeerAddr>,
    /// Receiver and session the next inbound containers are dispatched to.
    route: Mutex<(EventTarget<NetEvent<C::Frame>>, SessionId)>,
}

enum Work<C: WireCodec> {
    Io {
        frame: C::Frame,
        addr: PeerAddr,
        target: EventTarget<NetEvent<C::Frame>>,
        session: SessionId,
    },
    Send {
        frame: C::Frame,
        socket: Arc<Socket>,
        target: EventTarget<NetEvent<C::Frame>>,
        session: SessionId,
    },
    Stop,
}

struct Listener {
    socket: Arc<Socket>,
    join: thread::JoinHandle<()>,
}

struct Shared<C: WireCodec> {
    codec: C,
    config: ConnectorConfig,
    sessions: Arc<SessionRegistry>,
    parent: EventTarget<NetEvent<C::Frame>>,
    work_tx: flume::Sender<Work<C>>,
    conns: Mutex<HashMap<PeerAddr, Arc<Connection<C>>>>,
    inbound: Mutex<Vec<Arc<Connection<C>>>>,
    readers: Mutex<Vec<thread::JoinHandle<()>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    listener: Mutex<Option<Listener>>,
    stats: Counters,
    done: AtomicBool,
}

/// A bidirectional container endpoint. Cheap to clone; all clones share
/// the worker pool and connection table. Call
/// [`shutdown`](Connector::shutdown) to stop the worker and reader
/// threads.
pub struct Connector<C: WireCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: WireCodec> Clone for Connector<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: WireCodec> Connector<C> {
    /// Create the connector and spawn its worker pool. `parent` receives
    /// inbound containers on accepted connections.
    pub fn new(
        codec: C,
        config: ConnectorConfig,
        sessions: Arc<SessionRegistry>,
        parent: EventTarget<NetEvent<C::Frame>>,
    ) -> Self {
        let (work_tx, work_rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            codec,
            config,
            sessions,
            parent,
            work_tx,
            conns: Mutex::new(HashMap::new()),
            inbound: Mutex::new(Vec::new()),
            readers: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            stats: Counters::default(),
            done: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(shared.config.workers);
        for index in 0..shared.config.workers {
            let shared = Arc::clone(&shared);
            let work_rx = work_rx.clone();
            let worker = thread::Builder::new()
                .name(format!("carbon-conn-io-{index}"))
                .spawn(move || worker_main(&shared, &work_rx))
                .expect("spawn connector worker");
            workers.push(worker);
        }
        *shared.workers.lock() = workers;

        Self { shared }
    }

    /// Queue `frame` for `addr`, reusing an open connection or dialing a
    /// new one. Inbound containers on that connection are dispatched to
    /// `target` as `ConnRecv { session }`; the send completion arrives as
    /// `ConnSent` unless `session` is [`NO_SESSION`].
    pub fn io(
        &self,
        frame: C::Frame,
        addr: &PeerAddr,
        target: EventTarget<NetEvent<C::Frame>>,
        session: SessionId,
    ) -> Result<()> {
        if self.shared.done.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.shared
            .work_tx
            .send(Work::Io { frame, addr: addr.clone(), target, session })
            .map_err(|_| Error::NotConnected)
    }

    /// Queue `frame` on an already-open socket (typically the one a
    /// `ConnRecv` event arrived on).
    pub fn send(
        &self,
        frame: C::Frame,
        socket: &Arc<Socket>,
        target: EventTarget<NetEvent<C::Frame>>,
        session: SessionId,
    ) -> Result<()> {
        if self.shared.done.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.shared
            .work_tx
            .send(Work::Send { frame, socket: Arc::clone(socket), target, session })
            .map_err(|_| Error::NotConnected)
    }

    /// [`io`](Connector::io), blocking the caller's own loop until the
    /// first reply on that connection or `timeout`.
    pub fn io_sync(
        &self,
        frame: C::Frame,
        addr: &PeerAddr,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<C::Frame> {
        let session = self.shared.sessions.next();
        self.io(frame, addr, EventTarget::broadcast(lp.handle()), session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ConnRecv { .. }) || event.error().is_some()
        })?;
        match event {
            NetEvent::ConnRecv { result, .. } => result,
            other => Err(other.error().unwrap_or(Error::InvalidArg)),
        }
    }

    /// [`send`](Connector::send), blocking the caller's own loop until the
    /// send completion or `timeout`.
    pub fn send_sync(
        &self,
        frame: C::Frame,
        socket: &Arc<Socket>,
        lp: &mut EventLoop<NetEvent<C::Frame>>,
        timeout: Duration,
    ) -> Result<()> {
        let session = self.shared.sessions.next();
        self.send(frame, socket, EventTarget::broadcast(lp.handle()), session)?;

        let event = lp.wait_sync_matching(session, timeout, |event| {
            matches!(event, NetEvent::ConnSent { .. })
        })?;
        match event {
            NetEvent::ConnSent { result, .. } => result,
            _ => Ok(()),
        }
    }

    /// Start accepting inbound connections on `addr`. Inbound containers
    /// go to the parent receiver.
    pub fn start_listen(&self, addr: &PeerAddr) -> Result<()> {
        let mut guard = self.shared.listener.lock();
        if guard.is_some() {
            return Err(Error::InvalidArg);
        }

        let listener = Arc::new(Socket::listen(addr, self.shared.config.backlog)?);
        listener.breaker_enable()?;
        tracing::debug!(target: "carbon::connector", %addr, "listening");

        let shared = Arc::clone(&self.shared);
        let accept_socket = Arc::clone(&listener);
        let join = thread::Builder::new()
            .name("carbon-conn-accept".into())
            .spawn(move || accept_main(&shared, &accept_socket))?;
        *guard = Some(Listener { socket: listener, join });
        Ok(())
    }

    /// Stop accepting. Existing connections stay open.
    pub fn stop_listen(&self) {
        let listener = self.shared.listener.lock().take();
        if let Some(listener) = listener {
            listener.socket.shutdown();
            listener.socket.breaker_trip();
            let _ = listener.join.join();
        }
    }

    /// Local listen address while listening (useful after binding port 0).
    #[must_use]
    pub fn listen_addr(&self) -> Option<PeerAddr> {
        self.shared.listener.lock().as_ref().and_then(|l| l.socket.local_addr())
    }

    #[must_use]
    pub fn stats(&self) -> ConnectorStats {
        let connections =
            (self.shared.conns.lock().len() + self.shared.inbound.lock().len()) as u64;
        ConnectorStats {
            send: self.shared.stats.send.load(Ordering::Relaxed),
            recv: self.shared.stats.recv.load(Ordering::Relaxed),
            fail: self.shared.stats.fail.load(Ordering::Relaxed),
            connect: self.shared.stats.connect.load(Ordering::Relaxed),
            accept: self.shared.stats.accept.load(Ordering::Relaxed),
            connections,
        }
    }

    /// Stop listening, close every connection and join all worker and
    /// reader threads. Further operations fail with
    /// [`Error::NotConnected`].
    pub fn shutdown(&self) {
        if self.shared.done.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(target: "carbon::connector", "shutting down");
        self.stop_listen();

        let conns: Vec<_> = self.shared.conns.lock().drain().map(|(_, c)| c).collect();
        let inbound: Vec<_> = self.shared.inbound.lock().drain(..).collect();
        for conn in conns.into_iter().chain(inbound) {
            conn.socket.shutdown();
            conn.socket.breaker_trip();
        }

        for _ in 0..self.shared.config.workers {
            let _ = self.shared.work_tx.send(Work::Stop);
        }
        for worker in self.shared.workers.lock().drain(..) {
            let _ = worker.join();
        }
        for reader in self.shared.readers.lock().drain(..) {
            let _ = reader.join();
        }
    }
}

fn spawn_reader<C: WireCodec>(shared: &Arc<Shared<C>>, conn: Arc<Connection<C>>) {
    let shared_for_reader = Arc::clone(shared);
    let reader = thread::Builder::new()
        .name("carbon-conn-read".into())
        .spawn(move || reader_main(&shared_for_reader, &conn))
        .expect("spawn connection reader");
    shared.readers.lock().push(reader);
}

fn remove_connection<C: WireCodec>(shared: &Shared<C>, socket: &Arc<Socket>) {
    shared.conns.lock().retain(|_, conn| !Arc::ptr_eq(&conn.socket, socket));
    shared.inbound.lock().retain(|conn| !Arc::ptr_eq(&conn.socket, socket));
}

fn get_or_connect<C: WireCodec>(
    shared: &Arc<Shared<C>>,
    addr: &PeerAddr,
    target: &EventTarget<NetEvent<C::Frame>>,
    session: SessionId,
) -> Result<Arc<Connection<C>>> {
    if let Some(conn) = shared.conns.lock().get(addr) {
        if conn.socket.is_open() {
            *conn.route.lock() = (target.clone(), session);
            return Ok(Arc::clone(conn));
        }
    }

    let socket = Socket::connect(addr, shared.config.connect_timeout, None)?;
    socket.breaker_enable()?;
    shared.stats.connect.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(target: "carbon::connector", %addr, "dialed connection");

    let conn = Arc::new(Connection {
        socket: Arc::new(socket),
        peer: Some(addr.clone()),
        route: Mutex::new((target.clone(), session)),
    });

    {
        let mut conns = shared.conns.lock();
        // Another worker may have raced us to the same peer; keep theirs.
        if let Some(existing) = conns.get(addr) {
            if existing.socket.is_open() {
                conn.socket.shutdown();
                *existing.route.lock() = (target.clone(), session);
                return Ok(Arc::clone(existing));
            }
        }
        conns.insert(addr.clone(), Arc::clone(&conn));
    }

    spawn_reader(shared, Arc::clone(&conn));
    Ok(conn)
}

fn do_send<C: WireCodec>(
    shared: &Shared<C>,
    socket: &Arc<Socket>,
    frame: &C::Frame,
    target: &EventTarget<NetEvent<C::Frame>>,
    session: SessionId,
) {
    match shared.codec.send_frame(socket, frame, shared.config.send_timeout) {
        Ok(()) => {
            shared.stats.send.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target: "carbon::connector", session, "container sent");
            if session != NO_SESSION {
                target.post(NetEvent::ConnSent { session, result: Ok(()) });
            }
        }
        Err(err) => {
            shared.stats.fail.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target: "carbon::connector", session, %err, "send failed");
            if session != NO_SESSION {
                target.post(NetEvent::ConnSent { session, result: Err(err) });
            }
            if err.is_disconnect() {
                socket.shutdown();
                socket.breaker_trip();
                remove_connection(shared, socket);
            }
        }
    }
}

fn worker_main<C: WireCodec>(shared: &Arc<Shared<C>>, work_rx: &flume::Receiver<Work<C>>) {
    while let Ok(work) = work_rx.recv() {
        match work {
            Work::Stop => break,
            Work::Io { frame, addr, target, session } => {
                match get_or_connect(shared, &addr, &target, session) {
                    Ok(conn) => do_send(shared.as_ref(), &conn.socket, &frame, &target, session),
                    Err(err) => {
                        shared.stats.fail.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(target: "carbon::connector", %addr, %err,
                            "connect failed");
                        if session != NO_SESSION {
                            target.post(NetEvent::ConnSent { session, result: Err(err) });
                        }
                    }
                }
            }
            Work::Send { frame, socket, target, session } => {
                do_send(shared.as_ref(), &socket, &frame, &target, session);
            }
        }
    }
}

fn reader_main<C: WireCodec>(shared: &Arc<Shared<C>>, conn: &Connection<C>) {
    let socket = &conn.socket;
    loop {
        if shared.done.load(Ordering::Acquire) {
            break;
        }
        match shared.codec.recv_frame(socket, shared.config.recv_timeout) {
            Ok(frame) => {
                shared.stats.recv.fetch_add(1, Ordering::Relaxed);
                let (target, session) = conn.route.lock().clone();
                target.post(NetEvent::ConnRecv {
                    socket: Arc::clone(socket),
                    result: Ok(frame),
                    session,
                });
            }
            // Idle or interrupted receives keep the reader alive.
            Err(Error::TimedOut | Error::Interrupted | Error::Canceled) => {}
            Err(err) => {
                // Terminal: transport closed or framing violation. Surface
                // the connection-closed class to the outstanding session
                // and drop the connection.
                let surfaced = if err == Error::InvalidFrame {
                    shared.stats.fail.fetch_add(1, Ordering::Relaxed);
                    Error::ConnectionReset
                } else {
                    err
                };
                if !shared.done.load(Ordering::Acquire) {
                    let (target, session) = conn.route.lock().clone();
                    target.post(NetEvent::ConnRecv {
                        socket: Arc::clone(socket),
                        result: Err(surfaced),
                        session,
                    });
                }
                tracing::debug!(target: "carbon::connector", %err, "connection reader exits");
                socket.shutdown();
                remove_connection(shared.as_ref(), socket);
                break;
            }
        }
    }
}

fn accept_main<C: WireCodec>(shared: &Arc<Shared<C>>, listener: &Arc<Socket>) {
    loop {
        if shared.done.load(Ordering::Acquire) {
            break;
        }
        match listener.select(Interest::Read, Duration::from_secs(60)) {
            Ok(()) => match listener.accept() {
                Ok((socket, peer)) => {
                    if socket.breaker_enable().is_err() {
                        continue;
                    }
                    shared.stats.accept.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(target: "carbon::connector", peer = ?peer, "accepted");

                    let conn = Arc::new(Connection {
                        socket: Arc::new(socket),
                        peer: peer.clone(),
                        route: Mutex::new((shared.parent.clone(), NO_SESSION)),
                    });
                    match &conn.peer {
                        Some(peer) => {
                            shared.conns.lock().insert(peer.clone(), Arc::clone(&conn));
                        }
                        None => shared.inbound.lock().push(Arc::clone(&conn)),
                    }
                    spawn_reader(shared, conn);
                }
                Err(Error::WouldBlock | Error::Interrupted) => {}
                Err(err) => {
                    tracing::debug!(target: "carbon::connector", %err, "accept failed");
                    if err == Error::BadSocket {
                        break;
                    }
                }
            },
            Err(Error::TimedOut | Error::Interrupted) => {}
            Err(_) => break,
        }
    }
    tracing::debug!(target: "carbon::connector", "accept loop stopped");
}
