//! Shared fixtures for the end-to-end suites: a server with its
//! application loop on a background thread, and a client whose loop is
//! pumped by the test thread through the sync calls.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use carbon::config::{ClientConfig, ServerConfig};
use carbon::prelude::*;
use carbon::LoopHandle;

pub fn init() {
    carbon::dev_tracing::init_tracing();
}

pub fn any_addr() -> PeerAddr {
    PeerAddr::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
}

pub fn app_container(ptype: u32, body: &[u8]) -> Arc<Container> {
    let mut container = Container::new(CONTAINER_APP);
    container.insert_packet_with(ptype, body).unwrap();
    Arc::new(container)
}

type ReplyFn = Box<dyn Fn(&NetServer<VepCodec>, ConnHandle, &Arc<Container>) + Send>;

/// A listening server whose application loop runs on its own thread.
/// Every event it sees is forwarded on `events`; `ServerRecv` events are
/// additionally handed to the reply callback.
pub struct ServerFixture {
    pub server: NetServer<VepCodec>,
    pub addr: PeerAddr,
    pub events: mpsc::Receiver<VepEvent>,
    handle: LoopHandle<VepEvent>,
    join: Option<thread::JoinHandle<()>>,
}

impl ServerFixture {
    pub fn start(config: ServerConfig, reply: Option<ReplyFn>) -> Self {
        init();
        let runtime = Runtime::new(Version::new(1, 0));
        let mut lp = EventLoop::<VepEvent>::new("server-app");
        let server = NetServer::new(
            VepCodec,
            config,
            runtime.sessions(),
            EventTarget::broadcast(lp.handle()),
        );

        let (tx, events) = mpsc::channel();
        let replier = server.clone();
        lp.add_receiver(Box::new(move |event: &VepEvent| {
            let _ = tx.send(event.clone());
            if let NetEvent::ServerRecv { conn, frame } = event {
                if let Some(reply) = &reply {
                    reply(&replier, *conn, frame);
                }
            }
            true
        }));

        server.start_listen(&any_addr()).unwrap();
        let addr = server.listen_addr().unwrap();

        let handle = lp.handle();
        let join = thread::spawn(move || lp.run());
        Self { server, addr, events, handle, join: Some(join) }
    }

    pub fn stop(&mut self) {
        self.server.shutdown();
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ServerFixture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A client plus the application loop the test thread pumps through the
/// sync calls. Every event delivered on that loop is recorded in `seen`.
pub struct ClientFixture {
    pub client: NetClient<VepCodec>,
    pub lp: EventLoop<VepEvent>,
    pub seen: Arc<Mutex<Vec<VepEvent>>>,
}

impl ClientFixture {
    pub fn new() -> Self {
        init();
        let runtime = Runtime::new(Version::new(2, 3));
        let mut lp = EventLoop::<VepEvent>::new("client-app");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        lp.add_receiver(Box::new(move |event: &VepEvent| {
            sink.lock().push(event.clone());
            true
        }));

        let client = NetClient::new(
            VepCodec,
            ClientConfig::default(),
            runtime.sessions(),
            EventTarget::broadcast(lp.handle()),
        );
        Self { client, lp, seen }
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&VepEvent) -> bool) -> usize {
        self.seen.lock().iter().filter(|event| predicate(event)).count()
    }
}
