//! Connector end-to-end: one peer listens and echoes, the other dials
//! with io_sync and gets the reply matched to its session. The SYSTEM
//! responder answers version probes on the same listening peer.

mod common;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carbon::config::ConnectorConfig;
use carbon::prelude::*;
use carbon::runtime::library_version;
use carbon_vep::system::{self, SYS_PACKET_VERSION_REPLY};

use common::app_container;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct EchoPeer {
    connector: Connector<VepCodec>,
    addr: PeerAddr,
    handle: carbon::LoopHandle<VepEvent>,
    join: Option<thread::JoinHandle<()>>,
}

impl EchoPeer {
    /// A listening connector whose loop echoes APP containers and answers
    /// SYSTEM probes through a responder.
    fn start() -> Self {
        common::init();
        let runtime = Runtime::new(Version::new(4, 2));
        let mut lp = EventLoop::<VepEvent>::new("echo-peer");
        let target = EventTarget::broadcast(lp.handle());

        let connector = Connector::new(
            VepCodec,
            ConnectorConfig::default(),
            runtime.sessions(),
            target.clone(),
        );

        lp.add_receiver(Box::new(SysResponder::new(
            connector.clone(),
            target.clone(),
            runtime.application_version(),
        )));

        let echo = connector.clone();
        let echo_target = target.clone();
        lp.add_receiver(Box::new(move |event: &VepEvent| match event {
            NetEvent::ConnRecv { socket, result: Ok(frame), .. }
                if frame.ctype() == CONTAINER_APP =>
            {
                echo.send(Arc::clone(frame), socket, echo_target.clone(), NO_SESSION)
                    .unwrap();
                true
            }
            _ => false,
        }));

        let port = portpicker::pick_unused_port().expect("free port");
        let addr = PeerAddr::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        connector.start_listen(&addr).unwrap();
        let addr = connector.listen_addr().unwrap();

        let handle = lp.handle();
        let join = thread::spawn(move || lp.run());
        Self { connector, addr, handle, join: Some(join) }
    }
}

impl Drop for EchoPeer {
    fn drop(&mut self) {
        self.connector.shutdown();
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[test]
fn io_sync_returns_the_echo() {
    let peer = EchoPeer::start();

    let runtime = Runtime::new(Version::new(0, 1));
    let mut lp = EventLoop::<VepEvent>::new("dialer");
    let dialer = Connector::new(
        VepCodec,
        ConnectorConfig::default(),
        runtime.sessions(),
        EventTarget::broadcast(lp.handle()),
    );

    let request = app_container(0x77, b"echo me");
    let reply = dialer.io_sync(Arc::clone(&request), &peer.addr, &mut lp, IO_TIMEOUT).unwrap();
    assert_eq!(reply, request);

    // The same connection serves a SYSTEM probe, answered by the
    // responder on the peer's loop.
    let probe = Arc::new(system::version_request());
    let reply = dialer.io_sync(probe, &peer.addr, &mut lp, IO_TIMEOUT).unwrap();
    assert_eq!(reply.packet_type(0), SYS_PACKET_VERSION_REPLY);
    let versions = system::parse_version_reply(&reply).unwrap();
    assert_eq!(versions.application, Version::new(4, 2));
    assert_eq!(versions.library, library_version());

    // One dialed connection, reused for both exchanges.
    let stats = dialer.stats();
    assert_eq!(stats.connect, 1);
    assert_eq!(stats.send, 2);
    assert_eq!(stats.recv, 2);

    let peer_stats = peer.connector.stats();
    assert_eq!(peer_stats.accept, 1);

    dialer.shutdown();
}

#[test]
fn io_to_unreachable_peer_fails() {
    common::init();
    let runtime = Runtime::new(Version::new(0, 1));
    let mut lp = EventLoop::<VepEvent>::new("dialer");
    let dialer = Connector::new(
        VepCodec,
        ConnectorConfig::default(),
        runtime.sessions(),
        EventTarget::broadcast(lp.handle()),
    );

    // Nobody listens here.
    let port = portpicker::pick_unused_port().expect("free port");
    let addr = PeerAddr::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));

    let err = dialer
        .io_sync(app_container(1, b"x"), &addr, &mut lp, IO_TIMEOUT)
        .unwrap_err();
    assert_eq!(err, Error::ConnectionRefused);

    dialer.shutdown();
}
