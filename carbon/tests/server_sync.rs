//! Server-side synchronous send, lifecycle states, and the one-shot
//! exchange helper.

mod common;

use std::sync::Arc;
use std::time::Duration;

use carbon::config::ServerConfig;
use carbon::prelude::*;
use carbon::server::ServerState;

use common::{app_container, ClientFixture, ServerFixture};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn server_send_completion_reaches_parent() {
    let server = ServerFixture::start(ServerConfig::default(), None);
    let mut fixture = ClientFixture::new();

    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    let conn = loop {
        match server.events.recv_timeout(IO_TIMEOUT).expect("server event") {
            NetEvent::ServerConnected { conn } => break conn,
            _ => {}
        }
    };
    assert_eq!(server.server.is_connected(conn), Ok(()));

    server.server.send(app_container(7, b"from server"), conn, 99).unwrap();
    let frame = fixture.client.recv_sync(&mut fixture.lp, IO_TIMEOUT).unwrap();
    assert_eq!(frame.packet_type(0), 7);

    // The completion for session 99 reached the parent receiver.
    let sent = loop {
        match server.events.recv_timeout(IO_TIMEOUT).expect("sent event") {
            NetEvent::ServerSent { session, result } => break (session, result),
            _ => {}
        }
    };
    assert_eq!(sent.0, 99);
    assert_eq!(sent.1, Ok(()));
}

#[test]
fn send_sync_blocks_on_the_parent_loop() {
    common::init();
    let runtime = Runtime::new(Version::new(1, 0));

    // The parent loop is owned by this thread; send_sync pumps it.
    let mut lp = EventLoop::<VepEvent>::new("server-app");
    let connected = Arc::new(parking_lot::Mutex::new(None));
    let slot = Arc::clone(&connected);
    lp.add_receiver(Box::new(move |event: &VepEvent| {
        if let NetEvent::ServerConnected { conn } = event {
            *slot.lock() = Some(*conn);
        }
        true
    }));

    let server = NetServer::new(
        VepCodec,
        ServerConfig::default(),
        runtime.sessions(),
        EventTarget::broadcast(lp.handle()),
    );
    server.start_listen(&common::any_addr()).unwrap();
    let addr = server.listen_addr().unwrap();

    // A bare peer reading one container off the wire.
    let reader = std::thread::spawn(move || {
        let socket = carbon::Socket::connect(&addr, IO_TIMEOUT, None).unwrap();
        carbon_vep::stream::recv_container(&socket, IO_TIMEOUT).unwrap()
    });

    let deadline = std::time::Instant::now() + IO_TIMEOUT;
    let conn = loop {
        lp.dispatch_pending();
        if let Some(conn) = *connected.lock() {
            break conn;
        }
        assert!(std::time::Instant::now() < deadline, "no connection");
        lp.park_until(Some(std::time::Instant::now() + Duration::from_millis(10)));
    };

    let frame = app_container(0x31, b"pushed");
    server.send_sync(frame, conn, &mut lp, IO_TIMEOUT).unwrap();

    let received = reader.join().unwrap();
    assert_eq!(received.packet_type(0), 0x31);
    assert_eq!(received.packet(0).unwrap().body(), b"pushed");

    server.shutdown();
}

#[test]
fn server_states_follow_lifecycle() {
    let server = ServerFixture::start(ServerConfig::default(), None);
    assert_eq!(server.server.state(), ServerState::Listening);

    let mut fixture = ClientFixture::new();
    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    // Wait until the connection is registered.
    loop {
        match server.events.recv_timeout(IO_TIMEOUT).expect("server event") {
            NetEvent::ServerConnected { .. } => break,
            _ => {}
        }
    }

    server.server.stop_listen();
    assert_eq!(server.server.state(), ServerState::Draining);

    server.server.close_connections();
    assert_eq!(server.server.connection_count(), 0);

    server.server.shutdown();
    assert_eq!(server.server.state(), ServerState::Stopped);
}

#[test]
fn one_shot_exchange_against_echo_server() {
    // Echo every container back on the same connection.
    let server = ServerFixture::start(
        ServerConfig::default(),
        Some(Box::new(|server, conn, frame| {
            let _ = server.send(Arc::clone(frame), conn, NO_SESSION);
        })),
    );

    let exchanger = PacketIo::new(VepCodec, IO_TIMEOUT);
    let request = app_container(0x51, b"one-shot");
    let reply = exchanger.execute(&request, &server.addr, None).unwrap();
    assert_eq!(reply, request);

    // The socket is gone afterwards; the server notices the close.
    let saw_disconnect = std::iter::from_fn(|| {
        server.events.recv_timeout(Duration::from_secs(2)).ok()
    })
    .any(|event| matches!(event, NetEvent::ServerDisconnected { .. }));
    assert!(saw_disconnect);
}
