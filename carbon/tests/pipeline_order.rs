//! Two containers pipelined on one socket arrive strictly in send order,
//! however the transport chunks them.

mod common;

use std::time::Duration;

use carbon::config::ServerConfig;
use carbon::prelude::*;

use common::{app_container, ClientFixture, ServerFixture};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn pipelined_containers_keep_order() {
    let server = ServerFixture::start(ServerConfig::default(), None);
    let mut fixture = ClientFixture::new();

    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    // Send both without awaiting replies.
    let first = app_container(0x0101, b"first");
    let second = app_container(0x0202, b"second");
    fixture.client.send(first, 1).unwrap();
    fixture.client.send(second, 2).unwrap();

    let mut received = Vec::new();
    while received.len() < 2 {
        match server.events.recv_timeout(IO_TIMEOUT).expect("server event") {
            NetEvent::ServerRecv { frame, .. } => received.push(frame.packet_type(0)),
            _ => {}
        }
    }

    assert_eq!(received, vec![0x0101, 0x0202]);
}

#[test]
fn many_pipelined_containers_keep_order() {
    let server = ServerFixture::start(ServerConfig::default(), None);
    let mut fixture = ClientFixture::new();

    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    for n in 1..=20u32 {
        fixture.client.send(app_container(n, &n.to_le_bytes()), u64::from(n)).unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 20 {
        match server.events.recv_timeout(IO_TIMEOUT).expect("server event") {
            NetEvent::ServerRecv { frame, .. } => received.push(frame.packet_type(0)),
            _ => {}
        }
    }

    assert_eq!(received, (1..=20).collect::<Vec<_>>());
}
