//! Connection cap: accepts beyond max_connections are dropped, not
//! queued, and counted on the client-fail counter.

mod common;

use std::time::{Duration, Instant};

use carbon::config::ServerConfig;
use carbon::prelude::*;

use common::{ClientFixture, ServerFixture};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn over_cap_client_is_dropped() {
    let server = ServerFixture::start(ServerConfig::with_max_connections(1), None);

    let mut first = ClientFixture::new();
    let mut second = ClientFixture::new();

    // Both TCP connects land in the backlog and succeed; the server then
    // keeps one and drops the other.
    first.client.connect_sync(&server.addr, &mut first.lp, IO_TIMEOUT).unwrap();
    second.client.connect_sync(&server.addr, &mut second.lp, IO_TIMEOUT).unwrap();

    let deadline = Instant::now() + IO_TIMEOUT;
    let stats = loop {
        let stats = server.server.stats();
        if stats.client + stats.client_fail >= 2 {
            break stats;
        }
        assert!(Instant::now() < deadline, "server never processed both accepts");
        std::thread::sleep(Duration::from_millis(10));
    };

    assert_eq!(stats.client, 1, "exactly one client accepted");
    assert_eq!(stats.client_fail, 1, "exactly one client dropped");
    assert_eq!(stats.connections, 1);

    // Exactly one CONNECTED notification reached the application.
    let mut connected = 0;
    while let Ok(event) = server.events.recv_timeout(Duration::from_millis(200)) {
        if matches!(event, NetEvent::ServerConnected { .. }) {
            connected += 1;
        }
    }
    assert_eq!(connected, 1);
}
