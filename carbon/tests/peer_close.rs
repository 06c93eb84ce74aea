//! Peer-close handling: after the server drops the connection, the client
//! sees exactly one disconnect-class event.

mod common;

use std::time::Duration;

use carbon::config::ServerConfig;
use carbon::prelude::*;

use common::{app_container, ClientFixture, ServerFixture};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn server_close_surfaces_one_disconnect() {
    // The server hangs up as soon as the first container arrives.
    let server = ServerFixture::start(
        ServerConfig::default(),
        Some(Box::new(|server, conn, _frame| {
            // A second container may slip in before the close lands;
            // disconnecting an already-removed connection is fine here.
            let _ = server.disconnect(conn);
        })),
    );
    let mut fixture = ClientFixture::new();

    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    // C1 goes out whole; its completion is a success.
    fixture
        .client
        .send_sync(app_container(1, b"c1"), &mut fixture.lp, IO_TIMEOUT)
        .unwrap();

    // The next round trip fails with a closed-connection error, whichever
    // side of it the close lands on.
    let err = fixture
        .client
        .io_sync(app_container(2, b"c2"), &mut fixture.lp, IO_TIMEOUT)
        .unwrap_err();
    assert!(
        err.is_disconnect() || err == Error::NotConnected,
        "unexpected error: {err:?}"
    );

    // Exactly one disconnect-class event reached the application.
    let disconnects =
        fixture.count(|event| event.error().is_some_and(|e| e.is_disconnect()));
    assert_eq!(disconnects, 1);

    // Further operations report not-connected.
    assert_eq!(fixture.client.is_connected(), Err(Error::NotConnected));
}
