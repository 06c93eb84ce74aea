//! Version handshake end-to-end: a SYSTEM/VERSION probe is answered with
//! the library and application versions, correlated by session.

mod common;

use std::sync::Arc;
use std::time::Duration;

use carbon::config::ServerConfig;
use carbon::prelude::*;
use carbon::runtime::library_version;
use carbon_vep::system::{
    self, VersionReply, SYS_PACKET_VERSION, SYS_PACKET_VERSION_REPLY,
};

use common::{ClientFixture, ServerFixture};

const APP_VERSION: Version = Version::new(1, 0);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn version_server() -> ServerFixture {
    ServerFixture::start(
        ServerConfig::default(),
        Some(Box::new(|server, conn, frame| {
            if frame.ctype() == CONTAINER_SYSTEM
                && frame.packet_type(0) == SYS_PACKET_VERSION
            {
                let reply = system::version_reply(&VersionReply {
                    application: APP_VERSION,
                    library: library_version(),
                });
                server.send(Arc::new(reply), conn, NO_SESSION).unwrap();
            }
        })),
    )
}

#[test]
fn version_probe_round_trips() {
    let server = version_server();
    let mut fixture = ClientFixture::new();

    fixture.client.connect_sync(&server.addr, &mut fixture.lp, IO_TIMEOUT).unwrap();

    let request = Arc::new(system::version_request());
    let reply = fixture.client.io_sync(request, &mut fixture.lp, IO_TIMEOUT).unwrap();

    assert_eq!(reply.ctype(), CONTAINER_SYSTEM);
    assert_eq!(reply.packet_type(0), SYS_PACKET_VERSION_REPLY);

    let decoded = system::parse_version_reply(&reply).unwrap();
    assert_eq!(decoded.application, APP_VERSION);
    assert_eq!(decoded.library, library_version());

    // Exactly one NET_CLIENT_RECV reached the application, carrying the
    // session of the request.
    let recv_count = fixture.count(|event| matches!(event, NetEvent::ClientRecv { .. }));
    assert_eq!(recv_count, 1);
    let session = fixture
        .seen
        .lock()
        .iter()
        .find_map(|event| match event {
            NetEvent::ClientRecv { session, result: Ok(_) } => Some(*session),
            _ => None,
        })
        .expect("recv event recorded");
    assert_ne!(session, NO_SESSION);
}
