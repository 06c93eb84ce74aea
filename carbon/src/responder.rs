//! Responder for SYSTEM containers arriving over a connector.
//!
//! Registered as a receiver on the loop that gets the connector's
//! `ConnRecv` events; answers VERSION and NETCONN_STAT probes on the
//! socket the request came in on.

use std::sync::Arc;

use carbon_core::error::{Error, Result};
use carbon_core::event::EventReceiver;
use carbon_core::event_loop::EventTarget;
use carbon_core::net::socket::Socket;
use carbon_core::session::NO_SESSION;
use carbon_vep::container::{Container, CONTAINER_SYSTEM};
use carbon_vep::system::{
    self, Version, VersionReply, SYS_PACKET_NETCONN_STAT, SYS_PACKET_VERSION,
};
use carbon_vep::VepCodec;

use crate::connector::Connector;
use crate::events::NetEvent;
use crate::runtime::library_version;

/// Event alias for VEP deployments.
pub type VepEvent = NetEvent<Arc<Container>>;

/// Answers SYSTEM packets on behalf of the application.
pub struct SysResponder {
    connector: Connector<VepCodec>,
    /// Target for reply send completions (replies carry no session, so
    /// nothing is normally posted there).
    target: EventTarget<VepEvent>,
    application: Version,
}

impl SysResponder {
    #[must_use]
    pub fn new(
        connector: Connector<VepCodec>,
        target: EventTarget<VepEvent>,
        application: Version,
    ) -> Self {
        Self { connector, target, application }
    }

    fn reply(&self, socket: &Arc<Socket>, container: Container) -> Result<()> {
        self.connector.send(Arc::new(container), socket, self.target.clone(), NO_SESSION)
    }

    /// Handle one SYSTEM container.
    pub fn process(&self, socket: &Arc<Socket>, container: &Container) -> Result<()> {
        if container.ctype() != CONTAINER_SYSTEM || !container.is_valid() {
            tracing::debug!(target: "carbon::responder", "not a valid SYSTEM container");
            return Err(Error::InvalidArg);
        }
        if !socket.is_open() {
            tracing::debug!(target: "carbon::responder", "socket is not connected");
            return Err(Error::NotConnected);
        }

        match container.packet_type(0) {
            SYS_PACKET_VERSION => {
                let reply = VersionReply {
                    application: self.application,
                    library: library_version(),
                };
                self.reply(socket, system::version_reply(&reply))
            }
            SYS_PACKET_NETCONN_STAT => {
                let stats = self.connector.stats();
                let payload = system::NetConnStats {
                    send: stats.send,
                    recv: stats.recv,
                    fail: stats.fail,
                    connect: stats.connect,
                    accept: stats.accept,
                    connections: stats.connections,
                };
                self.reply(socket, system::netconn_stat_reply(&payload))
            }
            other => {
                tracing::debug!(target: "carbon::responder", packet = other,
                    "unsupported SYSTEM packet ignored");
                Err(Error::NotFound)
            }
        }
    }
}

impl EventReceiver<VepEvent> for SysResponder {
    fn process_event(&mut self, event: &VepEvent) -> bool {
        match event {
            NetEvent::ConnRecv { socket, result: Ok(frame), .. }
                if frame.ctype() == CONTAINER_SYSTEM =>
            {
                if let Err(err) = self.process(socket, frame) {
                    tracing::debug!(target: "carbon::responder", %err,
                        "SYSTEM container not handled");
                }
                true
            }
            _ => false,
        }
    }
}
