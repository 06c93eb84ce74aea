//! The framework's reserved event range as tagged variants.
//!
//! Every payload shape is declared on its variant; the dispatcher matches
//! on the tag and no receiver ever downcasts. The enum is generic over the
//! frame type `F` produced by the wire codec in use (`Arc<Container>` for
//! VEP), so completion events share the refcounted frame with the send
//! path.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use carbon_core::error::{Error, Result};
use carbon_core::event::Envelope;
use carbon_core::net::addr::PeerAddr;
use carbon_core::net::socket::Socket;
use carbon_core::session::{SessionId, NO_SESSION};

/// Stable handle of a server connection in the server's arena. Holding a
/// handle never dangles: removal invalidates only the arena entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(pub(crate) u64);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Events defined by the core. The DNS/NTP slots are reserved for the
/// external helper services; the `ClientDo*` variants are the client
/// actor's internal commands.
#[derive(Debug, Clone)]
pub enum NetEvent<F> {
    /// Application start, broadcast to the main loop.
    Start,
    /// Application quit with an exit code.
    Quit(i32),
    Hup,
    Usr1,
    Usr2,

    /// Connector: a container (or the synthetic disconnect carrying the
    /// terminal error) arrived on a connection.
    ConnRecv { socket: Arc<Socket>, result: Result<F>, session: SessionId },
    /// Connector: a queued send completed.
    ConnSent { session: SessionId, result: Result<()> },

    /// Client: async connect completed.
    ClientConnected { session: SessionId, result: Result<()> },
    /// Client: one receive completed.
    ClientRecv { session: SessionId, result: Result<F> },
    /// Client: one send completed.
    ClientSent { session: SessionId, result: Result<()> },

    /// Server: a connection was accepted.
    ServerConnected { conn: ConnHandle },
    /// Server: a connection was observed closed, locally or by the peer.
    /// Emitted at most once per connection.
    ServerDisconnected { conn: ConnHandle },
    /// Server: a container arrived on a connection.
    ServerRecv { conn: ConnHandle, frame: F },
    /// Server: a queued send completed.
    ServerSent { session: SessionId, result: Result<()> },
    /// Server-internal: ask a connection actor to send.
    ServerDoSend { frame: F, session: SessionId },

    /// Reserved for the external DNS helper service.
    DnsResolve { host: Arc<str>, session: SessionId },
    DnsReply { addr: Option<Ipv4Addr>, session: SessionId },
    /// Reserved for the external NTP helper service.
    NtpRequest { session: SessionId },
    NtpReply { unix_millis: u64, session: SessionId },

    /// Client-internal actor commands.
    ClientDoConnect { addr: PeerAddr, session: SessionId },
    ClientDoSend { frame: F, session: SessionId },
    ClientDoRecv { session: SessionId },
    ClientDoDisconnect,
}

impl<F> NetEvent<F> {
    /// The error carried by a completion event, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::ConnRecv { result: Err(err), .. }
            | Self::ClientRecv { result: Err(err), .. }
            | Self::ConnSent { result: Err(err), .. }
            | Self::ClientConnected { result: Err(err), .. }
            | Self::ClientSent { result: Err(err), .. }
            | Self::ServerSent { result: Err(err), .. } => Some(*err),
            _ => None,
        }
    }
}

impl<F: Clone + Send + Sync + 'static> Envelope for NetEvent<F> {
    fn session(&self) -> SessionId {
        match self {
            Self::ConnRecv { session, .. }
            | Self::ConnSent { session, .. }
            | Self::ClientConnected { session, .. }
            | Self::ClientRecv { session, .. }
            | Self::ClientSent { session, .. }
            | Self::ServerSent { session, .. }
            | Self::ServerDoSend { session, .. }
            | Self::DnsResolve { session, .. }
            | Self::DnsReply { session, .. }
            | Self::NtpRequest { session }
            | Self::NtpReply { session, .. }
            | Self::ClientDoConnect { session, .. }
            | Self::ClientDoSend { session, .. }
            | Self::ClientDoRecv { session } => *session,
            Self::ServerConnected { .. }
            | Self::ServerDisconnected { .. }
            | Self::ServerRecv { .. }
            | Self::Start
            | Self::Quit(_)
            | Self::Hup
            | Self::Usr1
            | Self::Usr2
            | Self::ClientDoDisconnect => NO_SESSION,
        }
    }
}
