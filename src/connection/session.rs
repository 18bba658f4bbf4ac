// src/connection/session.rs

//! Defines the messages a connection accepts from other tasks and the gameplay
//! session object handed to the simulation core.

use crate::core::WorldGateError;
use crate::core::identity::Identity;
use crate::core::protocol::RawPacket;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Work posted onto a connection's inbox. The connection's own task is the only one
/// that acts on these, so no other task ever mutates connection state.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// An identity resolver finished. `attempt` identifies which resolution this is,
    /// so a late answer for an abandoned attempt can be told apart.
    IdentityResolved {
        attempt: u64,
        result: Result<Identity, WorldGateError>,
    },
    /// A play-phase packet from the simulation core.
    Send(RawPacket),
    /// Disconnect with the given cause.
    Kick(WorldGateError),
}

pub type ConnectionInbox = mpsc::UnboundedSender<ConnectionMessage>;

/// The gameplay session created at the login handoff.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub session_id: u64,
    pub identity: Identity,
    pub addr: SocketAddr,
    /// The negotiated compression threshold, if any.
    pub compression_threshold: Option<usize>,
    pub encrypted: bool,
    inbox: ConnectionInbox,
}

impl PlayerSession {
    pub(crate) fn new(
        session_id: u64,
        identity: Identity,
        addr: SocketAddr,
        compression_threshold: Option<usize>,
        encrypted: bool,
        inbox: ConnectionInbox,
    ) -> Self {
        Self {
            session_id,
            identity,
            addr,
            compression_threshold,
            encrypted,
            inbox,
        }
    }

    /// Queues a packet on the connection. It goes out through the connection's
    /// cipher and compression like every other packet.
    pub fn send(&self, packet: RawPacket) -> Result<(), WorldGateError> {
        self.inbox
            .send(ConnectionMessage::Send(packet))
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::NotConnected).into())
    }

    pub fn kick(&self, reason: impl Into<String>) -> bool {
        self.inbox
            .send(ConnectionMessage::Kick(WorldGateError::Kicked(reason.into())))
            .is_ok()
    }

    pub fn is_connected(&self) -> bool {
        !self.inbox.is_closed()
    }
}
