// src/core/state/client.rs

//! Contains state definitions related to client connections and online players.

use crate::connection::ConnectionInbox;
use crate::core::protocol::PhaseKind;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

pub type ClientStateTuple = (Arc<Mutex<ClientInfo>>, ConnectionInbox);
pub type ClientMap = Arc<DashMap<u64, ClientStateTuple>>;

/// Administrative view of one open socket.
#[derive(Debug)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub phase: PhaseKind,
    /// The claimed username, once a login start has been received.
    pub username: Option<String>,
    pub created: Instant,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr, session_id: u64) -> Self {
        Self {
            addr,
            session_id,
            phase: PhaseKind::Handshake,
            username: None,
            created: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            session_id: self.session_id,
            addr: self.addr,
            phase: self.phase,
            username: self.username.clone(),
            connected_for: self.created.elapsed(),
        }
    }
}

/// A point-in-time copy of a `ClientInfo`, as returned by `ServerState::list_clients`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub session_id: u64,
    pub addr: SocketAddr,
    pub phase: PhaseKind,
    pub username: Option<String>,
    pub connected_for: Duration,
}

/// A player that completed login. Keyed by identity id in `ServerState::players`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlinePlayer {
    pub session_id: u64,
    pub name: String,
}

pub type PlayerMap = DashMap<Uuid, OnlinePlayer>;
