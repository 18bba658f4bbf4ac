// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::identity::Identity;
use crate::core::metrics;
use crate::core::simulation::SimulationEvent;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure connection resources are always cleaned up when a
/// connection handler's scope is exited, however it exits.
pub struct ConnectionGuard {
    pub(crate) state: Arc<ServerState>,
    pub(crate) session_id: u64,
    pub(crate) addr: SocketAddr,
    /// Set once the connection holds a slot in the player registry.
    player: Option<Identity>,
    /// Whether the simulation has been told about this session.
    announced: bool,
    /// The first recorded reason the connection is closing.
    close_reason: Option<String>,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, session_id: u64, addr: SocketAddr) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            state,
            session_id,
            addr,
            player: None,
            announced: false,
            close_reason: None,
        }
    }

    /// Records that this connection claimed the registry slot for `identity`, so
    /// dropping the guard releases it.
    pub(crate) fn claim_player(&mut self, identity: Identity) {
        self.player = Some(identity);
    }

    /// Gives the registry slot back before the connection closes.
    pub(crate) fn release_player(&mut self) {
        if let Some(identity) = self.player.take() {
            self.state.unregister_player(&identity.id, self.session_id);
            metrics::ONLINE_PLAYERS.set(self.state.online_players() as f64);
        }
    }

    /// Marks the session as known to the simulation, so closing it also reports
    /// `SessionClosed`.
    pub(crate) fn announce_player(&mut self) {
        self.announced = self.player.is_some();
    }

    pub(crate) fn set_close_reason(&mut self, reason: impl Into<String>) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason.into());
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.addr
        );

        if self.state.clients.remove(&self.session_id).is_none() {
            debug!(
                "Client {} was not in the global state map upon cleanup.",
                self.addr
            );
        }

        let Some(identity) = self.player.take() else {
            return;
        };
        self.state.unregister_player(&identity.id, self.session_id);
        metrics::ONLINE_PLAYERS.set(self.state.online_players() as f64);

        if self.announced {
            let reason = self
                .close_reason
                .take()
                .unwrap_or_else(|| "Disconnected".to_string());
            let event = SimulationEvent::SessionClosed {
                session_id: self.session_id,
                identity,
                reason,
            };
            if let Err(e) = self.state.simulation.sync(event) {
                debug!("Could not report closed session {}: {}", self.session_id, e);
            }
        }
    }
}
