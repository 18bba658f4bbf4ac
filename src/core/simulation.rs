// src/core/simulation.rs

//! The boundary to the simulation core.
//!
//! The simulation owns a single authoritative execution context. Connections never
//! mutate world state themselves; they `sync` events onto that context instead.

use crate::connection::PlayerSession;
use crate::core::WorldGateError;
use crate::core::identity::Identity;
use crate::core::protocol::RawPacket;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum SimulationEvent {
    /// A connection completed login. The session carries the resolved identity and a
    /// handle for sending packets back through the now encrypted and compressed
    /// connection.
    SessionCreated(PlayerSession),
    /// A play-phase packet, still opaque.
    Packet { session_id: u64, packet: RawPacket },
    /// A play-phase connection ended.
    SessionClosed {
        session_id: u64,
        identity: Identity,
        reason: String,
    },
}

impl SimulationEvent {
    pub fn session_id(&self) -> u64 {
        match self {
            SimulationEvent::SessionCreated(session) => session.session_id,
            SimulationEvent::Packet { session_id, .. }
            | SimulationEvent::SessionClosed { session_id, .. } => *session_id,
        }
    }
}

/// A cloneable sender into the simulation's event queue.
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    tx: mpsc::UnboundedSender<SimulationEvent>,
}

impl SimulationHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SimulationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hands `event` to the simulation context. Fails only if the simulation is gone.
    pub fn sync(&self, event: SimulationEvent) -> Result<(), WorldGateError> {
        self.tx
            .send(event)
            .map_err(|_| WorldGateError::Internal("simulation core is not running".to_string()))
    }
}
