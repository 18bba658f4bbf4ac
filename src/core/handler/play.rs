// src/core/handler/play.rs

use super::{PhaseContext, Transition};
use crate::connection::PlayerSession;
use crate::core::WorldGateError;
use crate::core::identity::Identity;
use crate::core::protocol::RawPacket;
use crate::core::simulation::SimulationEvent;

/// Forwards every play packet to the simulation core. It never interprets them.
#[derive(Debug)]
pub struct PlayListener {
    identity: Identity,
}

impl PlayListener {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Announces the new session to the simulation. The registry slot was claimed
    /// before the success packet; a newer login may have taken it since.
    pub async fn on_enter(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), WorldGateError> {
        let session_id = ctx.conn.session_id();
        if ctx.state.player_session(&self.identity.id) != Some(session_id) {
            return Err(WorldGateError::DuplicateLogin);
        }
        ctx.guard.announce_player();

        let session = PlayerSession::new(
            session_id,
            self.identity.clone(),
            ctx.conn.addr(),
            ctx.conn.compression_threshold(),
            ctx.conn.is_encrypted(),
            ctx.inbox.clone(),
        );
        ctx.state
            .simulation
            .sync(SimulationEvent::SessionCreated(session))
    }

    pub async fn handle(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        packet: RawPacket,
    ) -> Result<Transition, WorldGateError> {
        ctx.state.simulation.sync(SimulationEvent::Packet {
            session_id: ctx.conn.session_id(),
            packet,
        })?;
        Ok(Transition::Stay)
    }
}
