// src/core/handler/handshake.rs

use super::{LoginListener, Phase, PhaseContext, StatusListener, Transition};
use crate::core::WorldGateError;
use crate::core::protocol::{HandshakeIntent, HandshakePacket};
use tracing::debug;

/// Waits for the single handshake packet and picks the next phase from its intent.
#[derive(Debug, Default)]
pub struct HandshakeListener;

impl HandshakeListener {
    pub async fn handle(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        packet: HandshakePacket,
    ) -> Result<Transition, WorldGateError> {
        let intent = packet.intent()?;
        debug!(
            "Session {}: handshake from {} (protocol {}, address {}:{}, intent {:?})",
            ctx.conn.session_id(),
            ctx.conn.addr(),
            packet.protocol_version,
            packet.server_address,
            packet.server_port,
            intent
        );
        let next = match intent {
            HandshakeIntent::Status => Phase::Status(StatusListener::new()),
            HandshakeIntent::Login => Phase::Login(LoginListener::new(packet.protocol_version)),
        };
        Ok(Transition::Enter(next))
    }
}
