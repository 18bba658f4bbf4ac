// src/core/handler/status.rs

use super::{PhaseContext, Transition};
use crate::core::WorldGateError;
use crate::core::metrics;
use crate::core::protocol::{ClientboundPacket, StatusClientbound, StatusServerbound};

/// Answers one server-list request and one ping, then closes.
#[derive(Debug, Default)]
pub struct StatusListener {
    answered: bool,
}

impl StatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        packet: StatusServerbound,
    ) -> Result<Transition, WorldGateError> {
        match packet {
            StatusServerbound::Request => {
                if self.answered {
                    return Err(WorldGateError::ProtocolViolation(
                        "duplicate status request".to_string(),
                    ));
                }
                self.answered = true;
                let info = ctx.state.status_document();
                ctx.conn
                    .send(ClientboundPacket::Status(StatusClientbound::ServerInfo(info)))
                    .await?;
                ctx.state.stats.increment_status_requests();
                metrics::STATUS_REQUESTS_TOTAL.inc();
                Ok(Transition::Stay)
            }
            StatusServerbound::Ping { payload } => {
                ctx.conn
                    .send(ClientboundPacket::Status(StatusClientbound::Pong { payload }))
                    .await?;
                Ok(Transition::Close)
            }
        }
    }
}
