// src/core/tasks/simulation_sink.rs

use crate::core::simulation::SimulationEvent;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Consumes simulation events when no simulation core is attached to the process.
/// Sessions are logged as they open and close; play packets are discarded.
pub struct SimulationSinkTask {
    rx: mpsc::UnboundedReceiver<SimulationEvent>,
}

impl SimulationSinkTask {
    pub fn new(rx: mpsc::UnboundedReceiver<SimulationEvent>) -> Self {
        Self { rx }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Simulation sink task started.");
        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        info!("Simulation channel closed; sink exiting.");
                        return;
                    };
                    Self::handle(event);
                }
                _ = shutdown_rx.recv() => {
                    info!("Simulation sink task shutting down.");
                    return;
                }
            }
        }
    }

    fn handle(event: SimulationEvent) {
        match event {
            SimulationEvent::SessionCreated(session) => info!(
                "Session {} joined as {} ({}), compression {:?}, encrypted {}",
                session.session_id,
                session.identity.name,
                session.identity.id,
                session.compression_threshold,
                session.encrypted
            ),
            SimulationEvent::Packet { session_id, packet } => debug!(
                "Session {}: discarding play packet 0x{:02x} ({} bytes)",
                session_id,
                packet.id,
                packet.body.len()
            ),
            SimulationEvent::SessionClosed {
                session_id,
                identity,
                reason,
            } => info!(
                "Session {} ({}) left the game: {}",
                session_id, identity.name, reason
            ),
        }
    }
}
