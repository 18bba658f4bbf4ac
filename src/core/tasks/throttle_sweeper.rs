// src/core/tasks/throttle_sweeper.rs

use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The interval between full sweeps of the throttle map.
const THROTTLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Evicts expired throttle entries on a timer, on top of the amortized sweep the
/// guard performs itself, so idle servers also release memory.
pub struct ThrottleSweeperTask {
    state: Arc<ServerState>,
}

impl ThrottleSweeperTask {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Throttle sweeper task started.");
        let mut interval = tokio::time::interval(THROTTLE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.state.throttle.sweep(Instant::now());
                    if evicted > 0 {
                        debug!(
                            "Evicted {} expired throttle entries ({} remain).",
                            evicted,
                            self.state.throttle.len()
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Throttle sweeper task shutting down.");
                    return;
                }
            }
        }
    }
}
