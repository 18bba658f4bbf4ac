// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::{simulation_sink::SimulationSinkTask, throttle_sweeper::ThrottleSweeperTask};
use anyhow::Result;
use tracing::info;

/// Spawns all background tasks into the provided JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if server_state.config.metrics.enabled {
        let metrics_state = server_state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Maintenance Tasks ---
    if server_state.throttle.window().is_some() {
        let sweeper = ThrottleSweeperTask::new(server_state.clone());
        let shutdown_rx_sweep = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            sweeper.run(shutdown_rx_sweep).await;
            Ok(())
        });
    }

    // --- Simulation Sink ---
    // Without an attached simulation core the events are drained here so sessions
    // never block on a full queue.
    if let Some(simulation_rx) = ctx.simulation_rx.take() {
        let sink = SimulationSinkTask::new(simulation_rx);
        let shutdown_rx_sink = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            sink.run(shutdown_rx_sink).await;
            Ok(())
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
