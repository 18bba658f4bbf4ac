// src/server/context.rs

use crate::core::simulation::SimulationEvent;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    /// Taken by the spawner when it starts the simulation sink.
    pub simulation_rx: Option<mpsc::UnboundedReceiver<SimulationEvent>>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    /// Bounds the number of concurrently open sockets to `max_clients`.
    pub connection_permits: Arc<Semaphore>,
}
