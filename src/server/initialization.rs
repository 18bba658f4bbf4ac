// src/server/initialization.rs

//! Handles the server initialization process: state setup, key generation and
//! binding the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let server_init = ServerState::initialize(config).context("Failed to initialize server state")?;
    let server_state = server_init.state.clone();
    info!("Server state initialized.");

    let (host, port, max_clients) = {
        let config = &server_state.config;
        (config.host.clone(), config.port, config.max_clients)
    };
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    info!("Worldgate server listening on {}:{}", host, port);
    let connection_permits = Arc::new(Semaphore::new(max_clients));

    Ok(ServerContext {
        state: server_state,
        simulation_rx: Some(server_init.simulation_rx),
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    if config.online_mode {
        info!(
            "Online mode enabled; identities are verified against {}",
            config.session_server
        );
    } else {
        warn!("**** SERVER IS RUNNING IN OFFLINE/INSECURE MODE!");
        warn!("The server will make no attempt to authenticate usernames. Beware.");
    }
    match config.compression() {
        Some(threshold) => info!("Compression enabled for packets of {} bytes or more.", threshold),
        None => info!("Compression disabled."),
    }
    match config.throttle_window() {
        Some(window) => info!("Connection throttle window is {:?}.", window),
        None => info!("Connection throttle disabled."),
    }
    if config.speed_multiplier != 1.0 {
        info!(
            "Simulation speed multiplier is {}; tick interval {:?}, login timeout {} ticks.",
            config.speed_multiplier,
            config.tick_duration(),
            config.effective_login_timeout_ticks()
        );
    }
}
