// src/core/tasks/mod.rs

//! Long-running background tasks spawned at startup.

pub mod simulation_sink;
pub mod throttle_sweeper;
