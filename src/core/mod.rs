// src/core/mod.rs

//! The connection core: protocol, cryptography, identity resolution, throttling and
//! the phase listeners, plus the shared state they operate on.

pub mod crypto;
pub mod errors;
pub mod handler;
pub mod identity;
pub mod metrics;
pub mod protocol;
pub mod simulation;
pub mod state;
pub mod tasks;
pub mod throttle;

pub use errors::WorldGateError;
