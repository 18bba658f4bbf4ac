// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: the framed transport, the
//! per-connection event loop, resource cleanup and the session object handed to the
//! simulation core.

mod guard;
mod handler;
mod session;
mod transport;

// Publicly re-export the primary types from the sub-modules.
pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::{ConnectionInbox, ConnectionMessage, PlayerSession};
pub use transport::Connection;
