// src/core/handler/mod.rs

//! The phase listener set. Exactly one listener is active per connection; the
//! `Phase` enum holds it, and the connection handler routes each decoded packet with
//! a single match on `(phase, packet)`.

pub mod handshake;
pub mod login;
pub mod play;
pub mod status;

pub use handshake::HandshakeListener;
pub use login::{LoginListener, LoginState, PendingLogin, validate_username};
pub use play::PlayListener;
pub use status::StatusListener;

use crate::connection::{Connection, ConnectionGuard, ConnectionInbox};
use crate::core::protocol::PhaseKind;
use crate::core::state::ServerState;
use std::sync::Arc;

/// The active listener, owned by the connection handler.
pub enum Phase {
    Handshake(HandshakeListener),
    Status(StatusListener),
    Login(LoginListener),
    Play(PlayListener),
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Handshake(_) => PhaseKind::Handshake,
            Phase::Status(_) => PhaseKind::Status,
            Phase::Login(_) => PhaseKind::Login,
            Phase::Play(_) => PhaseKind::Play,
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Handshake(HandshakeListener)
    }
}

/// What the handler should do after a listener has processed an event.
pub enum Transition {
    Stay,
    /// Replace the active listener. The old one is dropped, never stacked.
    Enter(Phase),
    /// Close the connection normally.
    Close,
}

/// Everything a listener may touch while handling one event.
pub struct PhaseContext<'a> {
    pub conn: &'a mut Connection,
    pub state: &'a Arc<ServerState>,
    pub inbox: &'a ConnectionInbox,
    pub guard: &'a mut ConnectionGuard,
}
