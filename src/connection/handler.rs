// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.
//!
//! The handler is the connection's single serialized execution context. Socket reads,
//! server ticks, shutdown and messages posted by other tasks (identity resolvers,
//! administrative kicks, the simulation core) are all multiplexed in one `select!`
//! loop, so connection state is only ever touched from this task.

use super::guard::ConnectionGuard;
use super::session::{ConnectionInbox, ConnectionMessage};
use super::transport::Connection;
use crate::core::WorldGateError;
use crate::core::handler::{Phase, PhaseContext, Transition};
use crate::core::metrics;
use crate::core::protocol::{PhaseKind, RawPacket, ServerboundPacket};
use crate::core::state::{ClientInfo, ServerState};
use crate::server::AnyStream;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Builds a `PhaseContext` from disjoint fields so the active phase can be borrowed
/// mutably at the same time.
macro_rules! phase_ctx {
    ($handler:ident) => {
        PhaseContext {
            conn: &mut $handler.conn,
            state: &$handler.state,
            inbox: &$handler.inbox_tx,
            guard: &mut $handler.guard,
        }
    };
}

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler {
    conn: Connection,
    phase: Phase,
    state: Arc<ServerState>,
    inbox_tx: ConnectionInbox,
    inbox_rx: mpsc::UnboundedReceiver<ConnectionMessage>,
    global_shutdown_rx: broadcast::Receiver<()>,
    guard: ConnectionGuard,
}

impl ConnectionHandler {
    /// Creates a new `ConnectionHandler` in the handshake phase and registers it in
    /// the server's client map.
    pub fn new(
        socket: AnyStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        session_id: u64,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        state.clients.insert(
            session_id,
            (
                Arc::new(Mutex::new(ClientInfo::new(addr, session_id))),
                inbox_tx.clone(),
            ),
        );
        let guard = ConnectionGuard::new(state.clone(), session_id, addr);

        Self {
            conn: Connection::new(socket, addr, session_id),
            phase: Phase::default(),
            state,
            inbox_tx,
            inbox_rx,
            global_shutdown_rx,
            guard,
        }
    }

    /// The main event loop for the connection. Returns once the connection is closed,
    /// at which point the guard releases every resource tied to it.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.state.config.tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    debug!("Connection handler for {} received shutdown signal.", self.conn.addr());
                    Err(WorldGateError::ServerClosing)
                }
                Some(message) = self.inbox_rx.recv() => self.on_message(message).await,
                _ = ticker.tick() => self.on_tick().await,
                result = self.conn.next_packet() => match result {
                    Some(Ok(raw)) => self.on_packet(raw).await,
                    Some(Err(e)) => Err(e),
                    None => {
                        debug!("Connection from {} closed by peer.", self.conn.addr());
                        self.guard.set_close_reason("Disconnected");
                        break;
                    }
                },
            };

            match outcome {
                Ok(Transition::Stay) => {}
                Ok(Transition::Enter(next)) => {
                    if let Err(e) = self.enter_phase(next).await {
                        self.fail(e).await;
                        break;
                    }
                }
                Ok(Transition::Close) => {
                    self.guard.set_close_reason("Disconnected");
                    self.conn.disconnect("Disconnected").await;
                    break;
                }
                Err(e) => {
                    self.fail(e).await;
                    break;
                }
            }
        }
    }

    /// Decodes `raw` under the current phase and routes it to the active listener.
    async fn on_packet(&mut self, raw: RawPacket) -> Result<Transition, WorldGateError> {
        let packet = ServerboundPacket::decode(self.conn.phase(), raw)?;
        debug!(
            "Session {}: received {}",
            self.conn.session_id(),
            packet.name()
        );

        let mut ctx = phase_ctx!(self);
        match (&mut self.phase, packet) {
            (Phase::Handshake(listener), ServerboundPacket::Handshake(p)) => {
                listener.handle(&mut ctx, p).await
            }
            (Phase::Status(listener), ServerboundPacket::Status(p)) => {
                listener.handle(&mut ctx, p).await
            }
            (Phase::Login(listener), ServerboundPacket::Login(p)) => {
                listener.handle(&mut ctx, p).await
            }
            (Phase::Play(listener), ServerboundPacket::Play(p)) => {
                listener.handle(&mut ctx, p).await
            }
            (phase, packet) => Err(WorldGateError::ProtocolViolation(format!(
                "{} packet received in {} phase",
                packet.phase(),
                phase.kind()
            ))),
        }
    }

    async fn on_message(&mut self, message: ConnectionMessage) -> Result<Transition, WorldGateError> {
        match message {
            ConnectionMessage::IdentityResolved { attempt, result } => {
                let mut ctx = phase_ctx!(self);
                match &mut self.phase {
                    Phase::Login(listener) => listener.on_identity_resolved(&mut ctx, attempt, result),
                    _ => {
                        debug!(
                            "Session {}: identity result arrived outside login, ignoring.",
                            self.conn.session_id()
                        );
                        Ok(Transition::Stay)
                    }
                }
            }
            ConnectionMessage::Send(raw) => {
                if self.conn.phase() == PhaseKind::Play {
                    self.conn.send_raw(raw).await?;
                } else {
                    debug!(
                        "Session {}: dropping outbound packet 0x{:02x} before play phase.",
                        self.conn.session_id(),
                        raw.id
                    );
                }
                Ok(Transition::Stay)
            }
            ConnectionMessage::Kick(cause) => Err(cause),
        }
    }

    /// Handshake and status share the login deadline, counted from accept, so an
    /// idle socket cannot hold its slot.
    async fn on_tick(&mut self) -> Result<Transition, WorldGateError> {
        let ticks = self.conn.tick();
        let deadline = self.state.config.effective_login_timeout_ticks();
        let mut ctx = phase_ctx!(self);
        match &mut self.phase {
            Phase::Login(listener) => listener.on_tick(&mut ctx).await,
            Phase::Handshake(_) | Phase::Status(_) if ticks > deadline => {
                Err(WorldGateError::LoginTimeout)
            }
            _ => Ok(Transition::Stay),
        }
    }

    /// Swaps in `next` as the active listener. The old listener is dropped first, so
    /// nothing it owned (a pending login, a resolver task) outlives the transition.
    async fn enter_phase(&mut self, next: Phase) -> Result<(), WorldGateError> {
        let kind = next.kind();
        self.conn.set_phase(kind)?;
        self.phase = next;

        let client_info = self
            .state
            .clients
            .get(&self.conn.session_id())
            .map(|entry| entry.value().0.clone());
        if let Some(info) = client_info {
            info.lock().await.phase = kind;
        }

        let mut ctx = phase_ctx!(self);
        match &mut self.phase {
            Phase::Login(listener) => listener.on_enter(&mut ctx).await,
            Phase::Play(listener) => listener.on_enter(&mut ctx).await,
            Phase::Handshake(_) | Phase::Status(_) => Ok(()),
        }
    }

    /// The single disconnect path for every fatal condition.
    async fn fail(&mut self, e: WorldGateError) {
        let addr = self.conn.addr();
        let session_id = self.conn.session_id();

        if e.is_security_event() {
            warn!(target: "worldgate::security", "Session {} from {}: {}", session_id, addr, e);
            metrics::SECURITY_EVENTS_TOTAL
                .with_label_values(&[e.kind()])
                .inc();
        } else {
            match &e {
                WorldGateError::Throttled => {
                    debug!("Throttled login attempt from {}", addr);
                    metrics::THROTTLED_CONNECTIONS_TOTAL.inc();
                }
                WorldGateError::LoginTimeout => {
                    info!("Session {} from {} took too long to log in", session_id, addr);
                }
                WorldGateError::ServerClosing | WorldGateError::Kicked(_) => {
                    info!("Session {} from {} disconnected: {}", session_id, addr, e);
                }
                WorldGateError::Io(_) => {
                    if is_normal_disconnect(&e) {
                        debug!("Connection from {} closed by peer: {}", addr, e);
                    } else {
                        warn!("Connection error for {}: {}", addr, e);
                    }
                }
                _ => warn!("Session {} from {} lost connection: {}", session_id, addr, e),
            }
        }

        if self.conn.phase() == PhaseKind::Login {
            metrics::LOGIN_FAILURES_TOTAL
                .with_label_values(&[e.kind()])
                .inc();
        }

        let reason = e.disconnect_reason();
        self.guard.set_close_reason(reason.clone());
        // Drop any pending login now so its resolver stops before the farewell flush.
        self.phase = Phase::default();
        self.conn.disconnect(&reason).await;
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &WorldGateError) -> bool {
    matches!(e, WorldGateError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
