// src/core/handler/login.rs

//! The login listener: throttle check, key exchange, identity resolution, timeout
//! supervision and the handoff to the play phase.
//!
//! Within the login phase the listener walks `Hello -> Key -> Authenticating ->
//! ReadyToAccept`. Insecure mode skips `Key`.

use super::{Phase, PhaseContext, PlayListener, Transition};
use crate::connection::ConnectionMessage;
use crate::core::WorldGateError;
use crate::core::crypto::{SHARED_SECRET_LEN, VerifyToken, server_hash};
use crate::core::identity::{Identity, IdentityResolver, ResolveRequest};
use crate::core::metrics;
use crate::core::protocol::packets::MAX_USERNAME_LEN;
use crate::core::protocol::{
    ClientboundPacket, LoginClientbound, LoginServerbound, PROTOCOL_VERSION,
};
use crate::core::throttle::ThrottleDecision;
use bytes::Bytes;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The server id sent in the encryption request. Modern clients expect it empty.
const SERVER_ID: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Hello,
    Key,
    Authenticating,
    ReadyToAccept,
}

/// State of one login attempt. Dropping it abandons any resolver still running.
#[derive(Debug, Default)]
pub struct PendingLogin {
    pub username: Option<String>,
    verify_token: Option<VerifyToken>,
    pub identity: Option<Identity>,
    session_key: Option<Bytes>,
    pub elapsed_ticks: u64,
    /// The resolver attempt whose answer this login is waiting for.
    attempt: u64,
    resolver: Option<JoinHandle<()>>,
}

impl PendingLogin {
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }
}

impl Drop for PendingLogin {
    fn drop(&mut self) {
        if let Some(resolver) = self.resolver.take() {
            resolver.abort();
        }
    }
}

#[derive(Debug)]
pub struct LoginListener {
    protocol_version: i32,
    stage: LoginState,
    pending: PendingLogin,
}

impl LoginListener {
    pub fn new(protocol_version: i32) -> Self {
        Self {
            protocol_version,
            stage: LoginState::Hello,
            pending: PendingLogin::default(),
        }
    }

    pub fn stage(&self) -> LoginState {
        self.stage
    }

    pub fn pending(&self) -> &PendingLogin {
        &self.pending
    }

    /// Runs as the connection enters the login phase. Every login start is recorded
    /// by the throttle, whatever its later outcome.
    pub async fn on_enter(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), WorldGateError> {
        let ip = ctx.conn.addr().ip();
        if ctx.state.throttle.check_and_record(ip, Instant::now()) == ThrottleDecision::Rejected {
            return Err(WorldGateError::Throttled);
        }

        if self.protocol_version != PROTOCOL_VERSION {
            return Err(if self.protocol_version < PROTOCOL_VERSION {
                WorldGateError::OutdatedClient(self.protocol_version)
            } else {
                WorldGateError::OutdatedServer(self.protocol_version)
            });
        }
        Ok(())
    }

    pub async fn handle(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        packet: LoginServerbound,
    ) -> Result<Transition, WorldGateError> {
        match (self.stage, packet) {
            (LoginState::Hello, LoginServerbound::Start { name }) => self.on_start(ctx, name).await,
            (
                LoginState::Key,
                LoginServerbound::EncryptionResponse {
                    shared_secret,
                    verify_token,
                },
            ) => self.on_encryption_response(ctx, &shared_secret, &verify_token),
            (stage, LoginServerbound::Start { .. }) => Err(WorldGateError::ProtocolViolation(
                format!("unexpected Login.Start in state {stage:?}"),
            )),
            (stage, LoginServerbound::EncryptionResponse { .. }) => {
                Err(WorldGateError::ProtocolViolation(format!(
                    "unexpected Login.EncryptionResponse in state {stage:?}"
                )))
            }
        }
    }

    async fn on_start(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        name: String,
    ) -> Result<Transition, WorldGateError> {
        validate_username(&name)?;

        let client_info = ctx
            .state
            .clients
            .get(&ctx.conn.session_id())
            .map(|entry| entry.value().0.clone());
        if let Some(info) = client_info {
            info.lock().await.username = Some(name.clone());
        }
        self.pending.username = Some(name);

        if ctx.state.config.online_mode {
            let token = VerifyToken::generate();
            ctx.conn
                .send(ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
                    server_id: SERVER_ID.to_string(),
                    public_key: ctx.state.keypair.public_der().clone(),
                    verify_token: Bytes::copy_from_slice(token.as_bytes()),
                }))
                .await?;
            self.pending.verify_token = Some(token);
            self.stage = LoginState::Key;
        } else {
            self.begin_authentication(ctx, None);
        }
        Ok(Transition::Stay)
    }

    fn on_encryption_response(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        encrypted_secret: &[u8],
        encrypted_token: &[u8],
    ) -> Result<Transition, WorldGateError> {
        // The token is consumed here: whatever happens next, it is never compared again.
        let Some(expected) = self.pending.verify_token.take() else {
            return Err(WorldGateError::ProtocolViolation(
                "encryption response without a pending request".to_string(),
            ));
        };

        let keypair = &ctx.state.keypair;
        let token = keypair
            .decrypt(encrypted_token)
            .map_err(|_| WorldGateError::InvalidNonce)?;
        if !expected.matches(&token) {
            return Err(WorldGateError::InvalidNonce);
        }
        let secret = keypair.decrypt(encrypted_secret)?;
        if secret.len() != SHARED_SECRET_LEN {
            return Err(WorldGateError::Crypto(format!(
                "shared secret must be {SHARED_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }

        ctx.conn.enable_encryption(&secret)?;
        let hash = server_hash(SERVER_ID, &secret, keypair.public_der());
        self.pending.session_key = Some(Bytes::from(secret));
        self.begin_authentication(ctx, Some(hash));
        Ok(Transition::Stay)
    }

    fn begin_authentication(&mut self, ctx: &mut PhaseContext<'_>, server_hash: Option<String>) {
        self.stage = LoginState::Authenticating;

        let attempt = ctx.state.next_resolver_worker();
        self.pending.attempt = attempt;

        let client_ip = ctx
            .state
            .config
            .prevent_proxy_connections
            .then(|| ctx.conn.addr().ip());
        let request = ResolveRequest {
            username: self.pending.username.clone().unwrap_or_default(),
            server_hash,
            client_ip,
        };

        let inbox = ctx.inbox.clone();
        let resolver = IdentityResolver::spawn(
            ctx.state.authority.clone(),
            request,
            attempt,
            move |result| {
                // The connection may already be gone; then there is nobody to tell.
                let _ = inbox.send(ConnectionMessage::IdentityResolved { attempt, result });
            },
        );
        self.pending.resolver = Some(resolver);
    }

    /// Applies a resolver result. Answers for any attempt other than the current
    /// one are ignored.
    pub fn on_identity_resolved(
        &mut self,
        ctx: &mut PhaseContext<'_>,
        attempt: u64,
        result: Result<Identity, WorldGateError>,
    ) -> Result<Transition, WorldGateError> {
        if self.stage != LoginState::Authenticating || attempt != self.pending.attempt {
            debug!(
                "Session {}: ignoring stale identity result for attempt {}",
                ctx.conn.session_id(),
                attempt
            );
            return Ok(Transition::Stay);
        }
        self.pending.resolver = None;

        let identity = result?;
        info!("UUID of player {} is {}", identity.name, identity.id);
        self.pending.identity = Some(identity);
        self.stage = LoginState::ReadyToAccept;
        Ok(Transition::Stay)
    }

    /// Called once per server tick. Drains `ReadyToAccept` through the handoff and
    /// otherwise enforces the login timeout.
    pub async fn on_tick(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Transition, WorldGateError> {
        if self.stage == LoginState::ReadyToAccept {
            return self.accept(ctx).await;
        }
        self.pending.elapsed_ticks += 1;
        if self.pending.elapsed_ticks > ctx.state.config.effective_login_timeout_ticks() {
            return Err(WorldGateError::LoginTimeout);
        }
        Ok(Transition::Stay)
    }

    /// The success handoff: capacity and duplicate checks, compression, then the
    /// success packet. The play listener is only installed after success is sent.
    async fn accept(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Transition, WorldGateError> {
        let Some(identity) = self.pending.identity.take() else {
            return Err(WorldGateError::Internal(
                "ready to accept without a resolved identity".to_string(),
            ));
        };
        let session_id = ctx.conn.session_id();

        let max_players = usize::try_from(ctx.state.config.status.max_players).unwrap_or(0);
        let displaced = ctx.state.claim_player(&identity, session_id, max_players)?;
        ctx.guard.claim_player(identity.clone());
        metrics::ONLINE_PLAYERS.set(ctx.state.online_players() as f64);
        if let Some(previous) = displaced {
            info!(
                "{} logged in again; disconnecting session {}",
                identity.name, previous
            );
            ctx.state
                .disconnect_session(previous, WorldGateError::DuplicateLogin);
        }

        if let Err(e) = Self::send_handoff(ctx, &identity).await {
            ctx.guard.release_player();
            return Err(e);
        }

        ctx.state.stats.increment_total_logins();
        metrics::LOGINS_COMPLETED_TOTAL.inc();
        info!(
            "{} [{}] logged in with session {}",
            identity.name,
            ctx.conn.addr(),
            session_id
        );
        Ok(Transition::Enter(Phase::Play(PlayListener::new(identity))))
    }

    /// Announces compression, if configured, and sends the success packet.
    async fn send_handoff(
        ctx: &mut PhaseContext<'_>,
        identity: &Identity,
    ) -> Result<(), WorldGateError> {
        if let Some(threshold) = ctx.state.config.compression() {
            // `send` flushes, so the announcement is on the wire before the switch.
            ctx.conn
                .send(ClientboundPacket::Login(LoginClientbound::SetCompression {
                    threshold: threshold as i32,
                }))
                .await?;
            ctx.conn.enable_compression(threshold)?;
        }

        ctx.conn
            .send(ClientboundPacket::Login(LoginClientbound::Success {
                uuid: identity.id,
                username: identity.name.clone(),
            }))
            .await
    }
}

/// Accepts 1 to 16 characters of ASCII letters, digits and underscores.
pub fn validate_username(name: &str) -> Result<(), WorldGateError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(WorldGateError::ProtocolViolation(format!(
            "invalid username '{name}'"
        )))
    }
}
