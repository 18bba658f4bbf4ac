// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::*;
use super::stats::StatsState;
use crate::config::Config;
use crate::connection::ConnectionMessage;
use crate::core::WorldGateError;
use crate::core::crypto::ServerKeyPair;
use crate::core::identity::{Identity, IdentityAuthority, OfflineAuthority, SessionServerAuthority};
use crate::core::protocol::ServerInfo;
use crate::core::protocol::status::PlayerSample;
use crate::core::simulation::{SimulationEvent, SimulationHandle};
use crate::core::throttle::ThrottleGuard;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Contains all initialized components required to spawn the server's background tasks.
/// Created once during server initialization and then consumed by the spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// Receives everything the connections hand to the simulation core.
    pub simulation_rx: mpsc::UnboundedReceiver<SimulationEvent>,
}

/// The central struct holding all shared, server-wide state.
///
/// Every dependency a connection needs is reachable from here and injected at
/// construction time; nothing in the connection core reads process-wide globals
/// apart from metrics.
#[derive(Debug)]
pub struct ServerState {
    /// The server's configuration. Read-only while running.
    pub config: Arc<Config>,
    /// The long-lived keypair used for every key exchange.
    pub keypair: Arc<ServerKeyPair>,
    /// Resolves usernames to identities during login.
    pub authority: Arc<dyn IdentityAuthority>,
    /// Per-address login rate limiter shared by all connections.
    pub throttle: ThrottleGuard,
    /// A map of all open sockets, keyed by session ID, with each connection's inbox.
    pub clients: ClientMap,
    /// Players in the play phase, keyed by identity id.
    pub players: PlayerMap,
    pub simulation: SimulationHandle,
    /// The status favicon as a data URI, loaded once at startup.
    pub favicon: Option<String>,
    /// Number of entries in `players`, maintained under the entry lock of each claim.
    online: AtomicUsize,
    /// Numbers identity resolution attempts for diagnostics.
    resolver_workers: AtomicU64,
    pub stats: StatsState,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration, generating
    /// the keypair and picking the identity authority that matches `online_mode`.
    pub fn initialize(config: Config) -> Result<ServerInit, WorldGateError> {
        info!("Generating {}-bit RSA keypair...", config.key_bits);
        let keypair = Arc::new(ServerKeyPair::generate(config.key_bits)?);

        let authority: Arc<dyn IdentityAuthority> = if config.online_mode {
            Arc::new(SessionServerAuthority::new(&config.session_server)?)
        } else {
            Arc::new(OfflineAuthority)
        };

        Ok(Self::with_components(config, keypair, authority))
    }

    /// Builds the state from explicit components. Used by `initialize` and by tests
    /// that need a fixed keypair or a stub authority.
    pub fn with_components(
        config: Config,
        keypair: Arc<ServerKeyPair>,
        authority: Arc<dyn IdentityAuthority>,
    ) -> ServerInit {
        let (simulation, simulation_rx) = SimulationHandle::new();
        let favicon = config
            .status
            .favicon_path
            .as_deref()
            .and_then(load_favicon);

        let state = Arc::new(Self {
            throttle: ThrottleGuard::new(config.throttle_window()),
            config: Arc::new(config),
            keypair,
            authority,
            clients: Arc::new(DashMap::new()),
            players: DashMap::new(),
            online: AtomicUsize::new(0),
            simulation,
            favicon,
            resolver_workers: AtomicU64::new(0),
            stats: StatsState::new(),
        });

        ServerInit {
            state,
            simulation_rx,
        }
    }

    /// Asks the connection identified by `session_id` to disconnect with `reason`.
    /// The kick goes through the connection's own disconnect path. Returns `false`
    /// if no such connection is open.
    pub fn kick(&self, session_id: u64, reason: impl Into<String>) -> bool {
        self.disconnect_session(session_id, WorldGateError::Kicked(reason.into()))
    }

    pub(crate) fn disconnect_session(&self, session_id: u64, cause: WorldGateError) -> bool {
        match self.clients.get(&session_id) {
            Some(entry) => entry.value().1.send(ConnectionMessage::Kick(cause)).is_ok(),
            None => false,
        }
    }

    /// Lists every open socket, ordered by session id.
    pub async fn list_clients(&self) -> Vec<ClientSnapshot> {
        // Collect the handles first so no shard lock is held across an await.
        let infos: Vec<_> = self
            .clients
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect();
        let mut snapshots = Vec::with_capacity(infos.len());
        for info in infos {
            snapshots.push(info.lock().await.snapshot());
        }
        snapshots.sort_by_key(|s| s.session_id);
        snapshots
    }

    pub fn online_players(&self) -> usize {
        self.online.load(Ordering::Acquire)
    }

    /// Returns the session currently playing as `id`, if any.
    pub fn player_session(&self, id: &Uuid) -> Option<u64> {
        self.players.get(id).map(|p| p.session_id)
    }

    /// Claims the registry slot for `identity` on behalf of `session_id`.
    ///
    /// The duplicate check and the capacity check happen under the same entry lock,
    /// so two concurrent handoffs can never both pass. Replacing an existing session
    /// does not need a free slot; the displaced session id is returned and the
    /// caller must kick it.
    pub fn claim_player(
        &self,
        identity: &Identity,
        session_id: u64,
        max_players: usize,
    ) -> Result<Option<u64>, WorldGateError> {
        match self.players.entry(identity.id) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().session_id;
                if previous == session_id {
                    return Ok(None);
                }
                occupied.insert(OnlinePlayer {
                    session_id,
                    name: identity.name.clone(),
                });
                Ok(Some(previous))
            }
            Entry::Vacant(vacant) => {
                self.online
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |online| {
                        (online < max_players).then_some(online + 1)
                    })
                    .map_err(|_| WorldGateError::ServerFull)?;
                vacant.insert(OnlinePlayer {
                    session_id,
                    name: identity.name.clone(),
                });
                Ok(None)
            }
        }
    }

    /// Removes the player entry for `id` only if it still belongs to `session_id`,
    /// so a displaced session cannot unregister its replacement.
    pub fn unregister_player(&self, id: &Uuid, session_id: u64) -> bool {
        self.players
            .remove_if(id, |_, player| {
                let owned = player.session_id == session_id;
                if owned {
                    self.online.fetch_sub(1, Ordering::AcqRel);
                }
                owned
            })
            .is_some()
    }

    pub fn next_resolver_worker(&self) -> u64 {
        self.resolver_workers.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Builds the server-list document from the current player registry.
    pub fn status_document(&self) -> ServerInfo {
        let status = &self.config.status;
        let sample = self
            .players
            .iter()
            .take(status.sample_size)
            .map(|entry| PlayerSample {
                name: entry.value().name.clone(),
                id: *entry.key(),
            })
            .collect();
        ServerInfo::new(
            status.motd.clone(),
            status.max_players,
            i32::try_from(self.online_players()).unwrap_or(i32::MAX),
            sample,
            self.favicon.clone(),
        )
    }
}

/// Reads a PNG and renders it as a data URI. A missing or unreadable icon is not
/// fatal; the status document simply omits it.
fn load_favicon(path: &str) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", BASE64.encode(bytes))),
        Err(e) => {
            warn!("Could not load favicon from '{}': {}. Continuing without one.", path, e);
            None
        }
    }
}
