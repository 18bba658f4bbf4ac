// src/core/identity.rs

//! Identity resolution: turning a claimed username into a durable player identity.
//!
//! Resolution runs on its own task so a slow authority never stalls the connection
//! that asked for it. The result is handed back through a completion callback, which
//! the login listener uses to post a message onto the connection's inbox.

use crate::core::WorldGateError;
use crate::core::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

const SESSION_SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved player identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    /// Signed profile properties (skins, capes) as returned by the authority.
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Identity {
    /// The identity an unverified player gets in insecure mode. The same name always
    /// maps to the same id.
    pub fn offline(name: &str) -> Self {
        Self {
            id: offline_uuid(name),
            name: name.to_string(),
            properties: Vec::new(),
        }
    }
}

/// Name-based (v3) UUID derived from `OfflinePlayer:<name>`.
pub fn offline_uuid(name: &str) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_URL,
        format!("OfflinePlayer:{name}").as_bytes(),
    )
}

/// Everything an authority may use to resolve one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub username: String,
    /// The server-id hash proving the client joined with our key. Present in secure mode.
    pub server_hash: Option<String>,
    /// Forwarded when proxy prevention is enabled.
    pub client_ip: Option<IpAddr>,
}

/// A source of player identities.
///
/// Implementations report "name unknown" as `IdentityNotFound` and any other failure
/// as `IdentityUnavailable`, so the player sees the right reason.
#[async_trait]
pub trait IdentityAuthority: Send + Sync + Debug {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Identity, WorldGateError>;
}

/// Synthesizes identities locally. Used when `online_mode` is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineAuthority;

#[async_trait]
impl IdentityAuthority for OfflineAuthority {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Identity, WorldGateError> {
        Ok(Identity::offline(&request.username))
    }
}

/// Verifies joins against a session server's `hasJoined` endpoint.
#[derive(Debug, Clone)]
pub struct SessionServerAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl SessionServerAuthority {
    pub fn new(base_url: impl Into<String>) -> Result<Self, WorldGateError> {
        let client = reqwest::Client::builder()
            .timeout(SESSION_SERVER_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityAuthority for SessionServerAuthority {
    async fn resolve(&self, request: &ResolveRequest) -> Result<Identity, WorldGateError> {
        let Some(server_hash) = request.server_hash.as_deref() else {
            return Err(WorldGateError::Internal(
                "session server verification requires a server hash".to_string(),
            ));
        };

        let url = format!("{}/session/minecraft/hasJoined", self.base_url);
        let mut query = vec![
            ("username", request.username.clone()),
            ("serverId", server_hash.to_string()),
        ];
        if let Some(ip) = request.client_ip {
            query.push(("ip", ip.to_string()));
        }

        let res = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WorldGateError::IdentityUnavailable(e.to_string()))?;

        match res.status() {
            reqwest::StatusCode::OK => {}
            reqwest::StatusCode::NO_CONTENT => return Err(WorldGateError::IdentityNotFound),
            status => {
                return Err(WorldGateError::IdentityUnavailable(format!(
                    "session server responded with status {status}"
                )));
            }
        }

        let body = res
            .bytes()
            .await
            .map_err(|e| WorldGateError::IdentityUnavailable(e.to_string()))?;
        if body.is_empty() {
            return Err(WorldGateError::IdentityNotFound);
        }
        let identity: Identity = serde_json::from_slice(&body).map_err(|e| {
            WorldGateError::IdentityUnavailable(format!("unreadable session server profile: {e}"))
        })?;

        if !identity.name.eq_ignore_ascii_case(&request.username) {
            warn!(
                "Session server returned profile '{}' for login name '{}'.",
                identity.name, request.username
            );
        }
        Ok(identity)
    }
}

/// Runs identity lookups off the connection's own task.
pub struct IdentityResolver;

impl IdentityResolver {
    /// Spawns one resolution attempt. `worker` only tags the attempt's tracing span.
    /// `on_complete` runs on the resolver task and must not touch connection state
    /// directly; it should forward the result to the connection's inbox.
    pub fn spawn<F>(
        authority: Arc<dyn IdentityAuthority>,
        request: ResolveRequest,
        worker: u64,
        on_complete: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Identity, WorldGateError>) + Send + 'static,
    {
        let span = info_span!(
            "resolver",
            worker = %format!("User Authenticator #{worker}"),
            user = %request.username,
        );
        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = authority.resolve(&request).await;
                metrics::IDENTITY_RESOLUTION_SECONDS.observe(started.elapsed().as_secs_f64());
                match &result {
                    Ok(identity) => debug!("Resolved {} to {}.", identity.name, identity.id),
                    Err(e) => debug!("Resolution failed: {}", e),
                }
                on_complete(result);
            }
            .instrument(span),
        )
    }
}
