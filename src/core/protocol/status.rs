// src/core/protocol/status.rs

//! The JSON document returned to server-list pings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub version: VersionInfo,
    pub players: PlayerList,
    pub description: Description,
    /// A `data:image/png;base64,` URI, omitted when no icon is configured.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub favicon: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub name: String,
    pub protocol: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlayerList {
    pub max: i32,
    pub online: i32,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlayerSample {
    pub name: String,
    pub id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Description {
    pub text: String,
}

impl ServerInfo {
    pub fn new(
        motd: impl Into<String>,
        max_players: i32,
        online_players: i32,
        sample: Vec<PlayerSample>,
        favicon: Option<String>,
    ) -> Self {
        Self {
            version: VersionInfo {
                name: super::GAME_VERSION.to_string(),
                protocol: super::PROTOCOL_VERSION,
            },
            players: PlayerList {
                max: max_players,
                online: online_players,
                sample,
            },
            description: Description { text: motd.into() },
            favicon,
        }
    }
}
