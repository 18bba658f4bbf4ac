// src/core/errors.rs

//! Defines the primary error type for the connection core.

use std::sync::Arc;
use thiserror::Error;

/// Every failure a connection can run into, from transport errors to login rejections.
/// All fatal variants end up in the same disconnect path; `disconnect_reason` provides
/// the text shown to the player.
#[derive(Error, Debug)]
pub enum WorldGateError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Invalid nonce")]
    InvalidNonce,

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Connection throttled")]
    Throttled,

    #[error("Identity authority unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Login timed out")]
    LoginTimeout,

    #[error("Server is full")]
    ServerFull,

    #[error("Outdated client (protocol {0})")]
    OutdatedClient(i32),

    #[error("Outdated server (client protocol {0})")]
    OutdatedServer(i32),

    #[error("Logged in from another location")]
    DuplicateLogin,

    #[error("Kicked: {0}")]
    Kicked(String),

    #[error("Server is shutting down")]
    ServerClosing,

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl WorldGateError {
    /// The user-facing reason sent in a disconnect packet.
    pub fn disconnect_reason(&self) -> String {
        match self {
            WorldGateError::Io(_) => "Internal Exception: connection lost".to_string(),
            WorldGateError::ProtocolViolation(msg) | WorldGateError::MalformedPacket(msg) => {
                format!("Protocol error: {msg}")
            }
            WorldGateError::InvalidNonce => "Invalid nonce!".to_string(),
            WorldGateError::Crypto(_) => "Encryption handshake failed".to_string(),
            WorldGateError::Throttled => {
                "Connection throttled! Please wait before reconnecting.".to_string()
            }
            WorldGateError::IdentityUnavailable(_) | WorldGateError::HttpClientError(_) => {
                "Authentication servers are down. Please try again later, sorry!".to_string()
            }
            WorldGateError::IdentityNotFound => "Failed to verify username!".to_string(),
            WorldGateError::LoginTimeout => "Took too long to log in".to_string(),
            WorldGateError::ServerFull => "The server is full!".to_string(),
            WorldGateError::OutdatedClient(_) => "Outdated client!".to_string(),
            WorldGateError::OutdatedServer(_) => "Outdated server!".to_string(),
            WorldGateError::DuplicateLogin => "You logged in from another location".to_string(),
            WorldGateError::Kicked(reason) => reason.clone(),
            WorldGateError::ServerClosing => "Server closed".to_string(),
            WorldGateError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// True for failures that indicate tampering rather than a misbehaving client.
    pub fn is_security_event(&self) -> bool {
        matches!(self, WorldGateError::InvalidNonce)
    }

    /// A short, stable label used for the login failure metric.
    pub fn kind(&self) -> &'static str {
        match self {
            WorldGateError::Io(_) => "transport",
            WorldGateError::ProtocolViolation(_) | WorldGateError::MalformedPacket(_) => {
                "protocol"
            }
            WorldGateError::InvalidNonce | WorldGateError::Crypto(_) => "crypto",
            WorldGateError::Throttled => "throttled",
            WorldGateError::IdentityUnavailable(_) | WorldGateError::HttpClientError(_) => {
                "identity_unavailable"
            }
            WorldGateError::IdentityNotFound => "identity_not_found",
            WorldGateError::LoginTimeout => "timeout",
            WorldGateError::ServerFull => "server_full",
            WorldGateError::OutdatedClient(_) | WorldGateError::OutdatedServer(_) => "version",
            WorldGateError::DuplicateLogin | WorldGateError::Kicked(_) => "kicked",
            WorldGateError::ServerClosing => "shutdown",
            WorldGateError::Internal(_) => "internal",
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for WorldGateError {
    fn clone(&self) -> Self {
        match self {
            WorldGateError::Io(e) => WorldGateError::Io(Arc::clone(e)),
            WorldGateError::ProtocolViolation(s) => WorldGateError::ProtocolViolation(s.clone()),
            WorldGateError::MalformedPacket(s) => WorldGateError::MalformedPacket(s.clone()),
            WorldGateError::InvalidNonce => WorldGateError::InvalidNonce,
            WorldGateError::Crypto(s) => WorldGateError::Crypto(s.clone()),
            WorldGateError::Throttled => WorldGateError::Throttled,
            WorldGateError::IdentityUnavailable(s) => {
                WorldGateError::IdentityUnavailable(s.clone())
            }
            WorldGateError::IdentityNotFound => WorldGateError::IdentityNotFound,
            WorldGateError::LoginTimeout => WorldGateError::LoginTimeout,
            WorldGateError::ServerFull => WorldGateError::ServerFull,
            WorldGateError::OutdatedClient(v) => WorldGateError::OutdatedClient(*v),
            WorldGateError::OutdatedServer(v) => WorldGateError::OutdatedServer(*v),
            WorldGateError::DuplicateLogin => WorldGateError::DuplicateLogin,
            WorldGateError::Kicked(s) => WorldGateError::Kicked(s.clone()),
            WorldGateError::ServerClosing => WorldGateError::ServerClosing,
            WorldGateError::HttpClientError(s) => WorldGateError::HttpClientError(s.clone()),
            WorldGateError::Internal(s) => WorldGateError::Internal(s.clone()),
        }
    }
}

impl PartialEq for WorldGateError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WorldGateError::Io(e1), WorldGateError::Io(e2)) => e1.kind() == e2.kind(),
            (WorldGateError::ProtocolViolation(s1), WorldGateError::ProtocolViolation(s2)) => {
                s1 == s2
            }
            (WorldGateError::MalformedPacket(s1), WorldGateError::MalformedPacket(s2)) => s1 == s2,
            (WorldGateError::Crypto(s1), WorldGateError::Crypto(s2)) => s1 == s2,
            (WorldGateError::IdentityUnavailable(s1), WorldGateError::IdentityUnavailable(s2)) => {
                s1 == s2
            }
            (WorldGateError::OutdatedClient(v1), WorldGateError::OutdatedClient(v2)) => v1 == v2,
            (WorldGateError::OutdatedServer(v1), WorldGateError::OutdatedServer(v2)) => v1 == v2,
            (WorldGateError::Kicked(s1), WorldGateError::Kicked(s2)) => s1 == s2,
            (WorldGateError::HttpClientError(s1), WorldGateError::HttpClientError(s2)) => s1 == s2,
            (WorldGateError::Internal(s1), WorldGateError::Internal(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for WorldGateError {
    fn from(e: std::io::Error) -> Self {
        WorldGateError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for WorldGateError {
    fn from(e: reqwest::Error) -> Self {
        WorldGateError::HttpClientError(e.to_string())
    }
}

impl From<serde_json::Error> for WorldGateError {
    fn from(e: serde_json::Error) -> Self {
        WorldGateError::MalformedPacket(format!("invalid JSON payload: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for WorldGateError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        WorldGateError::MalformedPacket("string is not valid UTF-8".to_string())
    }
}

impl From<rsa::Error> for WorldGateError {
    fn from(e: rsa::Error) -> Self {
        WorldGateError::Crypto(e.to_string())
    }
}
