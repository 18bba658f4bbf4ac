// src/core/protocol/packets.rs

//! Typed packets for the handshake, status and login phases. Play packets stay
//! opaque `RawPacket`s; their schemas belong to the simulation core.
//!
//! Both directions are implemented for both enums so a client (or a test harness)
//! can speak the protocol with the same types the server uses.

use super::buf::{DEFAULT_MAX_STRING_CHARS, PacketRead, PacketWrite};
use super::codec::RawPacket;
use super::status::ServerInfo;
use crate::core::WorldGateError;
use bytes::{Buf, Bytes, BytesMut};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// Longest accepted player name.
pub const MAX_USERNAME_LEN: usize = 16;
const MAX_SERVER_ADDRESS_LEN: usize = 255;
const MAX_SERVER_ID_LEN: usize = 20;
/// Upper bound for the RSA-encrypted fields of the encryption response.
const MAX_ENCRYPTED_FIELD_LEN: usize = 1024;
/// Play-phase disconnect packet id.
pub const PLAY_DISCONNECT_ID: i32 = 0x40;

/// The protocol stage a connection is in. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Handshake,
    Status,
    Login,
    Play,
}

impl PhaseKind {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: PhaseKind) -> bool {
        matches!(
            (self, next),
            (PhaseKind::Handshake, PhaseKind::Status)
                | (PhaseKind::Handshake, PhaseKind::Login)
                | (PhaseKind::Login, PhaseKind::Play)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseKind::Handshake => "HANDSHAKE",
            PhaseKind::Status => "STATUS",
            PhaseKind::Login => "LOGIN",
            PhaseKind::Play => "PLAY",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase a client asks for in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeIntent {
    Status = 1,
    Login = 2,
}

impl TryFrom<i32> for HandshakeIntent {
    type Error = WorldGateError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HandshakeIntent::Status),
            2 => Ok(HandshakeIntent::Login),
            other => Err(WorldGateError::ProtocolViolation(format!(
                "unsupported handshake intent {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    /// Kept raw so the handshake listener decides what an unknown intent means.
    pub next_state: i32,
}

impl HandshakePacket {
    pub fn intent(&self) -> Result<HandshakeIntent, WorldGateError> {
        HandshakeIntent::try_from(self.next_state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusServerbound {
    Request,
    Ping { payload: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginServerbound {
    Start {
        name: String,
    },
    EncryptionResponse {
        shared_secret: Bytes,
        verify_token: Bytes,
    },
}

/// Every packet a client may send, tagged with the phase it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerboundPacket {
    Handshake(HandshakePacket),
    Status(StatusServerbound),
    Login(LoginServerbound),
    Play(RawPacket),
}

impl ServerboundPacket {
    /// Interprets `raw` under the rules of `phase`. An id the phase does not define,
    /// or a body that is not consumed exactly, is rejected.
    pub fn decode(phase: PhaseKind, raw: RawPacket) -> Result<Self, WorldGateError> {
        let RawPacket { id, mut body } = raw;
        let packet = match (phase, id) {
            (PhaseKind::Handshake, 0x00) => ServerboundPacket::Handshake(HandshakePacket {
                protocol_version: body.read_varint()?,
                server_address: body.read_string(MAX_SERVER_ADDRESS_LEN)?,
                server_port: body.read_u16_be()?,
                next_state: body.read_varint()?,
            }),
            (PhaseKind::Status, 0x00) => ServerboundPacket::Status(StatusServerbound::Request),
            (PhaseKind::Status, 0x01) => ServerboundPacket::Status(StatusServerbound::Ping {
                payload: body.read_i64_be()?,
            }),
            (PhaseKind::Login, 0x00) => ServerboundPacket::Login(LoginServerbound::Start {
                name: body.read_string(MAX_USERNAME_LEN)?,
            }),
            (PhaseKind::Login, 0x01) => {
                ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
                    shared_secret: body.read_byte_array(MAX_ENCRYPTED_FIELD_LEN)?,
                    verify_token: body.read_byte_array(MAX_ENCRYPTED_FIELD_LEN)?,
                })
            }
            (PhaseKind::Play, _) => return Ok(ServerboundPacket::Play(RawPacket { id, body })),
            (phase, id) => {
                return Err(WorldGateError::ProtocolViolation(format!(
                    "unknown packet 0x{id:02X} in {phase} phase"
                )));
            }
        };
        expect_consumed(&body, packet.name())?;
        Ok(packet)
    }

    pub fn encode(&self) -> Result<RawPacket, WorldGateError> {
        let mut body = BytesMut::new();
        let id = match self {
            ServerboundPacket::Handshake(hs) => {
                body.write_varint(hs.protocol_version);
                body.write_string(&hs.server_address);
                body.extend_from_slice(&hs.server_port.to_be_bytes());
                body.write_varint(hs.next_state);
                0x00
            }
            ServerboundPacket::Status(StatusServerbound::Request) => 0x00,
            ServerboundPacket::Status(StatusServerbound::Ping { payload }) => {
                body.extend_from_slice(&payload.to_be_bytes());
                0x01
            }
            ServerboundPacket::Login(LoginServerbound::Start { name }) => {
                body.write_string(name);
                0x00
            }
            ServerboundPacket::Login(LoginServerbound::EncryptionResponse {
                shared_secret,
                verify_token,
            }) => {
                body.write_byte_array(shared_secret);
                body.write_byte_array(verify_token);
                0x01
            }
            ServerboundPacket::Play(raw) => return Ok(raw.clone()),
        };
        Ok(RawPacket::new(id, body.freeze()))
    }

    pub fn phase(&self) -> PhaseKind {
        match self {
            ServerboundPacket::Handshake(_) => PhaseKind::Handshake,
            ServerboundPacket::Status(_) => PhaseKind::Status,
            ServerboundPacket::Login(_) => PhaseKind::Login,
            ServerboundPacket::Play(_) => PhaseKind::Play,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerboundPacket::Handshake(_) => "Handshake",
            ServerboundPacket::Status(StatusServerbound::Request) => "Status.Start",
            ServerboundPacket::Status(StatusServerbound::Ping { .. }) => "Status.Ping",
            ServerboundPacket::Login(LoginServerbound::Start { .. }) => "Login.Start",
            ServerboundPacket::Login(LoginServerbound::EncryptionResponse { .. }) => {
                "Login.EncryptionResponse"
            }
            ServerboundPacket::Play(_) => "Play",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusClientbound {
    ServerInfo(ServerInfo),
    Pong { payload: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginClientbound {
    /// `reason` is a JSON chat component.
    Disconnect {
        reason: String,
    },
    EncryptionBegin {
        server_id: String,
        public_key: Bytes,
        verify_token: Bytes,
    },
    Success {
        uuid: Uuid,
        username: String,
    },
    SetCompression {
        threshold: i32,
    },
}

/// Every packet the server may send during the phases this crate owns.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientboundPacket {
    Status(StatusClientbound),
    Login(LoginClientbound),
    Play(RawPacket),
}

impl ClientboundPacket {
    /// A login-phase disconnect carrying `reason` as plain chat text.
    pub fn login_disconnect(reason: &str) -> Self {
        ClientboundPacket::Login(LoginClientbound::Disconnect {
            reason: chat_text(reason),
        })
    }

    /// A play-phase disconnect carrying `reason` as plain chat text.
    pub fn play_disconnect(reason: &str) -> Self {
        let mut body = BytesMut::new();
        body.write_string(&chat_text(reason));
        ClientboundPacket::Play(RawPacket::new(PLAY_DISCONNECT_ID, body.freeze()))
    }

    pub fn encode(&self) -> Result<RawPacket, WorldGateError> {
        let mut body = BytesMut::new();
        let id = match self {
            ClientboundPacket::Status(StatusClientbound::ServerInfo(info)) => {
                body.write_string(&serde_json::to_string(info)?);
                0x00
            }
            ClientboundPacket::Status(StatusClientbound::Pong { payload }) => {
                body.extend_from_slice(&payload.to_be_bytes());
                0x01
            }
            ClientboundPacket::Login(LoginClientbound::Disconnect { reason }) => {
                body.write_string(reason);
                0x00
            }
            ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
                server_id,
                public_key,
                verify_token,
            }) => {
                body.write_string(server_id);
                body.write_byte_array(public_key);
                body.write_byte_array(verify_token);
                0x01
            }
            ClientboundPacket::Login(LoginClientbound::Success { uuid, username }) => {
                body.write_string(&uuid.hyphenated().to_string());
                body.write_string(username);
                0x02
            }
            ClientboundPacket::Login(LoginClientbound::SetCompression { threshold }) => {
                body.write_varint(*threshold);
                0x03
            }
            ClientboundPacket::Play(raw) => return Ok(raw.clone()),
        };
        Ok(RawPacket::new(id, body.freeze()))
    }

    pub fn decode(phase: PhaseKind, raw: RawPacket) -> Result<Self, WorldGateError> {
        let RawPacket { id, mut body } = raw;
        let packet = match (phase, id) {
            (PhaseKind::Status, 0x00) => {
                let json = body.read_string(DEFAULT_MAX_STRING_CHARS)?;
                ClientboundPacket::Status(StatusClientbound::ServerInfo(serde_json::from_str(
                    &json,
                )?))
            }
            (PhaseKind::Status, 0x01) => ClientboundPacket::Status(StatusClientbound::Pong {
                payload: body.read_i64_be()?,
            }),
            (PhaseKind::Login, 0x00) => ClientboundPacket::Login(LoginClientbound::Disconnect {
                reason: body.read_string(DEFAULT_MAX_STRING_CHARS)?,
            }),
            (PhaseKind::Login, 0x01) => {
                ClientboundPacket::Login(LoginClientbound::EncryptionBegin {
                    server_id: body.read_string(MAX_SERVER_ID_LEN)?,
                    public_key: body.read_byte_array(MAX_ENCRYPTED_FIELD_LEN)?,
                    verify_token: body.read_byte_array(MAX_ENCRYPTED_FIELD_LEN)?,
                })
            }
            (PhaseKind::Login, 0x02) => {
                let uuid = body.read_string(36)?;
                let uuid = Uuid::parse_str(&uuid)
                    .map_err(|e| WorldGateError::MalformedPacket(format!("bad uuid: {e}")))?;
                ClientboundPacket::Login(LoginClientbound::Success {
                    uuid,
                    username: body.read_string(MAX_USERNAME_LEN)?,
                })
            }
            (PhaseKind::Login, 0x03) => {
                ClientboundPacket::Login(LoginClientbound::SetCompression {
                    threshold: body.read_varint()?,
                })
            }
            (PhaseKind::Play, _) => return Ok(ClientboundPacket::Play(RawPacket { id, body })),
            (phase, id) => {
                return Err(WorldGateError::ProtocolViolation(format!(
                    "unknown clientbound packet 0x{id:02X} in {phase} phase"
                )));
            }
        };
        expect_consumed(&body, packet.name())?;
        Ok(packet)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientboundPacket::Status(StatusClientbound::ServerInfo(_)) => "Status.ServerInfo",
            ClientboundPacket::Status(StatusClientbound::Pong { .. }) => "Status.Pong",
            ClientboundPacket::Login(LoginClientbound::Disconnect { .. }) => "Login.Disconnect",
            ClientboundPacket::Login(LoginClientbound::EncryptionBegin { .. }) => {
                "Login.EncryptionBegin"
            }
            ClientboundPacket::Login(LoginClientbound::Success { .. }) => "Login.Success",
            ClientboundPacket::Login(LoginClientbound::SetCompression { .. }) => {
                "Login.SetCompression"
            }
            ClientboundPacket::Play(_) => "Play",
        }
    }
}

/// Wraps plain text in a minimal chat component.
pub fn chat_text(text: &str) -> String {
    json!({ "text": text }).to_string()
}

fn expect_consumed(body: &Bytes, packet: &str) -> Result<(), WorldGateError> {
    if body.has_remaining() {
        return Err(WorldGateError::MalformedPacket(format!(
            "{} trailing bytes after {packet}",
            body.remaining()
        )));
    }
    Ok(())
}
