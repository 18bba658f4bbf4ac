// src/core/protocol/mod.rs

//! Wire protocol: primitive field encoding, the framing codec and the typed packets
//! of the phases this crate owns.

pub mod buf;
pub mod codec;
pub mod packets;
pub mod status;

pub use codec::{PacketCodec, RawPacket};
pub use packets::{
    ClientboundPacket, HandshakeIntent, HandshakePacket, LoginClientbound, LoginServerbound,
    PhaseKind, ServerboundPacket, StatusClientbound, StatusServerbound,
};
pub use status::ServerInfo;

/// The protocol version this server speaks.
pub const PROTOCOL_VERSION: i32 = 47;
/// Display name of the game version matching `PROTOCOL_VERSION`.
pub const GAME_VERSION: &str = "1.8.9";
