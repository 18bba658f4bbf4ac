// src/core/protocol/codec.rs

//! Implements the length-prefixed packet framing and the corresponding `Encoder` and
//! `Decoder`. Compression and the session cipher are layered inside the codec, so
//! once either is switched on it applies to every frame that follows.

use super::buf::{PacketRead, PacketWrite, peek_varint, varint_len};
use crate::core::WorldGateError;
use crate::core::crypto::SessionCipher;
use bytes::{Buf, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame body accepted in either direction (the largest 3-byte VarInt).
pub const MAX_FRAME_LEN: usize = 2_097_151;
const MAX_FRAME_PREFIX_LEN: usize = 3;

/// Upper bound for the inflated size of a compressed packet.
pub const MAX_UNCOMPRESSED_LEN: usize = 8 * 1024 * 1024;

/// A packet id plus its still-encoded fields. This is the unit the codec moves; the
/// per-phase packet enums are built on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub id: i32,
    pub body: Bytes,
}

impl RawPacket {
    pub fn new(id: i32, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    /// Size of the id and body once written, before compression.
    pub fn encoded_len(&self) -> usize {
        varint_len(self.id) + self.body.len()
    }
}

/// A `tokio_util::codec` implementation for framing `RawPacket`s.
#[derive(Debug, Default)]
pub struct PacketCodec {
    compression_threshold: Option<usize>,
    cipher: Option<SessionCipher>,
    /// How many bytes at the front of the read buffer have already been decrypted.
    decrypted: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the session cipher. Bytes already sitting in the read buffer were
    /// sent after the client switched on encryption, so they get decrypted too.
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), WorldGateError> {
        if self.cipher.is_some() {
            return Err(WorldGateError::Internal(
                "session cipher is already installed".to_string(),
            ));
        }
        self.cipher = Some(SessionCipher::new(shared_secret)?);
        self.decrypted = 0;
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Switches to compressed framing. Compression can never be turned off again.
    pub fn enable_compression(&mut self, threshold: usize) -> Result<(), WorldGateError> {
        if let Some(current) = self.compression_threshold {
            return Err(WorldGateError::Internal(format!(
                "compression is already enabled with threshold {current}"
            )));
        }
        self.compression_threshold = Some(threshold);
        Ok(())
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        self.compression_threshold
    }

    fn inflate(&self, mut frame: Bytes, threshold: usize) -> Result<Bytes, WorldGateError> {
        let data_len = frame.read_varint()?;
        if data_len == 0 {
            return Ok(frame);
        }
        if data_len < 0 {
            return Err(WorldGateError::MalformedPacket(format!(
                "negative uncompressed length {data_len}"
            )));
        }
        let data_len = data_len as usize;
        if data_len < threshold {
            return Err(WorldGateError::MalformedPacket(format!(
                "badly compressed packet: size {data_len} is below threshold {threshold}"
            )));
        }
        if data_len > MAX_UNCOMPRESSED_LEN {
            return Err(WorldGateError::MalformedPacket(format!(
                "badly compressed packet: size {data_len} exceeds {MAX_UNCOMPRESSED_LEN}"
            )));
        }

        let mut inflated = Vec::with_capacity(data_len);
        ZlibDecoder::new(&frame[..])
            .take(data_len as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(|e| WorldGateError::MalformedPacket(format!("zlib: {e}")))?;
        if inflated.len() != data_len {
            return Err(WorldGateError::MalformedPacket(format!(
                "declared uncompressed length {data_len}, inflated to {}",
                inflated.len()
            )));
        }
        Ok(Bytes::from(inflated))
    }
}

impl Decoder for PacketCodec {
    type Item = RawPacket;
    type Error = WorldGateError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(cipher) = self.cipher.as_mut()
            && self.decrypted < src.len()
        {
            cipher.decrypt(&mut src[self.decrypted..]);
            self.decrypted = src.len();
        }

        let Some((frame_len, prefix_len)) = peek_varint(&src[..], MAX_FRAME_PREFIX_LEN)? else {
            return Ok(None);
        };
        if frame_len <= 0 || frame_len as usize > MAX_FRAME_LEN {
            return Err(WorldGateError::MalformedPacket(format!(
                "frame length {frame_len} outside 1..={MAX_FRAME_LEN}"
            )));
        }
        let frame_len = frame_len as usize;
        let total = prefix_len + frame_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let frame = src.split_to(frame_len).freeze();
        if self.cipher.is_some() {
            self.decrypted -= total;
        }

        let mut body = match self.compression_threshold {
            Some(threshold) => self.inflate(frame, threshold)?,
            None => frame,
        };
        let id = body.read_varint()?;
        Ok(Some(RawPacket { id, body }))
    }
}

impl Encoder<RawPacket> for PacketCodec {
    type Error = WorldGateError;

    fn encode(&mut self, item: RawPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::with_capacity(item.encoded_len());
        body.write_varint(item.id);
        body.extend_from_slice(&item.body);

        let start = dst.len();
        match self.compression_threshold {
            None => {
                check_frame_len(body.len())?;
                dst.write_varint(body.len() as i32);
                dst.extend_from_slice(&body);
            }
            Some(threshold) if body.len() >= threshold => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&body)?;
                let compressed = encoder.finish()?;
                let inner_len = varint_len(body.len() as i32) + compressed.len();
                check_frame_len(inner_len)?;
                dst.write_varint(inner_len as i32);
                dst.write_varint(body.len() as i32);
                dst.extend_from_slice(&compressed);
            }
            Some(_) => {
                check_frame_len(body.len() + 1)?;
                dst.write_varint(body.len() as i32 + 1);
                dst.write_varint(0);
                dst.extend_from_slice(&body);
            }
        }

        if let Some(cipher) = self.cipher.as_mut() {
            cipher.encrypt(&mut dst[start..]);
        }
        Ok(())
    }
}

fn check_frame_len(len: usize) -> Result<(), WorldGateError> {
    if len > MAX_FRAME_LEN {
        return Err(WorldGateError::Internal(format!(
            "outbound packet of {len} bytes exceeds frame limit {MAX_FRAME_LEN}"
        )));
    }
    Ok(())
}
