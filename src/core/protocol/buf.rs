// src/core/protocol/buf.rs

//! Primitive field encoding shared by every packet: VarInts, length-prefixed
//! strings and byte arrays, and fixed-width integers.

use crate::core::WorldGateError;
use bytes::{Buf, BufMut, Bytes};

/// The maximum number of bytes a 32-bit VarInt may occupy.
pub const MAX_VARINT_LEN: usize = 5;

/// Default character limit for strings that carry no tighter bound.
pub const DEFAULT_MAX_STRING_CHARS: usize = 32_767;

/// Reads a VarInt from the front of `bytes` without consuming anything.
///
/// Returns `Ok(None)` when the buffer ends before the VarInt does, and the decoded
/// value together with its encoded length otherwise. `max_len` bounds the number of
/// bytes accepted, which lets the frame decoder reject oversized length prefixes early.
pub fn peek_varint(bytes: &[u8], max_len: usize) -> Result<Option<(i32, usize)>, WorldGateError> {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= max_len {
            return Err(WorldGateError::MalformedPacket(format!(
                "VarInt longer than {max_len} bytes"
            )));
        }
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if bytes.len() >= max_len {
        return Err(WorldGateError::MalformedPacket(format!(
            "VarInt longer than {max_len} bytes"
        )));
    }
    Ok(None)
}

/// Number of bytes `value` occupies when written as a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut value = value as u32;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Read helpers over any `bytes::Buf`. Every method checks `remaining()` first, so a
/// truncated packet becomes a `MalformedPacket` error instead of a panic.
pub trait PacketRead: Buf {
    fn read_varint(&mut self) -> Result<i32, WorldGateError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            if !self.has_remaining() {
                return Err(truncated("VarInt"));
            }
            let byte = self.get_u8();
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(WorldGateError::MalformedPacket(
            "VarInt longer than 5 bytes".to_string(),
        ))
    }

    fn read_u16_be(&mut self) -> Result<u16, WorldGateError> {
        if self.remaining() < 2 {
            return Err(truncated("u16"));
        }
        Ok(self.get_u16())
    }

    fn read_i64_be(&mut self) -> Result<i64, WorldGateError> {
        if self.remaining() < 8 {
            return Err(truncated("i64"));
        }
        Ok(self.get_i64())
    }

    /// Reads a VarInt-prefixed UTF-8 string of at most `max_chars` characters.
    fn read_string(&mut self, max_chars: usize) -> Result<String, WorldGateError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(WorldGateError::MalformedPacket(format!(
                "negative string length {len}"
            )));
        }
        let len = len as usize;
        // A UTF-8 character is at most four bytes.
        if len > max_chars * 4 {
            return Err(WorldGateError::MalformedPacket(format!(
                "string of {len} bytes exceeds limit of {max_chars} characters"
            )));
        }
        if self.remaining() < len {
            return Err(truncated("string"));
        }
        let raw = self.copy_to_bytes(len);
        let s = String::from_utf8(raw.to_vec())?;
        if s.chars().count() > max_chars {
            return Err(WorldGateError::MalformedPacket(format!(
                "string exceeds limit of {max_chars} characters"
            )));
        }
        Ok(s)
    }

    /// Reads a VarInt-prefixed byte array of at most `max_len` bytes.
    fn read_byte_array(&mut self, max_len: usize) -> Result<Bytes, WorldGateError> {
        let len = self.read_varint()?;
        if len < 0 || len as usize > max_len {
            return Err(WorldGateError::MalformedPacket(format!(
                "byte array length {len} outside 0..={max_len}"
            )));
        }
        let len = len as usize;
        if self.remaining() < len {
            return Err(truncated("byte array"));
        }
        Ok(self.copy_to_bytes(len))
    }
}

impl<B: Buf + ?Sized> PacketRead for B {}

/// Write helpers mirroring `PacketRead`.
pub trait PacketWrite: BufMut {
    fn write_varint(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            if value & !0x7F == 0 {
                self.put_u8(value as u8);
                return;
            }
            self.put_u8(((value & 0x7F) | 0x80) as u8);
            value >>= 7;
        }
    }

    fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn write_byte_array(&mut self, value: &[u8]) {
        self.write_varint(value.len() as i32);
        self.put_slice(value);
    }
}

impl<B: BufMut + ?Sized> PacketWrite for B {}

fn truncated(what: &str) -> WorldGateError {
    WorldGateError::MalformedPacket(format!("packet ended while reading {what}"))
}
