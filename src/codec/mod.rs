//! MQTT Packet Codec
//!
//! Encoding and decoding for the MQTT v3.1.1 packet subset the bridge uses.

mod decode;
mod encode;


pub use decode::Decoder;
pub use encode::encode;

use crate::protocol::{DecodeError, EncodeError};
use bytes::{BufMut, BytesMut};

/// Maximum remaining length (268,435,455 bytes)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on inbound packets; command payloads are tiny
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024;

/// Read a Variable Byte Integer from buffer
/// Returns (value, bytes_consumed) or error
#[inline]
pub fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut pos = 0;

    loop {
        if pos >= buf.len() {
            return Err(DecodeError::InsufficientData);
        }
        if pos >= 4 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let byte = buf[pos];
        value += ((byte & 0x7F) as u32) * multiplier;
        pos += 1;

        if (byte & 0x80) == 0 {
            break;
        }

        multiplier *= 128;
    }

    Ok((value, pos))
}

/// Write a Variable Byte Integer to buffer
#[inline]
pub fn write_variable_int(buf: &mut BytesMut, mut value: u32) -> Result<(), EncodeError> {
    if value > MAX_REMAINING_LENGTH as u32 {
        return Err(EncodeError::PacketTooLarge);
    }

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    Ok(())
}

/// Read a Two Byte Integer (u16 big-endian)
#[inline]
pub fn read_u16(buf: &[u8]) -> Result<u16, DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Read a UTF-8 encoded string
/// Returns (string, bytes_consumed) or error
#[inline]
pub fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let total_len = 2 + len;

    if buf.len() < total_len {
        return Err(DecodeError::InsufficientData);
    }

    let s = std::str::from_utf8(&buf[2..total_len]).map_err(|_| DecodeError::InvalidUtf8)?;

    // Null characters are forbidden in MQTT strings
    if s.contains('\0') {
        return Err(DecodeError::MalformedPacket(
            "string contains null character",
        ));
    }

    Ok((s, total_len))
}

/// Write a UTF-8 encoded string
#[inline]
pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    let len = s.len();
    if len > 65535 {
        return Err(EncodeError::StringTooLong);
    }
    buf.put_u16(len as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}
