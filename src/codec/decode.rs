//! MQTT Packet Decoder
//!
//! Decodes the packets a broker may send to a subscribing client. Packets a
//! client only ever sends (CONNECT, SUBSCRIBE, ...) are rejected as
//! unexpected rather than parsed.

use bytes::Bytes;

use super::{read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, ConnectReturnCode, DecodeError, Packet, PubAck, Publish, QoS, SubAck,
    SubscribeReturnCode,
};

/// MQTT Packet Decoder
pub struct Decoder {
    /// Maximum accepted remaining length
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Decode one packet from the buffer
    /// Returns (packet, bytes_consumed), or None when the buffer holds only
    /// a partial packet
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        // Fixed header
        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;

        // Wait for the complete packet
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload_start = 1 + len_bytes;
        let payload = &buf[payload_start..total_len];

        let packet = match packet_type {
            2 => decode_connack(flags, payload)?,
            3 => decode_publish(flags, payload)?,
            4 => decode_puback(flags, payload)?,
            9 => decode_suback(flags, payload)?,
            13 => {
                if flags != 0 {
                    return Err(DecodeError::InvalidFlags);
                }
                Packet::PingResp
            }
            1 | 8 | 10 | 11 | 12 | 14 => {
                return Err(DecodeError::UnexpectedPacketType(packet_type))
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }
}

fn decode_connack(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    if payload.len() != 2 {
        return Err(DecodeError::MalformedPacket("CONNACK must be 2 bytes"));
    }
    if (payload[0] & 0xFE) != 0 {
        return Err(DecodeError::MalformedPacket("reserved CONNACK flags set"));
    }

    let session_present = (payload[0] & 0x01) != 0;
    let return_code =
        ConnectReturnCode::from_u8(payload[1]).ok_or(DecodeError::InvalidReturnCode(payload[1]))?;

    Ok(Packet::ConnAck(ConnAck {
        session_present,
        return_code,
    }))
}

fn decode_publish(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    let dup = (flags & 0x08) != 0;
    let qos_bits = (flags >> 1) & 0x03;
    let retain = (flags & 0x01) != 0;

    let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

    let mut pos = 0;
    let (topic, len) = read_string(&payload[pos..])?;
    pos += len;

    let packet_id = if qos != QoS::AtMostOnce {
        let id = read_u16(&payload[pos..])?;
        pos += 2;
        if id == 0 {
            return Err(DecodeError::MalformedPacket("zero packet identifier"));
        }
        Some(id)
    } else {
        None
    };

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic: topic.to_string(),
        packet_id,
        payload: Bytes::copy_from_slice(&payload[pos..]),
    }))
}

fn decode_puback(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    if payload.len() != 2 {
        return Err(DecodeError::MalformedPacket("PUBACK must be 2 bytes"));
    }
    Ok(Packet::PubAck(PubAck {
        packet_id: read_u16(payload)?,
    }))
}

fn decode_suback(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    if flags != 0 {
        return Err(DecodeError::InvalidFlags);
    }
    if payload.len() < 3 {
        return Err(DecodeError::MalformedPacket("SUBACK without return code"));
    }

    let packet_id = read_u16(payload)?;
    let return_codes = payload[2..]
        .iter()
        .map(|&b| {
            SubscribeReturnCode::from_u8(b).ok_or(DecodeError::InvalidSubscribeReturnCode(b))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Packet::SubAck(SubAck {
        packet_id,
        return_codes,
    }))
}
