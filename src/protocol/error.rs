//! Protocol error types

use std::fmt;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Invalid packet type
    InvalidPacketType(u8),
    /// Packet type a broker must not send to a client
    UnexpectedPacketType(u8),
    /// Invalid remaining length encoding
    InvalidRemainingLength,
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Invalid packet flags
    InvalidFlags,
    /// Invalid CONNACK return code
    InvalidReturnCode(u8),
    /// Invalid SUBACK return code
    InvalidSubscribeReturnCode(u8),
    /// Malformed packet
    MalformedPacket(&'static str),
    /// Packet too large
    PacketTooLarge,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::UnexpectedPacketType(t) => write!(f, "unexpected packet type from broker: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::InvalidReturnCode(c) => write!(f, "invalid CONNACK return code: {}", c),
            Self::InvalidSubscribeReturnCode(c) => {
                write!(f, "invalid SUBACK return code: 0x{:02X}", c)
            }
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Self::PacketTooLarge => write!(f, "packet too large"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large
    PacketTooLarge,
    /// String too long
    StringTooLong,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
        }
    }
}

impl std::error::Error for EncodeError {}
