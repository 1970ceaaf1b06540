//! MQTT Protocol definitions
//!
//! Defines the MQTT v3.1.1 types the bridge needs as a subscribing client.

mod error;
mod packet;

pub use error::{DecodeError, EncodeError};
pub use packet::*;

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// CONNACK return codes (MQTT v3.1.1, table 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ConnectReturnCode::Accepted),
            1 => Some(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Some(ConnectReturnCode::IdentifierRejected),
            3 => Some(ConnectReturnCode::ServerUnavailable),
            4 => Some(ConnectReturnCode::BadCredentials),
            5 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ConnectReturnCode::Accepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        write!(f, "{}", msg)
    }
}

/// SUBACK return codes: granted QoS or failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscribeReturnCode {
    GrantedQoS0 = 0x00,
    GrantedQoS1 = 0x01,
    GrantedQoS2 = 0x02,
    Failure = 0x80,
}

impl SubscribeReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(SubscribeReturnCode::GrantedQoS0),
            0x01 => Some(SubscribeReturnCode::GrantedQoS1),
            0x02 => Some(SubscribeReturnCode::GrantedQoS2),
            0x80 => Some(SubscribeReturnCode::Failure),
            _ => None,
        }
    }

    pub fn is_failure(self) -> bool {
        self == SubscribeReturnCode::Failure
    }
}
