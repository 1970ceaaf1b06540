//! MQTT v3.1.1 packet structures
//!
//! Only the packets exchanged between a subscribing client and a broker are
//! modeled; the bridge never publishes and never unsubscribes.

use bytes::Bytes;

use super::{ConnectReturnCode, QoS, SubscribeReturnCode};

/// An MQTT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// CONNECT - client requests a session
///
/// Authentication is carried by the TLS client certificate, so the optional
/// username/password fields are not modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
}

/// CONNACK - broker accepts or refuses the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

/// PUBLISH - inbound application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present only for QoS > 0
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// PUBACK - QoS 1 acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

/// SUBSCRIBE - request delivery for a single topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filter: String,
    pub qos: QoS,
}

/// SUBACK - broker's answer to SUBSCRIBE, one return code per filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<SubscribeReturnCode>,
}

impl SubAck {
    /// True when any requested filter was refused
    pub fn any_failure(&self) -> bool {
        self.return_codes.iter().any(|c| c.is_failure())
    }
}
