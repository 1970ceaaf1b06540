//! Trust session manager
//!
//! Holds the single mutually-authenticated MQTT session to the broker and
//! feeds lifecycle and message events to the bridge controller over a
//! channel. The initial handshake is fatal on failure; once established, the
//! session reconnects internally with backoff and re-announces itself so the
//! controller can re-subscribe.

mod client;
mod tls;

#[cfg(test)]
mod tests;

pub use client::{Session, SessionConfig, SessionManager};
pub use tls::{client_connector, TlsError, TrustConfig};

use bytes::Bytes;

use crate::protocol::{ConnectReturnCode, DecodeError, EncodeError};

/// Session lifecycle state, observable by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No connection
    Disconnected,
    /// TCP/TLS/MQTT handshake in progress
    Connecting,
    /// Handshake complete, not yet subscribed
    Connected,
    /// Command topic subscription granted
    Subscribed,
    /// Graceful disconnect in progress
    ShuttingDown,
    /// Session ended, handle released
    Closed,
}

/// Events delivered from the network task to the controller.
///
/// Delivery is FIFO in broker order; `Connected` is re-emitted after every
/// reconnect so the subscribe path stays idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed; the controller should (re-)subscribe
    Connected,
    /// The broker refused the subscription; the session stays up
    SubscribeFailed { filter: String },
    /// An application message arrived on a subscribed topic
    Message { topic: String, payload: Bytes },
}

/// Error type for session operations
#[derive(Debug)]
pub enum SessionError {
    /// Invalid session configuration
    Config(String),
    /// Socket-level failure
    Io(std::io::Error),
    /// Connect attempt did not complete in time
    Timeout,
    /// TLS handshake failure
    Handshake(String),
    /// The broker refused the MQTT session
    Refused(ConnectReturnCode),
    /// The broker sent an unparseable packet
    Decode(DecodeError),
    /// A packet could not be encoded
    Encode(EncodeError),
    /// The network task is gone
    ChannelClosed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Config(msg) => write!(f, "session config error: {}", msg),
            SessionError::Io(e) => write!(f, "connection error: {}", e),
            SessionError::Timeout => write!(f, "connect timed out"),
            SessionError::Handshake(msg) => write!(f, "TLS handshake failed: {}", msg),
            SessionError::Refused(code) => write!(f, "broker refused session: {}", code),
            SessionError::Decode(e) => write!(f, "protocol error: {}", e),
            SessionError::Encode(e) => write!(f, "encode error: {}", e),
            SessionError::ChannelClosed => write!(f, "session task ended"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        SessionError::Decode(e)
    }
}

impl From<EncodeError> for SessionError {
    fn from(e: EncodeError) -> Self {
        SessionError::Encode(e)
    }
}
