//! canbridge - Secure MQTT-to-CAN command bridge
//!
//! Subscribes to a door command topic over a mutually-authenticated MQTT
//! session and translates recognized commands into fixed-format CAN frames
//! on a SocketCAN interface.

pub mod bridge;
pub mod can;
pub mod codec;
pub mod command;
pub mod config;
pub mod protocol;
pub mod session;

pub use bridge::{BridgeController, ShutdownHandle, COMMAND_TOPIC};
pub use can::{CanChannel, CanError, FrameSink, COMMAND_CAN_ID};
pub use command::BusCommand;
pub use config::Config;
pub use protocol::QoS;
pub use session::{
    client_connector, Session, SessionConfig, SessionError, SessionEvent, SessionManager,
    TlsError, TrustConfig,
};
