//! CAN bus channel
//!
//! Owns the single SocketCAN handle the bridge writes command frames to.
//! The channel is write-only; the bridge has no frame reception path.

use std::fmt;
use std::io;

use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Socket, StandardId};
use tracing::debug;

use crate::command::BusCommand;

/// Standard 11-bit identifier of the command channel
pub const COMMAND_CAN_ID: u16 = 0x200;

/// Error type for CAN channel operations
#[derive(Debug)]
pub enum CanError {
    /// The interface could not be resolved or bound
    Open { interface: String, source: io::Error },
    /// A frame could not be constructed for the command channel
    InvalidFrame,
    /// The kernel rejected the frame write
    Write(io::Error),
}

impl fmt::Display for CanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanError::Open { interface, source } => {
                write!(f, "failed to open CAN interface '{}': {}", interface, source)
            }
            CanError::InvalidFrame => write!(f, "invalid command frame"),
            CanError::Write(e) => write!(f, "CAN frame write failed: {}", e),
        }
    }
}

impl std::error::Error for CanError {}

/// Sink for recognized commands; the seam between the controller and the bus
pub trait FrameSink: Send + Sync {
    /// Emit one command frame. A frame is either written whole or not at all.
    fn send(&self, command: BusCommand) -> Result<(), CanError>;
}

/// Build the fixed-format frame for a command: ID 0x200, DLC 1, one code byte.
///
/// A fresh frame is constructed per call; nothing is shared between sends.
pub fn command_frame(command: BusCommand) -> Result<CanFrame, CanError> {
    let id = StandardId::new(COMMAND_CAN_ID).ok_or(CanError::InvalidFrame)?;
    CanFrame::new(id, &[command.code()]).ok_or(CanError::InvalidFrame)
}

/// Write-only channel over one bound SocketCAN interface
pub struct CanChannel {
    interface: String,
    // The frame write is a single syscall; the lock keeps sends whole if
    // callers ever run concurrently.
    socket: Mutex<CanSocket>,
}

impl CanChannel {
    /// Resolve and bind the named interface.
    pub fn open(interface: &str) -> Result<Self, CanError> {
        let socket = CanSocket::open(interface).map_err(|e| CanError::Open {
            interface: interface.to_string(),
            source: e,
        })?;
        Ok(Self {
            interface: interface.to_string(),
            socket: Mutex::new(socket),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl FrameSink for CanChannel {
    fn send(&self, command: BusCommand) -> Result<(), CanError> {
        let frame = command_frame(command)?;
        self.socket
            .lock()
            .write_frame(&frame)
            .map_err(CanError::Write)
    }
}

impl Drop for CanChannel {
    fn drop(&mut self) {
        debug!("CAN: closed interface {}", self.interface);
    }
}

#[cfg(test)]
mod tests {
    use socketcan::Frame;

    use super::*;

    #[test]
    fn command_frame_wire_format() {
        let lock = command_frame(BusCommand::Lock).unwrap();
        assert_eq!(lock.raw_id(), COMMAND_CAN_ID as u32);
        assert_eq!(lock.data(), &[0x30]);

        let unlock = command_frame(BusCommand::Unlock).unwrap();
        assert_eq!(unlock.raw_id(), COMMAND_CAN_ID as u32);
        assert_eq!(unlock.data(), &[0x31]);
    }

    #[test]
    fn command_frames_are_independent() {
        // Two sends of the same command build two identical fresh frames
        let a = command_frame(BusCommand::Lock).unwrap();
        let b = command_frame(BusCommand::Lock).unwrap();
        assert_eq!(a.raw_id(), b.raw_id());
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn open_unknown_interface_fails() {
        match CanChannel::open("canbridge-test-noif0") {
            Err(CanError::Open { interface, .. }) => {
                assert_eq!(interface, "canbridge-test-noif0")
            }
            Err(other) => panic!("expected open error, got {:?}", other),
            Ok(_) => panic!("expected open to fail"),
        }
    }
}
