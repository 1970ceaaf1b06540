//! Bridge controller
//!
//! Drives the message path: session events in, command frames out. The
//! controller owns the subscription lifecycle (subscribe on every
//! `Connected`, so reconnects re-arm it), decodes payloads, and writes
//! exactly one CAN frame per recognized command. Unrecognized payloads are
//! logged and dropped; CAN write failures are logged and absorbed so a bus
//! fault never takes the session down.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::can::FrameSink;
use crate::command::BusCommand;
use crate::protocol::QoS;
use crate::session::{Session, SessionError, SessionEvent};


/// The one topic filter the bridge subscribes to
pub const COMMAND_TOPIC: &str = "status/door";

/// What became of one received payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Empty payload, silently dropped
    Ignored,
    /// Recognized command, frame written
    Sent(BusCommand),
    /// Payload did not decode to a command
    Unrecognized,
    /// Recognized command, but the frame write failed
    SendFailed(BusCommand),
}

/// Decode one payload and emit the frame if it names a command
pub(crate) fn dispatch<B: FrameSink>(bus: &B, topic: &str, payload: &[u8]) -> Dispatch {
    if payload.is_empty() {
        return Dispatch::Ignored;
    }

    // Payloads are expected to be ASCII; lossy conversion keeps junk bytes
    // from panicking the loop and they fail the decode anyway
    let text = String::from_utf8_lossy(payload);
    let token = text.trim();

    match BusCommand::decode(token) {
        Some(command) => match bus.send(command) {
            Ok(()) => {
                info!("CAN: sent {} (0x{:02X})", command, command.code());
                Dispatch::Sent(command)
            }
            Err(e) => {
                error!("CAN: failed to send {}: {}", command, e);
                Dispatch::SendFailed(command)
            }
        },
        None => {
            warn!("MQTT: unrecognized command on '{}': '{}'", topic, token);
            Dispatch::Unrecognized
        }
    }
}

/// Handle used to request a cooperative shutdown of the controller
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent; later calls are no-ops.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// The controller owning the session and the bus for the life of the process
pub struct BridgeController<B: FrameSink> {
    bus: B,
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

impl<B: FrameSink> BridgeController<B> {
    pub fn new(bus: B, session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bus,
            session,
            shutdown_tx,
        }
    }

    /// Handle for signal tasks to request shutdown
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run until shutdown is requested or the session ends.
    ///
    /// Returns `Ok` on a clean shutdown and `Err` if the session task died
    /// without one being requested.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, closing session");
                    break;
                }

                event = self.session.recv() => match event {
                    Some(SessionEvent::Connected) => {
                        debug!("MQTT: session up, subscribing to '{}'", COMMAND_TOPIC);
                        if let Err(e) = self
                            .session
                            .subscribe(COMMAND_TOPIC, QoS::AtLeastOnce)
                            .await
                        {
                            error!("MQTT: subscribe request failed: {}", e);
                        }
                    }
                    Some(SessionEvent::SubscribeFailed { filter }) => {
                        // The session stays up; the next reconnect retries
                        error!("MQTT: broker refused subscription to '{}'", filter);
                    }
                    Some(SessionEvent::Message { topic, payload }) => {
                        dispatch(&self.bus, &topic, &payload);
                    }
                    None => {
                        return Err(SessionError::ChannelClosed);
                    }
                },
            }
        }

        self.session.shutdown().await?;
        Ok(())
    }
}
