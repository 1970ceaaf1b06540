//! Broker session client
//!
//! Implements the MQTT client side of the bridge: one mutually-authenticated
//! connection, one subscription, QoS 1 acknowledgement, keepalive, and an
//! internal reconnect loop for drops after the initial connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, warn};

use crate::codec::{encode, Decoder};
use crate::protocol::{Connect, DecodeError, Packet, PubAck, QoS, Subscribe};

use super::{SessionError, SessionEvent, SessionStatus};

type BrokerReader = PacketReader<ReadHalf<TlsStream<TcpStream>>>;
type BrokerWriter = PacketWriter<WriteHalf<TlsStream<TcpStream>>>;

/// Session configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker host name or IP
    pub host: String,
    /// Broker port
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Keepalive interval in seconds (must be at least 1)
    pub keep_alive: u16,
    /// Timeout covering TCP connect, TLS handshake, and CONNACK
    pub connect_timeout: Duration,
    /// Initial reconnect backoff
    pub reconnect_interval: Duration,
    /// Backoff ceiling
    pub max_reconnect_interval: Duration,
}

/// Operations the controller can request from the network task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Subscribe to a topic filter
    Subscribe { filter: String, qos: QoS },
    /// Gracefully disconnect and stop
    Shutdown,
}

/// A configured but not yet connected session
pub struct SessionManager {
    config: SessionConfig,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionManager {
    /// Validate the configuration and build the session object.
    pub fn new(config: SessionConfig, connector: TlsConnector) -> Result<Self, SessionError> {
        if config.host.is_empty() {
            return Err(SessionError::Config("broker host is empty".to_string()));
        }
        if config.port == 0 {
            return Err(SessionError::Config("broker port is zero".to_string()));
        }
        if config.keep_alive == 0 {
            return Err(SessionError::Config(
                "keep alive must be at least 1 second".to_string(),
            ));
        }
        if config.client_id.is_empty() {
            return Err(SessionError::Config("client id is empty".to_string()));
        }

        let server_name = ServerName::try_from(config.host.clone()).map_err(|_| {
            SessionError::Config(format!("invalid broker host name '{}'", config.host))
        })?;

        Ok(Self {
            config,
            connector,
            server_name,
            status: Arc::new(RwLock::new(SessionStatus::Disconnected)),
        })
    }

    /// Establish the initial connection and spawn the network task.
    ///
    /// Failure here is fatal to startup; drops after this point are handled
    /// by the internal reconnect loop.
    pub async fn connect(self) -> Result<Session, SessionError> {
        *self.status.write() = SessionStatus::Connecting;
        let halves = match self.open_stream().await {
            Ok(halves) => halves,
            Err(e) => {
                *self.status.write() = SessionStatus::Disconnected;
                return Err(e);
            }
        };
        *self.status.write() = SessionStatus::Connected;

        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(64);

        // Channel is empty at this point; the send cannot fail
        let _ = event_tx.try_send(SessionEvent::Connected);

        let task = tokio::spawn(self.connection_loop(halves, command_rx, event_tx));

        Ok(Session {
            command_tx,
            events: event_rx,
            task,
        })
    }

    /// TCP connect, TLS handshake, MQTT CONNECT/CONNACK
    async fn open_stream(&self) -> Result<(BrokerReader, BrokerWriter), SessionError> {
        let tcp = timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| SessionError::Timeout)??;

        let tls = timeout(
            self.config.connect_timeout,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| SessionError::Timeout)?
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

        let (mut reader, mut writer) = split_stream(tls);
        timeout(
            self.config.connect_timeout,
            handshake(&mut reader, &mut writer, &self.config),
        )
        .await
        .map_err(|_| SessionError::Timeout)??;

        info!(
            "MQTT: connected to {}:{}",
            self.config.host, self.config.port
        );
        Ok((reader, writer))
    }

    /// Run the session until shutdown, reconnecting across drops
    async fn connection_loop(
        self,
        first: (BrokerReader, BrokerWriter),
        mut command_rx: mpsc::Receiver<SessionCommand>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) {
        let (mut reader, mut writer) = first;
        let mut backoff = self.config.reconnect_interval;
        let mut next_packet_id: u16 = 1;

        loop {
            match serve(
                &mut reader,
                &mut writer,
                &self.config,
                &mut command_rx,
                &event_tx,
                &self.status,
                &mut next_packet_id,
            )
            .await
            {
                Ok(()) => {
                    *self.status.write() = SessionStatus::ShuttingDown;
                    let _ = writer.shutdown().await;
                    *self.status.write() = SessionStatus::Closed;
                    info!("MQTT: session closed");
                    return;
                }
                Err(e) => {
                    error!("MQTT: connection lost: {}", e);
                    *self.status.write() = SessionStatus::Disconnected;
                }
            }

            // Reconnect with backoff. The initial connection already
            // succeeded, so drops here are recoverable.
            loop {
                debug!("MQTT: reconnecting in {:?}", backoff);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    cmd = command_rx.recv() => {
                        match cmd {
                            // Stale while disconnected; the controller
                            // re-subscribes after the next Connected event.
                            Some(SessionCommand::Subscribe { .. }) => {}
                            Some(SessionCommand::Shutdown) | None => {
                                *self.status.write() = SessionStatus::Closed;
                                return;
                            }
                        }
                    }
                }

                *self.status.write() = SessionStatus::Connecting;
                match self.open_stream().await {
                    Ok((r, w)) => {
                        *self.status.write() = SessionStatus::Connected;
                        backoff = self.config.reconnect_interval;
                        if event_tx.send(SessionEvent::Connected).await.is_err() {
                            *self.status.write() = SessionStatus::Closed;
                            return;
                        }
                        reader = r;
                        writer = w;
                        break;
                    }
                    Err(e) => {
                        error!("MQTT: reconnect failed: {}", e);
                        *self.status.write() = SessionStatus::Disconnected;
                        backoff = (backoff * 2).min(self.config.max_reconnect_interval);
                    }
                }
            }
        }
    }
}

/// A live session handle held by the bridge controller
pub struct Session {
    command_tx: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl Session {
    /// Receive the next session event, in broker delivery order.
    /// Returns `None` once the network task has ended.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Request a subscription on the current connection.
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), SessionError> {
        self.command_tx
            .send(SessionCommand::Subscribe {
                filter: filter.to_string(),
                qos,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Gracefully disconnect and wait for the network task to stop.
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        // A serve loop parked on a full event channel never polls the
        // command channel. Closing the receiver fails that pending send, so
        // the loop disconnects on its own even under message backlog.
        self.events.close();
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
        self.task.await.map_err(|_| SessionError::ChannelClosed)
    }
}

/// Split a transport into framed packet halves
pub(crate) fn split_stream<S: AsyncRead + AsyncWrite>(
    stream: S,
) -> (PacketReader<ReadHalf<S>>, PacketWriter<WriteHalf<S>>) {
    let (read_half, write_half) = tokio::io::split(stream);
    (PacketReader::new(read_half), PacketWriter::new(write_half))
}

/// Decoding side of a packet stream
pub(crate) struct PacketReader<R> {
    reader: R,
    decoder: Decoder,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: Decoder::new(),
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub(crate) async fn recv(&mut self) -> Result<Packet, SessionError> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.buf)? {
                self.buf.advance(consumed);
                return Ok(packet);
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(SessionError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by broker",
                )));
            }
        }
    }
}

/// Encoding side of a packet stream
pub(crate) struct PacketWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::new(),
        }
    }

    pub(crate) async fn send(&mut self, packet: &Packet) -> Result<(), SessionError> {
        self.buf.clear();
        encode(packet, &mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Send CONNECT and wait for an accepting CONNACK
pub(crate) async fn handshake<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    writer
        .send(&Packet::Connect(Connect {
            client_id: config.client_id.clone(),
            clean_session: true,
            keep_alive: config.keep_alive,
        }))
        .await?;

    match reader.recv().await? {
        Packet::ConnAck(ack) if ack.return_code.is_accepted() => {
            debug!(
                "MQTT: session established (session_present={})",
                ack.session_present
            );
            Ok(())
        }
        Packet::ConnAck(ack) => Err(SessionError::Refused(ack.return_code)),
        _ => Err(SessionError::Decode(DecodeError::MalformedPacket(
            "expected CONNACK",
        ))),
    }
}

/// Serve one established connection until shutdown (Ok) or a drop (Err)
pub(crate) async fn serve<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    config: &SessionConfig,
    command_rx: &mut mpsc::Receiver<SessionCommand>,
    event_tx: &mpsc::Sender<SessionEvent>,
    status: &Arc<RwLock<SessionStatus>>,
    next_packet_id: &mut u16,
) -> Result<(), SessionError> {
    let mut keepalive = tokio::time::interval(Duration::from_secs(config.keep_alive as u64));
    keepalive.reset();

    // Filter awaiting a SUBACK, keyed by packet id
    let mut pending_sub: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(SessionCommand::Subscribe { filter, qos }) => {
                    let packet_id = bump_packet_id(next_packet_id);
                    debug!("MQTT: subscribing to '{}' at QoS {:?}", filter, qos);
                    pending_sub = Some((packet_id, filter.clone()));
                    writer.send(&Packet::Subscribe(Subscribe { packet_id, filter, qos })).await?;
                }
                Some(SessionCommand::Shutdown) | None => {
                    let _ = writer.send(&Packet::Disconnect).await;
                    return Ok(());
                }
            },

            packet = reader.recv() => match packet? {
                Packet::Publish(publish) => {
                    match publish.qos {
                        QoS::AtLeastOnce => {
                            if let Some(packet_id) = publish.packet_id {
                                writer.send(&Packet::PubAck(PubAck { packet_id })).await?;
                            }
                        }
                        QoS::ExactlyOnce => {
                            // Subscription is QoS 1; the broker must not send this
                            warn!("MQTT: unexpected QoS 2 publish on '{}'", publish.topic);
                        }
                        QoS::AtMostOnce => {}
                    }
                    let event = SessionEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    if event_tx.send(event).await.is_err() {
                        // Controller is gone; stop gracefully
                        let _ = writer.send(&Packet::Disconnect).await;
                        return Ok(());
                    }
                }
                Packet::SubAck(suback) => {
                    let filter = match pending_sub.take() {
                        Some((id, filter)) if id == suback.packet_id => filter,
                        _ => String::new(),
                    };
                    if suback.any_failure() {
                        warn!("MQTT: broker rejected subscription to '{}'", filter);
                        if event_tx
                            .send(SessionEvent::SubscribeFailed { filter })
                            .await
                            .is_err()
                        {
                            let _ = writer.send(&Packet::Disconnect).await;
                            return Ok(());
                        }
                    } else {
                        *status.write() = SessionStatus::Subscribed;
                        debug!("MQTT: subscription granted for '{}'", filter);
                    }
                }
                Packet::PingResp => {
                    debug!("MQTT: PINGRESP received");
                }
                other => {
                    debug!("MQTT: ignoring {:?}", other);
                }
            },

            _ = keepalive.tick() => {
                writer.send(&Packet::PingReq).await?;
            }
        }
    }
}

/// Next non-zero packet identifier
fn bump_packet_id(next: &mut u16) -> u16 {
    let id = *next;
    *next = next.wrapping_add(1);
    if *next == 0 {
        *next = 1;
    }
    id
}
