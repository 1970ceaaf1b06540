//! Session Tests
//!
//! Drive the handshake and serve loops over in-memory duplex streams with a
//! scripted broker on the far end.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::codec::encode;
use crate::protocol::{
    ConnAck, ConnectReturnCode, Packet, Publish, QoS, SubAck, SubscribeReturnCode,
};

use super::client::{handshake, serve, split_stream, SessionCommand};
use super::{SessionConfig, SessionError, SessionEvent, SessionManager, SessionStatus};

fn test_config() -> SessionConfig {
    SessionConfig {
        host: "broker.test".to_string(),
        port: 8883,
        client_id: "canbridge-test".to_string(),
        keep_alive: 60,
        connect_timeout: Duration::from_secs(5),
        reconnect_interval: Duration::from_secs(1),
        max_reconnect_interval: Duration::from_secs(4),
    }
}

fn encode_to_vec(packet: &Packet) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode(packet, &mut buf).unwrap();
    buf.to_vec()
}

fn anonymous_connector() -> TlsConnector {
    // Construction-path tests never perform a handshake
    let config = ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn manager_rejects_empty_host() {
    let config = SessionConfig {
        host: String::new(),
        ..test_config()
    };
    match SessionManager::new(config, anonymous_connector()) {
        Err(SessionError::Config(msg)) => assert!(msg.contains("host")),
        other => panic!("expected config error, got {:?}", other.err()),
    }
}

#[test]
fn manager_rejects_zero_keep_alive() {
    let config = SessionConfig {
        keep_alive: 0,
        ..test_config()
    };
    assert!(SessionManager::new(config, anonymous_connector()).is_err());
}

#[test]
fn manager_accepts_ip_hosts() {
    let config = SessionConfig {
        host: "192.168.7.2".to_string(),
        ..test_config()
    };
    assert!(SessionManager::new(config, anonymous_connector()).is_ok());
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn handshake_completes_on_accepting_connack() {
    let (client_io, mut broker) = tokio::io::duplex(1024);

    let broker_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 256];
        let n = broker.read(&mut buf).await.unwrap();
        // CONNECT with protocol name MQTT, level 4
        assert_eq!(buf[0], 0x10);
        assert_eq!(&buf[2..9], &[0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04]);
        assert!(n > 10);

        let connack = encode_to_vec(&Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }));
        broker.write_all(&connack).await.unwrap();
        broker
    });

    let (mut reader, mut writer) = split_stream(client_io);
    handshake(&mut reader, &mut writer, &test_config())
        .await
        .unwrap();
    broker_task.await.unwrap();
}

#[tokio::test]
async fn handshake_propagates_refusal() {
    let (client_io, mut broker) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        let mut buf = vec![0u8; 256];
        let _ = broker.read(&mut buf).await.unwrap();
        let connack = encode_to_vec(&Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }));
        broker.write_all(&connack).await.unwrap();
        // Keep the stream open so the client sees the refusal, not EOF
        broker
    });

    let (mut reader, mut writer) = split_stream(client_io);
    match handshake(&mut reader, &mut writer, &test_config()).await {
        Err(SessionError::Refused(code)) => {
            assert_eq!(code, ConnectReturnCode::NotAuthorized);
        }
        other => panic!("expected refusal, got {:?}", other.err()),
    }
}

// =============================================================================
// Serve loop
// =============================================================================

struct ServeHarness {
    command_tx: mpsc::Sender<SessionCommand>,
    event_rx: mpsc::Receiver<SessionEvent>,
    status: Arc<RwLock<SessionStatus>>,
    task: tokio::task::JoinHandle<Result<(), SessionError>>,
}

fn spawn_serve(client_io: tokio::io::DuplexStream) -> ServeHarness {
    let (command_tx, mut command_rx) = mpsc::channel(8);
    let (event_tx, event_rx) = mpsc::channel(8);
    let status = Arc::new(RwLock::new(SessionStatus::Connected));
    let status_inner = status.clone();

    let task = tokio::spawn(async move {
        let (mut reader, mut writer) = split_stream(client_io);
        let mut next_packet_id = 1u16;
        serve(
            &mut reader,
            &mut writer,
            &test_config(),
            &mut command_rx,
            &event_tx,
            &status_inner,
            &mut next_packet_id,
        )
        .await
    });

    ServeHarness {
        command_tx,
        event_rx,
        status,
        task,
    }
}

#[tokio::test]
async fn serve_delivers_publish_and_acks() {
    let (client_io, mut broker) = tokio::io::duplex(1024);
    let mut harness = spawn_serve(client_io);

    // Broker pushes a QoS 1 publish
    let publish = encode_to_vec(&Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "status/door".to_string(),
        packet_id: Some(7),
        payload: Bytes::from_static(b"lock"),
    }));
    broker.write_all(&publish).await.unwrap();

    // The controller sees the message unmodified
    match harness.event_rx.recv().await {
        Some(SessionEvent::Message { topic, payload }) => {
            assert_eq!(topic, "status/door");
            assert_eq!(payload.as_ref(), b"lock");
        }
        other => panic!("expected message event, got {:?}", other),
    }

    // The broker receives the PUBACK for packet 7
    let mut ack = [0u8; 4];
    broker.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x40, 0x02, 0x00, 0x07]);

    // Shutdown ends the loop with a DISCONNECT on the wire
    harness
        .command_tx
        .send(SessionCommand::Shutdown)
        .await
        .unwrap();
    let mut fin = [0u8; 2];
    broker.read_exact(&mut fin).await.unwrap();
    assert_eq!(fin, [0xE0, 0x00]);

    assert!(harness.task.await.unwrap().is_ok());
    // No events after shutdown
    assert_eq!(harness.event_rx.recv().await, None);
}

#[tokio::test]
async fn serve_marks_status_subscribed_on_grant() {
    let (client_io, mut broker) = tokio::io::duplex(1024);
    let harness = spawn_serve(client_io);

    harness
        .command_tx
        .send(SessionCommand::Subscribe {
            filter: "status/door".to_string(),
            qos: QoS::AtLeastOnce,
        })
        .await
        .unwrap();

    // SUBSCRIBE: fixed header (2) + packet id (2) + filter (13) + qos (1)
    let mut sub = [0u8; 18];
    broker.read_exact(&mut sub).await.unwrap();
    assert_eq!(sub[0], 0x82);
    assert_eq!(&sub[2..4], &[0x00, 0x01]);

    let suback = encode_to_vec(&Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: vec![SubscribeReturnCode::GrantedQoS1],
    }));
    broker.write_all(&suback).await.unwrap();

    // Grant flips the status without emitting an event
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if *harness.status.read() == SessionStatus::Subscribed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status never became Subscribed");

    let _ = harness.command_tx.send(SessionCommand::Shutdown).await;
    let _ = harness.task.await;
}

#[tokio::test]
async fn serve_reports_subscribe_rejection() {
    let (client_io, mut broker) = tokio::io::duplex(1024);
    let mut harness = spawn_serve(client_io);

    harness
        .command_tx
        .send(SessionCommand::Subscribe {
            filter: "status/door".to_string(),
            qos: QoS::AtLeastOnce,
        })
        .await
        .unwrap();

    let mut sub = [0u8; 18];
    broker.read_exact(&mut sub).await.unwrap();

    let suback = encode_to_vec(&Packet::SubAck(SubAck {
        packet_id: 1,
        return_codes: vec![SubscribeReturnCode::Failure],
    }));
    broker.write_all(&suback).await.unwrap();

    // Rejection is an event, not an error; the loop keeps running
    match harness.event_rx.recv().await {
        Some(SessionEvent::SubscribeFailed { filter }) => {
            assert_eq!(filter, "status/door");
        }
        other => panic!("expected subscribe failure event, got {:?}", other),
    }
    assert!(!harness.task.is_finished());

    let _ = harness.command_tx.send(SessionCommand::Shutdown).await;
    let _ = harness.task.await;
}

#[tokio::test]
async fn serve_unblocks_when_event_receiver_closes() {
    let (client_io, mut broker) = tokio::io::duplex(4096);
    let mut harness = spawn_serve(client_io);

    // Push more QoS 1 publishes than the event channel holds while nothing
    // reads it, parking the loop on the event send
    for id in 1..=10u16 {
        let publish = encode_to_vec(&Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "status/door".to_string(),
            packet_id: Some(id),
            payload: Bytes::from_static(b"lock"),
        }));
        broker.write_all(&publish).await.unwrap();
    }

    // The command goes unobserved until the receiver goes away; closing it
    // fails the pending event send and lets the loop disconnect
    harness
        .command_tx
        .send(SessionCommand::Shutdown)
        .await
        .unwrap();
    harness.event_rx.close();

    let result = tokio::time::timeout(Duration::from_secs(2), harness.task)
        .await
        .expect("serve loop stayed parked after the receiver closed");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn serve_errors_when_broker_closes() {
    let (client_io, broker) = tokio::io::duplex(1024);
    let harness = spawn_serve(client_io);

    drop(broker);

    match harness.task.await.unwrap() {
        Err(SessionError::Io(_)) => {}
        other => panic!("expected IO error, got {:?}", other),
    }
}
