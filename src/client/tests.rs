use std::time::Duration;

use bytes::BytesMut;
use pretty_assertions::assert_eq;
use tokio::io::{split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::Instant;

use super::*;
use crate::codec::{Decoder, Encoder, FrameReader};
use crate::protocol::{
    Disconnect, EncodeError, Packet, PacketType, ProtocolError, ProtocolVersion, QoS, ReasonCode,
};

/// Broker end of an in-memory connection
struct TestBroker {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    encoder: Encoder,
    decoder: Decoder,
}

impl TestBroker {
    fn pair(version: ProtocolVersion) -> (DuplexStream, Self) {
        let (client_side, broker_side) = tokio::io::duplex(64 * 1024);
        let (read, write) = split(broker_side);
        let broker = Self {
            reader: FrameReader::new(read),
            writer: write,
            encoder: Encoder::new(version),
            decoder: Decoder::new(version),
        };
        (client_side, broker)
    }

    async fn recv(&mut self) -> Packet {
        let frame = self
            .reader
            .read_frame()
            .await
            .expect("read failed")
            .expect("client closed the connection");
        self.decoder
            .decode_frame(frame.header, &frame.body)
            .expect("decode failed")
    }

    async fn send(&mut self, packet: Packet) {
        let mut buf = BytesMut::new();
        self.encoder.encode(&packet, &mut buf).expect("encode failed");
        self.writer.write_all(&buf).await.expect("write failed");
    }

    async fn is_closed(&mut self) -> bool {
        matches!(self.reader.read_frame().await, Ok(None) | Err(_))
    }
}

async fn connect_online(
    client: &Client,
    stream: DuplexStream,
    broker: &mut TestBroker,
    connack: ConnAck,
) -> ConnAck {
    let (result, _) = tokio::join!(client.connect(stream), async {
        match broker.recv().await {
            Packet::Connect(_) => {}
            other => panic!("Expected CONNECT, got {:?}", other),
        }
        broker.send(Packet::ConnAck(connack)).await;
    });
    result.expect("connect failed")
}

#[tokio::test]
async fn test_publish_while_offline_is_not_connected() {
    let (client, _events) = Client::new(ClientOptions::new("c"));

    let err = client
        .publish(Publish::new("t", "x", QoS::AtLeastOnce))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(client.publish_inflight_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_while_offline_is_not_connected() {
    let (client, _events) = Client::new(ClientOptions::new("c"));

    let err = client
        .disconnect(DisconnectOptions::graceful())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_connect_while_connecting_is_invalid_state() {
    let (client, _events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect(stream).await }
    });
    assert!(matches!(broker.recv().await, Packet::Connect(_)));
    assert_eq!(client.state(), ConnectionState::Connecting);

    let (other, _other_broker) = TestBroker::pair(ProtocolVersion::V5);
    let err = client.connect(other).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidState(ConnectionState::Connecting)
    ));

    broker.send(Packet::ConnAck(ConnAck::default())).await;
    pending.await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Online);
}

#[tokio::test]
async fn test_connect_sends_options() {
    let options = ClientOptions::new("sensor")
        .with_keep_alive(30)
        .with_clean_start(false)
        .with_credentials("user", "secret");
    let (client, _events) = Client::new(options);
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect(stream).await }
    });
    let Packet::Connect(connect) = broker.recv().await else {
        panic!("Expected CONNECT");
    };
    assert_eq!(connect.client_id, "sensor");
    assert_eq!(connect.keep_alive, 30);
    assert!(!connect.clean_start);
    assert_eq!(connect.username.as_deref(), Some("user"));
    assert_eq!(connect.password.as_deref(), Some(&b"secret"[..]));

    broker.send(Packet::ConnAck(ConnAck::default())).await;
    pending.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_connack() {
    let mut options = ClientOptions::new("c");
    options.connect_timeout = Duration::from_secs(3);
    let (client, _events) = Client::new(options);
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);

    let start = Instant::now();
    let (result, _) = tokio::join!(client.connect(stream), broker.recv());
    assert!(matches!(result, Err(ClientError::Timeout)));
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(client.state(), ConnectionState::Offline);
    assert!(broker.is_closed().await);
}

#[tokio::test]
async fn test_refused_connack() {
    let (client, mut events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    let connack = ConnAck {
        reason_code: ReasonCode::NotAuthorized,
        ..Default::default()
    };

    let (result, _) = tokio::join!(client.connect(stream), async {
        broker.recv().await;
        broker.send(Packet::ConnAck(connack.clone())).await;
    });
    assert!(matches!(
        result,
        Err(ClientError::ConnectionRefused(ReasonCode::NotAuthorized))
    ));
    assert_eq!(events.recv().await, Some(Event::Connack(connack)));
    assert_eq!(client.state(), ConnectionState::Offline);
}

#[tokio::test]
async fn test_broker_closing_during_connect() {
    let (client, _events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);

    let (result, _) = tokio::join!(client.connect(stream), async move {
        broker.recv().await;
        drop(broker);
    });
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(client.state(), ConnectionState::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_sends_pingreq() {
    let (client, _events) = Client::new(ClientOptions::new("c").with_keep_alive(5));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;

    let start = Instant::now();
    assert_eq!(broker.recv().await, Packet::PingReq);
    assert!(start.elapsed() >= Duration::from_secs(5));

    broker.send(Packet::PingResp).await;
    assert_eq!(broker.recv().await, Packet::PingReq);
    assert_eq!(client.state(), ConnectionState::Online);
}

#[tokio::test(start_paused = true)]
async fn test_server_keep_alive_wins_when_shorter() {
    let (client, _events) = Client::new(ClientOptions::new("c").with_keep_alive(60));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    let mut connack = ConnAck::default();
    connack.properties.server_keep_alive = Some(2);
    connect_online(&client, stream, &mut broker, connack).await;

    let start = Instant::now();
    assert_eq!(broker.recv().await, Packet::PingReq);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_missing_pingresp_closes_connection() {
    let mut options = ClientOptions::new("c").with_keep_alive(5);
    options.pingresp_timeout = Duration::from_secs(2);
    let (client, mut events) = Client::new(options);
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    assert_eq!(broker.recv().await, Packet::PingReq);
    assert_eq!(events.recv().await, Some(Event::Closed));
    assert_eq!(client.state(), ConnectionState::Offline);
    assert!(broker.is_closed().await);
}

#[tokio::test]
async fn test_graceful_disconnect_waits_for_broker_close() {
    let (client, mut events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    let (result, _) = tokio::join!(
        client.disconnect(DisconnectOptions::graceful()),
        async move {
            assert_eq!(broker.recv().await, Packet::Disconnect(Disconnect::default()));
            assert!(broker.is_closed().await);
            drop(broker);
        }
    );
    result.unwrap();
    assert_eq!(client.state(), ConnectionState::Offline);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_timeout_closes_transport() {
    let mut options = ClientOptions::new("c");
    options.disconnect_timeout = Duration::from_secs(4);
    let (client, _events) = Client::new(options);
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;

    let start = Instant::now();
    let (result, packet) = tokio::join!(
        client.disconnect(DisconnectOptions::graceful().with_reason(ReasonCode::DisconnectWithWill)),
        broker.recv()
    );
    result.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(
        packet,
        Packet::Disconnect(Disconnect {
            reason_code: ReasonCode::DisconnectWithWill,
            ..Default::default()
        })
    );
    assert_eq!(client.state(), ConnectionState::Offline);
}

#[tokio::test]
async fn test_force_disconnect_sends_nothing() {
    let (client, _events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;

    client.disconnect(DisconnectOptions::force()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Offline);
    assert!(broker.is_closed().await);
}

#[tokio::test]
async fn test_broker_disconnect_is_reported() {
    let (client, mut events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    let disconnect = Disconnect {
        reason_code: ReasonCode::ServerShuttingDown,
        ..Default::default()
    };
    broker.send(Packet::Disconnect(disconnect.clone())).await;
    assert_eq!(events.recv().await, Some(Event::Disconnect(disconnect)));
    assert!(broker.is_closed().await);
    assert_eq!(client.state(), ConnectionState::Offline);
}

#[tokio::test]
async fn test_auth_requires_v5() {
    let options = ClientOptions::new("c").with_protocol_version(ProtocolVersion::V311);
    let (client, _events) = Client::new(options);

    let err = client.auth(Auth::default()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Protocol(ProtocolError::Encode(EncodeError::UnsupportedPacket(
            PacketType::Auth,
            ProtocolVersion::V311
        )))
    ));
}

#[tokio::test]
async fn test_inbound_topic_alias_is_resolved() {
    let (client, mut events) = Client::new(ClientOptions::new("c").with_topic_alias_maximum(4));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    let mut first = Publish::new("sensors/1", "a", QoS::AtMostOnce);
    first.properties.topic_alias = Some(2);
    let mut second = Publish::new("", "b", QoS::AtMostOnce);
    second.properties.topic_alias = Some(2);
    broker.send(Packet::Publish(first)).await;
    broker.send(Packet::Publish(second)).await;

    for payload in ["a", "b"] {
        let Some(Event::Publish(publish)) = events.recv().await else {
            panic!("Expected PUBLISH event");
        };
        assert_eq!(publish.topic, "sensors/1");
        assert_eq!(&publish.payload[..], payload.as_bytes());
    }
}

#[tokio::test]
async fn test_inbound_alias_above_maximum_closes() {
    let (client, mut events) = Client::new(ClientOptions::new("c").with_topic_alias_maximum(4));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    let mut publish = Publish::new("t", "x", QoS::AtMostOnce);
    publish.properties.topic_alias = Some(5);
    broker.send(Packet::Publish(publish)).await;

    let Packet::Disconnect(disconnect) = broker.recv().await else {
        panic!("Expected DISCONNECT");
    };
    assert_eq!(disconnect.reason_code, ReasonCode::TopicAliasInvalid);
    assert_eq!(events.recv().await, Some(Event::Closed));
    assert_eq!(client.state(), ConnectionState::Offline);
}

#[tokio::test]
async fn test_unexpected_packet_is_protocol_error() {
    let (client, mut events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;
    assert!(matches!(events.recv().await, Some(Event::Connack(_))));

    broker.send(Packet::PingReq).await;
    let Packet::Disconnect(disconnect) = broker.recv().await else {
        panic!("Expected DISCONNECT");
    };
    assert_eq!(disconnect.reason_code, ReasonCode::ProtocolError);
    assert_eq!(events.recv().await, Some(Event::Closed));
}

#[tokio::test]
async fn test_qos0_publish_resolves_once_written() {
    let (client, _events) = Client::new(ClientOptions::new("c"));
    let (stream, mut broker) = TestBroker::pair(ProtocolVersion::V5);
    connect_online(&client, stream, &mut broker, ConnAck::default()).await;

    let result = client
        .publish(Publish::new("t", "x", QoS::AtMostOnce))
        .await
        .unwrap();
    assert_eq!(result.packet_id, None);
    assert_eq!(result.reason_code, ReasonCode::Success);

    let Packet::Publish(publish) = broker.recv().await else {
        panic!("Expected PUBLISH");
    };
    assert_eq!(publish.packet_id, None);
    assert_eq!(client.publish_inflight_count().await.unwrap(), 0);
}
