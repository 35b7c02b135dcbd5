//! Codec tests
//!
//! Round trips for every packet type under both protocol versions, plus
//! byte-level checks of the rules that are easy to get subtly wrong.

#![allow(clippy::field_reassign_with_default)]

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use test_case::test_case;

use super::{read_variable_int, variable_int_len, write_variable_int, Decoder, Encoder, Reader};
use crate::protocol::{
    Auth, ConnAck, Connect, DecodeError, Disconnect, EncodeError, Packet, PacketType, Properties,
    ProtocolVersion, PubAck, PubComp, PubRec, PubRel, Publish, QoS, ReasonCode, RetainHandling,
    SubAck, Subscribe, Subscription, SubscriptionOptions, UnsubAck, Unsubscribe, Will,
};

// ============================================================================
// Helpers
// ============================================================================

fn encode_packet(packet: &Packet, version: ProtocolVersion) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new(version).encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8], version: ProtocolVersion) -> Result<Packet, DecodeError> {
    let mut decoder = Decoder::new(version);
    match decoder.decode(buf)? {
        Some((packet, consumed)) => {
            assert_eq!(consumed, buf.len(), "decoder left trailing bytes");
            Ok(packet)
        }
        None => Err(DecodeError::InsufficientData),
    }
}

fn round_trip(packet: Packet, version: ProtocolVersion) {
    let encoded = encode_packet(&packet, version);
    assert_eq!(decode_packet(&encoded, version).unwrap(), packet);
}

// ============================================================================
// Variable byte integer
// ============================================================================

#[test_case(0, &[0x00] ; "zero")]
#[test_case(1, &[0x01] ; "one")]
#[test_case(127, &[0x7F] ; "one byte max")]
#[test_case(128, &[0x80, 0x01] ; "two byte min")]
#[test_case(16_383, &[0xFF, 0x7F] ; "two byte max")]
#[test_case(16_384, &[0x80, 0x80, 0x01] ; "three byte min")]
#[test_case(2_097_151, &[0xFF, 0xFF, 0x7F] ; "three byte max")]
#[test_case(2_097_152, &[0x80, 0x80, 0x80, 0x01] ; "four byte min")]
#[test_case(268_435_455, &[0xFF, 0xFF, 0xFF, 0x7F] ; "four byte max")]
fn test_variable_int_boundaries(value: u32, expected: &[u8]) {
    let mut buf = BytesMut::new();
    assert_eq!(write_variable_int(&mut buf, value).unwrap(), expected.len());
    assert_eq!(&buf[..], expected);
    assert_eq!(variable_int_len(value), expected.len());
    assert_eq!(read_variable_int(&buf).unwrap(), (value, expected.len()));
}

#[test]
fn test_variable_int_too_large() {
    let mut buf = BytesMut::new();
    assert_eq!(
        write_variable_int(&mut buf, 268_435_456),
        Err(EncodeError::VariableIntTooLarge(268_435_456))
    );
    assert!(buf.is_empty());
}

#[test]
fn test_variable_int_five_byte_run() {
    assert_eq!(
        read_variable_int(&[0x80, 0x80, 0x80, 0x80, 0x01]),
        Err(DecodeError::MalformedVariableInt)
    );
    // four continuation bytes are already enough to know
    assert_eq!(
        read_variable_int(&[0xFF, 0xFF, 0xFF, 0xFF]),
        Err(DecodeError::MalformedVariableInt)
    );
    assert_eq!(
        read_variable_int(&[0xFF, 0xFF]),
        Err(DecodeError::InsufficientData)
    );
}

proptest! {
    #[test]
    fn prop_variable_int_consumes_what_it_wrote(value in 0u32..=268_435_455, tail in any::<u8>()) {
        let mut buf = BytesMut::new();
        let written = write_variable_int(&mut buf, value).unwrap();
        buf.extend_from_slice(&[tail]);
        prop_assert_eq!(read_variable_int(&buf).unwrap(), (value, written));
    }
}

// ============================================================================
// Primitive reader
// ============================================================================

#[test]
fn test_reader_four_byte_integer() {
    let mut r = Reader::new(&[0x12, 0x34, 0x56, 0x78]);
    assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
    assert!(r.is_empty());
}

#[test]
fn test_reader_rejects_null_character() {
    let mut r = Reader::new(&[0x00, 0x03, b'a', 0x00, b'b']);
    assert!(matches!(
        r.read_string(),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_reader_rejects_invalid_utf8() {
    let mut r = Reader::new(&[0x00, 0x02, 0xC3, 0x28]);
    assert_eq!(r.read_string(), Err(DecodeError::InvalidUtf8));
}

#[test]
fn test_reader_short_binary_leaves_position() {
    let mut r = Reader::new(&[0x00, 0x05, 0x01]);
    assert_eq!(r.read_binary(), Err(DecodeError::InsufficientData));
    assert_eq!(r.position(), 0);
}

// ============================================================================
// CONNECT / CONNACK
// ============================================================================

#[test]
fn test_connect_v311_full() {
    round_trip(
        Packet::Connect(Box::new(Connect {
            protocol_version: ProtocolVersion::V311,
            client_id: "sensor-12".to_string(),
            clean_start: false,
            keep_alive: 300,
            username: Some("user".to_string()),
            password: Some(Bytes::from("secret")),
            will: Some(Will {
                topic: "sensors/12/status".to_string(),
                payload: Bytes::from("offline"),
                qos: QoS::AtLeastOnce,
                retain: true,
                properties: Properties::default(),
            }),
            properties: Properties::default(),
        })),
        ProtocolVersion::V311,
    );
}

#[test]
fn test_connect_v5_with_properties_and_will() {
    let mut props = Properties::default();
    props.session_expiry_interval = Some(3600);
    props.receive_maximum = Some(20);
    props.topic_alias_maximum = Some(10);
    props.authentication_method = Some("SCRAM-SHA-1".to_string());

    let mut will_props = Properties::default();
    will_props.will_delay_interval = Some(30);
    will_props.content_type = Some("text/plain".to_string());

    round_trip(
        Packet::Connect(Box::new(Connect {
            protocol_version: ProtocolVersion::V5,
            client_id: "client-v5".to_string(),
            clean_start: true,
            keep_alive: 120,
            username: None,
            password: None,
            will: Some(Will {
                topic: "status".to_string(),
                payload: Bytes::from("gone"),
                qos: QoS::ExactlyOnce,
                retain: false,
                properties: will_props,
            }),
            properties: props,
        })),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_connect_v311_bytes() {
    let packet = Packet::Connect(Box::new(Connect {
        protocol_version: ProtocolVersion::V311,
        client_id: "a".to_string(),
        keep_alive: 60,
        ..Default::default()
    }));
    let encoded = encode_packet(&packet, ProtocolVersion::V311);
    assert_eq!(
        &encoded[..],
        &[
            0x10, 0x0D, // CONNECT, remaining length 13
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // level 4
            0x02, // clean session
            0x00, 0x3C, // keep alive 60
            0x00, 0x01, b'a', // client id
        ]
    );
}

#[test]
fn test_connect_level_does_not_change_decoder_version() {
    let v311_connect = [
        0x10, 0x0D, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x01, b'a',
    ];
    let mut decoder = Decoder::new(ProtocolVersion::V5);
    let (packet, _) = decoder.decode(&v311_connect).unwrap().unwrap();
    let Packet::Connect(connect) = packet else {
        panic!("expected CONNECT");
    };
    assert_eq!(connect.protocol_version, ProtocolVersion::V311);
    assert_eq!(decoder.protocol_version(), ProtocolVersion::V5);

    // v5 PUBACK reason code still honoured afterwards
    let (packet, _) = decoder.decode(&[0x40, 0x03, 0x00, 0x01, 0x87]).unwrap().unwrap();
    assert_eq!(
        packet,
        Packet::PubAck(PubAck::with_reason(1, ReasonCode::NotAuthorized))
    );
}

#[test]
fn test_connect_invalid_protocol_version() {
    let invalid = [
        0x10, 0x0C, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x06, 0x02, 0x00, 0x3C, 0x00, 0x00,
    ];
    assert_eq!(
        decode_packet(&invalid, ProtocolVersion::V5),
        Err(DecodeError::InvalidProtocolVersion(6))
    );
}

#[test]
fn test_connack_v5_with_properties() {
    let mut props = Properties::default();
    props.assigned_client_identifier = Some("auto-1f3a".to_string());
    props.server_keep_alive = Some(30);
    props.topic_alias_maximum = Some(5);
    props.reason_string = Some("welcome".to_string());

    round_trip(
        Packet::ConnAck(ConnAck {
            session_present: true,
            reason_code: ReasonCode::Success,
            properties: props,
        }),
        ProtocolVersion::V5,
    );
}

#[test_case(0x00, ReasonCode::Success ; "accepted")]
#[test_case(0x01, ReasonCode::UnsupportedProtocolVersion ; "bad version")]
#[test_case(0x02, ReasonCode::ClientIdNotValid ; "identifier rejected")]
#[test_case(0x03, ReasonCode::ServerUnavailable ; "server unavailable")]
#[test_case(0x04, ReasonCode::BadUserNameOrPassword ; "bad credentials")]
#[test_case(0x05, ReasonCode::NotAuthorized ; "not authorized")]
fn test_connack_v311_return_codes(code: u8, expected: ReasonCode) {
    let decoded = decode_packet(&[0x20, 0x02, 0x00, code], ProtocolVersion::V311).unwrap();
    assert_eq!(
        decoded,
        Packet::ConnAck(ConnAck {
            session_present: false,
            reason_code: expected,
            properties: Properties::default(),
        })
    );
    assert_eq!(&encode_packet(&decoded, ProtocolVersion::V311)[..], &[0x20, 0x02, 0x00, code]);
}

#[test]
fn test_connack_reserved_flags() {
    assert_eq!(
        decode_packet(&[0x20, 0x02, 0x02, 0x00], ProtocolVersion::V311),
        Err(DecodeError::InvalidFlags)
    );
}

// ============================================================================
// PUBLISH
// ============================================================================

#[test_case(QoS::AtMostOnce, None ; "qos0")]
#[test_case(QoS::AtLeastOnce, Some(1) ; "qos1")]
#[test_case(QoS::ExactlyOnce, Some(65535) ; "qos2")]
fn test_publish_round_trip_both_versions(qos: QoS, packet_id: Option<u16>) {
    let publish = Publish {
        dup: packet_id.is_some(),
        qos,
        retain: true,
        topic: "a/b/c".to_string(),
        packet_id,
        payload: Bytes::from_static(b"payload"),
        properties: Properties::default(),
    };
    round_trip(Packet::Publish(publish.clone()), ProtocolVersion::V311);
    round_trip(Packet::Publish(publish), ProtocolVersion::V5);
}

#[test]
fn test_publish_v5_with_alias_and_empty_topic() {
    let mut props = Properties::default();
    props.topic_alias = Some(3);
    props.user_properties = vec![("k".into(), "v".into()), ("k".into(), "w".into())];
    props.correlation_data = Some(Bytes::from_static(&[1, 2, 3]));

    round_trip(
        Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: String::new(),
            packet_id: Some(9),
            payload: Bytes::from_static(b"x"),
            properties: props,
            ..Default::default()
        }),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_publish_qos0_bytes_v311() {
    let packet = Packet::Publish(Publish::new("t", "hi", QoS::AtMostOnce));
    assert_eq!(
        &encode_packet(&packet, ProtocolVersion::V311)[..],
        &[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i']
    );
}

#[test]
fn test_publish_qos_without_packet_id_fails() {
    let packet = Packet::Publish(Publish::new("t", "hi", QoS::AtLeastOnce));
    let mut buf = BytesMut::new();
    assert_eq!(
        Encoder::new(ProtocolVersion::V5).encode(&packet, &mut buf),
        Err(EncodeError::PacketIdMismatch)
    );
}

#[test]
fn test_publish_dup_must_be_zero_for_qos0() {
    assert!(matches!(
        decode_packet(&[0x38, 0x03, 0x00, 0x01, b't'], ProtocolVersion::V311),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_qos3_invalid() {
    assert_eq!(
        decode_packet(&[0x36, 0x05, 0x00, 0x01, b't', 0x00, 0x01], ProtocolVersion::V311),
        Err(DecodeError::InvalidQoS(3))
    );
}

#[test]
fn test_publish_packet_id_zero_invalid() {
    assert!(matches!(
        decode_packet(&[0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00], ProtocolVersion::V311),
        Err(DecodeError::MalformedPacket(_))
    ));
}

// ============================================================================
// PUBACK / PUBREC / PUBREL / PUBCOMP
// ============================================================================

#[test]
fn test_ack_success_omits_reason_and_properties() {
    for packet in [
        Packet::PubAck(PubAck::new(10)),
        Packet::PubRec(PubRec::new(10)),
        Packet::PubComp(PubComp::new(10)),
    ] {
        let encoded = encode_packet(&packet, ProtocolVersion::V5);
        assert_eq!(encoded.len(), 4);
        assert_eq!(&encoded[1..], &[0x02, 0x00, 0x0A]);
        assert_eq!(decode_packet(&encoded, ProtocolVersion::V5).unwrap(), packet);
    }
}

#[test]
fn test_pubrel_uses_fixed_flags() {
    let encoded = encode_packet(&Packet::PubRel(PubRel::new(1)), ProtocolVersion::V311);
    assert_eq!(&encoded[..], &[0x62, 0x02, 0x00, 0x01]);

    assert_eq!(
        decode_packet(&[0x60, 0x02, 0x00, 0x01], ProtocolVersion::V311),
        Err(DecodeError::InvalidFlags)
    );
}

#[test]
fn test_ack_reason_without_properties() {
    let encoded = encode_packet(
        &Packet::PubRec(PubRec::with_reason(4, ReasonCode::PacketIdNotFound)),
        ProtocolVersion::V5,
    );
    assert_eq!(&encoded[..], &[0x50, 0x03, 0x00, 0x04, 0x92]);
    assert_eq!(
        decode_packet(&encoded, ProtocolVersion::V5).unwrap(),
        Packet::PubRec(PubRec::with_reason(4, ReasonCode::PacketIdNotFound))
    );
}

#[test]
fn test_ack_with_reason_string() {
    let mut ack = PubAck::with_reason(77, ReasonCode::QuotaExceeded);
    ack.properties.reason_string = Some("slow down".to_string());
    round_trip(Packet::PubAck(ack), ProtocolVersion::V5);
}

#[test]
fn test_ack_v311_ignores_reason() {
    let encoded = encode_packet(
        &Packet::PubComp(PubComp::with_reason(3, ReasonCode::PacketIdNotFound)),
        ProtocolVersion::V311,
    );
    assert_eq!(&encoded[..], &[0x70, 0x02, 0x00, 0x03]);
}

// ============================================================================
// SUBSCRIBE / SUBACK / UNSUBSCRIBE / UNSUBACK
// ============================================================================

#[test]
fn test_subscribe_v5_options() {
    round_trip(
        Packet::Subscribe(Subscribe {
            packet_id: 5,
            subscriptions: vec![
                Subscription::new("a/+", QoS::AtLeastOnce),
                Subscription {
                    filter: "b/#".to_string(),
                    options: SubscriptionOptions {
                        qos: QoS::ExactlyOnce,
                        no_local: true,
                        retain_as_published: true,
                        retain_handling: RetainHandling::DoNotSend,
                    },
                },
            ],
            properties: Properties {
                subscription_identifiers: vec![42],
                ..Default::default()
            },
        }),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_subscribe_v311_drops_v5_flags() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 1,
        subscriptions: vec![Subscription {
            filter: "x".to_string(),
            options: SubscriptionOptions {
                qos: QoS::AtLeastOnce,
                no_local: true,
                retain_as_published: true,
                retain_handling: RetainHandling::SendAtSubscribeIfNew,
            },
        }],
        properties: Properties::default(),
    });
    let encoded = encode_packet(&packet, ProtocolVersion::V311);
    assert_eq!(&encoded[..], &[0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'x', 0x01]);
}

#[test]
fn test_subscribe_reserved_option_bits() {
    let bytes = [0x82, 0x07, 0x00, 0x01, 0x00, 0x00, 0x01, b'x', 0xC1];
    assert_eq!(
        decode_packet(&bytes, ProtocolVersion::V5),
        Err(DecodeError::InvalidSubscriptionOptions)
    );
}

#[test]
fn test_suback_v5_reason_run() {
    round_trip(
        Packet::SubAck(SubAck {
            packet_id: 5,
            reason_codes: vec![
                ReasonCode::GrantedQoS1,
                ReasonCode::NotAuthorized,
                ReasonCode::Success,
            ],
            properties: Properties::default(),
        }),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_suback_v311_failure_code() {
    let decoded = decode_packet(&[0x90, 0x04, 0x00, 0x02, 0x01, 0x80], ProtocolVersion::V311);
    assert_eq!(
        decoded.unwrap(),
        Packet::SubAck(SubAck {
            packet_id: 2,
            reason_codes: vec![ReasonCode::GrantedQoS1, ReasonCode::UnspecifiedError],
            properties: Properties::default(),
        })
    );
}

#[test]
fn test_unsubscribe_round_trip() {
    let packet = Packet::Unsubscribe(Unsubscribe {
        packet_id: 8,
        filters: vec!["a/b".to_string(), "c/#".to_string()],
        properties: Properties::default(),
    });
    round_trip(packet.clone(), ProtocolVersion::V311);
    round_trip(packet, ProtocolVersion::V5);
}

#[test]
fn test_unsuback_v311_has_no_payload() {
    let packet = Packet::UnsubAck(UnsubAck {
        packet_id: 8,
        reason_codes: Vec::new(),
        properties: Properties::default(),
    });
    assert_eq!(
        &encode_packet(&packet, ProtocolVersion::V311)[..],
        &[0xB0, 0x02, 0x00, 0x08]
    );
    round_trip(packet, ProtocolVersion::V311);
}

#[test]
fn test_unsuback_v5_reason_run() {
    round_trip(
        Packet::UnsubAck(UnsubAck {
            packet_id: 8,
            reason_codes: vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
            properties: Properties::default(),
        }),
        ProtocolVersion::V5,
    );
}

// ============================================================================
// PINGREQ / PINGRESP / DISCONNECT / AUTH
// ============================================================================

#[test]
fn test_ping_packets() {
    assert_eq!(&encode_packet(&Packet::PingReq, ProtocolVersion::V5)[..], &[0xC0, 0x00]);
    assert_eq!(&encode_packet(&Packet::PingResp, ProtocolVersion::V5)[..], &[0xD0, 0x00]);
    assert_eq!(
        decode_packet(&[0xD0, 0x00], ProtocolVersion::V311).unwrap(),
        Packet::PingResp
    );
}

#[test]
fn test_disconnect_normal_is_two_bytes() {
    let packet = Packet::Disconnect(Disconnect::default());
    assert_eq!(&encode_packet(&packet, ProtocolVersion::V5)[..], &[0xE0, 0x00]);
    assert_eq!(&encode_packet(&packet, ProtocolVersion::V311)[..], &[0xE0, 0x00]);
}

#[test]
fn test_disconnect_v5_with_reason() {
    let mut props = Properties::default();
    props.session_expiry_interval = Some(0);
    round_trip(
        Packet::Disconnect(Disconnect {
            reason_code: ReasonCode::DisconnectWithWill,
            properties: props,
        }),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_auth_round_trip_v5() {
    let mut props = Properties::default();
    props.authentication_method = Some("SCRAM-SHA-1".to_string());
    props.authentication_data = Some(Bytes::from_static(b"client-first"));
    round_trip(
        Packet::Auth(Auth {
            reason_code: ReasonCode::ContinueAuthentication,
            properties: props,
        }),
        ProtocolVersion::V5,
    );
}

#[test]
fn test_auth_not_defined_for_v311() {
    let mut buf = BytesMut::new();
    assert_eq!(
        Encoder::new(ProtocolVersion::V311).encode(&Packet::Auth(Auth::default()), &mut buf),
        Err(EncodeError::UnsupportedPacket(PacketType::Auth, ProtocolVersion::V311))
    );
    assert_eq!(
        decode_packet(&[0xF0, 0x00], ProtocolVersion::V311),
        Err(DecodeError::UnsupportedPacket(PacketType::Auth, ProtocolVersion::V311))
    );
}

// ============================================================================
// Streaming and framing
// ============================================================================

#[test]
fn test_decode_partial_returns_none() {
    let encoded = encode_packet(
        &Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: "partial".to_string(),
            packet_id: Some(1),
            payload: Bytes::from_static(b"0123456789"),
            ..Default::default()
        }),
        ProtocolVersion::V5,
    );
    let mut decoder = Decoder::new(ProtocolVersion::V5);
    for end in 0..encoded.len() {
        assert_eq!(decoder.decode(&encoded[..end]).unwrap(), None);
    }
    assert!(decoder.decode(&encoded).unwrap().is_some());
}

#[test]
fn test_decode_two_packets_back_to_back() {
    let mut buf = encode_packet(&Packet::PubAck(PubAck::new(1)), ProtocolVersion::V5);
    buf.extend_from_slice(&encode_packet(&Packet::PingResp, ProtocolVersion::V5));

    let mut decoder = Decoder::new(ProtocolVersion::V5);
    let (first, used) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PubAck(PubAck::new(1)));
    let (second, _) = decoder.decode(&buf[used..]).unwrap().unwrap();
    assert_eq!(second, Packet::PingResp);
}

#[test]
fn test_decode_respects_max_packet_size() {
    let mut decoder = Decoder::new(ProtocolVersion::V5).with_max_packet_size(4);
    assert_eq!(
        decoder.decode(&[0x30, 0x05, 0, 0, 0, 0, 0]),
        Err(DecodeError::PacketTooLarge(5))
    );
}

#[test]
fn test_truncated_body_is_malformed() {
    // remaining length 1 cannot hold a packet id
    let mut decoder = Decoder::new(ProtocolVersion::V5);
    assert!(matches!(
        decoder.decode_frame(0x40, &[0x00]),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_invalid_packet_type() {
    let mut decoder = Decoder::new(ProtocolVersion::V5);
    assert_eq!(
        decoder.decode_frame(0x00, &[]),
        Err(DecodeError::InvalidPacketType(0))
    );
}
