//! MQTT Packet Decoder
//!
//! Decodes MQTT packets for both v3.1.1 and v5.0

use bytes::Bytes;

use super::{read_variable_int, Reader, MAX_REMAINING_LENGTH};
use crate::protocol::{
    Auth, ConnAck, Connect, DecodeError, Disconnect, Packet, PacketType, Properties,
    ProtocolVersion, PubAck, PubComp, PubRec, PubRel, Publish, QoS, ReasonCode, SubAck,
    Subscribe, Subscription, SubscriptionOptions, UnsubAck, Unsubscribe, Will,
};

/// MQTT Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum accepted remaining length
    max_packet_size: usize,
    protocol_version: ProtocolVersion,
}

impl Decoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            max_packet_size: MAX_REMAINING_LENGTH as usize,
            protocol_version: version,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH as usize);
        self
    }

    pub fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.protocol_version = version;
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Decode one packet from the front of `buf`
    ///
    /// Returns `Ok(None)` until a whole frame is buffered, otherwise the
    /// packet and the number of bytes it occupied.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };
        let remaining_length = remaining_length as usize;

        if remaining_length > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge(remaining_length));
        }

        let total_len = 1 + len_bytes + remaining_length;
        if buf.len() < total_len {
            return Ok(None);
        }

        let packet = self.decode_frame(buf[0], &buf[1 + len_bytes..total_len])?;
        Ok(Some((packet, total_len)))
    }

    /// Decode a frame already isolated by the frame reader
    ///
    /// `body` is exactly `remaining_length` bytes, so running short inside
    /// it means the packet is malformed rather than incomplete.
    pub fn decode_frame(&mut self, header: u8, body: &[u8]) -> Result<Packet, DecodeError> {
        let type_bits = header >> 4;
        let flags = header & 0x0F;
        let packet_type =
            PacketType::from_u8(type_bits).ok_or(DecodeError::InvalidPacketType(type_bits))?;

        if packet_type != PacketType::Publish && flags != packet_type.fixed_flags() {
            return Err(DecodeError::InvalidFlags);
        }

        let mut r = Reader::new(body);
        let packet = match packet_type {
            PacketType::Connect => self.decode_connect(&mut r),
            PacketType::ConnAck => self.decode_connack(&mut r),
            PacketType::Publish => self.decode_publish(flags, &mut r),
            PacketType::PubAck => self
                .decode_ack(&mut r)
                .map(|(id, reason_code, properties)| {
                    Packet::PubAck(PubAck {
                        packet_id: id,
                        reason_code,
                        properties,
                    })
                }),
            PacketType::PubRec => self
                .decode_ack(&mut r)
                .map(|(id, reason_code, properties)| {
                    Packet::PubRec(PubRec {
                        packet_id: id,
                        reason_code,
                        properties,
                    })
                }),
            PacketType::PubRel => self
                .decode_ack(&mut r)
                .map(|(id, reason_code, properties)| {
                    Packet::PubRel(PubRel {
                        packet_id: id,
                        reason_code,
                        properties,
                    })
                }),
            PacketType::PubComp => self
                .decode_ack(&mut r)
                .map(|(id, reason_code, properties)| {
                    Packet::PubComp(PubComp {
                        packet_id: id,
                        reason_code,
                        properties,
                    })
                }),
            PacketType::Subscribe => self.decode_subscribe(&mut r),
            PacketType::SubAck => self.decode_suback(&mut r),
            PacketType::Unsubscribe => self.decode_unsubscribe(&mut r),
            PacketType::UnsubAck => self.decode_unsuback(&mut r),
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => self.decode_disconnect(&mut r),
            PacketType::Auth => self.decode_auth(&mut r),
        };

        let packet = packet.map_err(|e| match e {
            DecodeError::InsufficientData => DecodeError::MalformedPacket("packet body truncated"),
            other => other,
        })?;

        if matches!(packet, Packet::PingReq | Packet::PingResp) && !r.is_empty() {
            return Err(DecodeError::MalformedPacket("unexpected payload"));
        }

        Ok(packet)
    }

    fn properties(&self, r: &mut Reader<'_>) -> Result<Properties, DecodeError> {
        properties_for(self.protocol_version, r)
    }

    fn reason_code(byte: u8) -> Result<ReasonCode, DecodeError> {
        ReasonCode::from_u8(byte).ok_or(DecodeError::InvalidReasonCode(byte))
    }

    fn packet_id(r: &mut Reader<'_>) -> Result<u16, DecodeError> {
        match r.read_u16()? {
            0 => Err(DecodeError::MalformedPacket("packet id cannot be 0")),
            id => Ok(id),
        }
    }

    /// CONNECT carries its own protocol level; the decoder's version is left alone
    fn decode_connect(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let protocol_name = r.read_string()?;
        if protocol_name != "MQTT" {
            return Err(DecodeError::InvalidProtocolName);
        }

        let level = r.read_u8()?;
        let protocol_version =
            ProtocolVersion::from_level(level).ok_or(DecodeError::InvalidProtocolVersion(level))?;

        let connect_flags = r.read_u8()?;
        if connect_flags & 0x01 != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let clean_start = connect_flags & 0x02 != 0;
        let will_flag = connect_flags & 0x04 != 0;
        let will_qos = (connect_flags >> 3) & 0x03;
        let will_retain = connect_flags & 0x20 != 0;
        let password_flag = connect_flags & 0x40 != 0;
        let username_flag = connect_flags & 0x80 != 0;

        let will_qos = QoS::from_u8(will_qos).ok_or(DecodeError::InvalidQoS(will_qos))?;
        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidFlags);
        }
        // v3.1.1 forbids a password without a username
        if protocol_version == ProtocolVersion::V311 && password_flag && !username_flag {
            return Err(DecodeError::InvalidFlags);
        }

        let keep_alive = r.read_u16()?;
        let properties = properties_for(protocol_version, r)?;
        let client_id = r.read_string()?.to_owned();

        let will = if will_flag {
            let properties = properties_for(protocol_version, r)?;
            let topic = r.read_string()?.to_owned();
            let payload = Bytes::copy_from_slice(r.read_binary()?);
            Some(Will {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
                properties,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(r.read_string()?.to_owned())
        } else {
            None
        };
        let password = if password_flag {
            Some(Bytes::copy_from_slice(r.read_binary()?))
        } else {
            None
        };

        Ok(Packet::Connect(Box::new(Connect {
            protocol_version,
            client_id,
            clean_start,
            keep_alive,
            username,
            password,
            will,
            properties,
        })))
    }

    fn decode_connack(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let acknowledge_flags = r.read_u8()?;
        // Only bit 0 (session present) may be set
        if acknowledge_flags & 0xFE != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let session_present = acknowledge_flags & 0x01 != 0;

        let code = r.read_u8()?;
        let reason_code = match self.protocol_version {
            ProtocolVersion::V5 => Self::reason_code(code)?,
            ProtocolVersion::V311 => ReasonCode::from_v3_connack_code(code)
                .ok_or(DecodeError::InvalidReasonCode(code))?,
        };

        let properties = if r.is_empty() {
            Properties::default()
        } else {
            self.properties(r)?
        };

        Ok(Packet::ConnAck(ConnAck {
            session_present,
            reason_code,
            properties,
        }))
    }

    fn decode_publish(&self, flags: u8, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let dup = flags & 0x08 != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = flags & 0x01 != 0;
        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let topic = r.read_string()?;
        if topic.contains(['+', '#']) {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(Self::packet_id(r)?),
        };
        let properties = self.properties(r)?;

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: topic.to_owned(),
            packet_id,
            payload: Bytes::copy_from_slice(r.read_rest()),
            properties,
        }))
    }

    /// Shared body of PUBACK / PUBREC / PUBREL / PUBCOMP
    ///
    /// Reason code and properties are optional; absence means Success.
    fn decode_ack(
        &self,
        r: &mut Reader<'_>,
    ) -> Result<(u16, ReasonCode, Properties), DecodeError> {
        let packet_id = Self::packet_id(r)?;

        if !self.protocol_version.has_properties() || r.is_empty() {
            return Ok((packet_id, ReasonCode::Success, Properties::default()));
        }

        let reason_code = Self::reason_code(r.read_u8()?)?;
        let properties = if r.is_empty() {
            Properties::default()
        } else {
            Properties::decode(r)?
        };
        Ok((packet_id, reason_code, properties))
    }

    fn decode_subscribe(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let packet_id = Self::packet_id(r)?;
        let properties = self.properties(r)?;

        let mut subscriptions = Vec::new();
        while !r.is_empty() {
            let filter = r.read_string()?.to_owned();
            let byte = r.read_u8()?;
            let options = match self.protocol_version {
                ProtocolVersion::V5 => SubscriptionOptions::from_byte(byte)
                    .ok_or(DecodeError::InvalidSubscriptionOptions)?,
                ProtocolVersion::V311 => {
                    if byte & 0xFC != 0 {
                        return Err(DecodeError::InvalidSubscriptionOptions);
                    }
                    let qos = QoS::from_u8(byte).ok_or(DecodeError::InvalidQoS(byte))?;
                    SubscriptionOptions::with_qos(qos)
                }
            };
            subscriptions.push(Subscription { filter, options });
        }

        if subscriptions.is_empty() {
            return Err(DecodeError::MalformedPacket(
                "SUBSCRIBE must contain at least one topic filter",
            ));
        }

        Ok(Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions,
            properties,
        }))
    }

    fn decode_suback(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let packet_id = Self::packet_id(r)?;
        let properties = self.properties(r)?;

        let reason_codes = r
            .read_rest()
            .iter()
            .map(|&code| match self.protocol_version {
                ProtocolVersion::V5 => Self::reason_code(code),
                ProtocolVersion::V311 => ReasonCode::from_v3_suback_code(code)
                    .ok_or(DecodeError::InvalidReasonCode(code)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Packet::SubAck(SubAck {
            packet_id,
            reason_codes,
            properties,
        }))
    }

    fn decode_unsubscribe(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let packet_id = Self::packet_id(r)?;
        let properties = self.properties(r)?;

        let mut filters = Vec::new();
        while !r.is_empty() {
            filters.push(r.read_string()?.to_owned());
        }

        if filters.is_empty() {
            return Err(DecodeError::MalformedPacket(
                "UNSUBSCRIBE must contain at least one topic filter",
            ));
        }

        Ok(Packet::Unsubscribe(Unsubscribe {
            packet_id,
            filters,
            properties,
        }))
    }

    fn decode_unsuback(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let packet_id = Self::packet_id(r)?;

        // v3.1.1 UNSUBACK is just the packet id
        let (reason_codes, properties) = match self.protocol_version {
            ProtocolVersion::V311 => (Vec::new(), Properties::default()),
            ProtocolVersion::V5 => {
                let properties = Properties::decode(r)?;
                let codes = r
                    .read_rest()
                    .iter()
                    .map(|&code| Self::reason_code(code))
                    .collect::<Result<Vec<_>, _>>()?;
                (codes, properties)
            }
        };

        Ok(Packet::UnsubAck(UnsubAck {
            packet_id,
            reason_codes,
            properties,
        }))
    }

    /// Shared body of DISCONNECT / AUTH: optional reason, optional properties
    fn decode_reason_and_properties(
        &self,
        r: &mut Reader<'_>,
    ) -> Result<(ReasonCode, Properties), DecodeError> {
        if !self.protocol_version.has_properties() || r.is_empty() {
            return Ok((ReasonCode::Success, Properties::default()));
        }
        let reason_code = Self::reason_code(r.read_u8()?)?;
        let properties = if r.is_empty() {
            Properties::default()
        } else {
            Properties::decode(r)?
        };
        Ok((reason_code, properties))
    }

    fn decode_disconnect(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if self.protocol_version == ProtocolVersion::V311 && !r.is_empty() {
            return Err(DecodeError::MalformedPacket(
                "v3.1.1 DISCONNECT has no variable header",
            ));
        }
        let (reason_code, properties) = self.decode_reason_and_properties(r)?;
        Ok(Packet::Disconnect(Disconnect {
            reason_code,
            properties,
        }))
    }

    fn decode_auth(&self, r: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if self.protocol_version == ProtocolVersion::V311 {
            return Err(DecodeError::UnsupportedPacket(
                PacketType::Auth,
                ProtocolVersion::V311,
            ));
        }
        let (reason_code, properties) = self.decode_reason_and_properties(r)?;
        Ok(Packet::Auth(Auth {
            reason_code,
            properties,
        }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}

fn properties_for(version: ProtocolVersion, r: &mut Reader<'_>) -> Result<Properties, DecodeError> {
    if version.has_properties() {
        Properties::decode(r)
    } else {
        Ok(Properties::default())
    }
}
