//! MQTT Packet Encoder
//!
//! Encodes MQTT packets for both v3.1.1 and v5.0. Each packet body is
//! written into a scratch buffer first so the fixed header can carry its
//! exact remaining length.

use bytes::{BufMut, BytesMut};

use super::{write_binary, write_string, write_variable_int};
use crate::protocol::{
    Connect, EncodeError, Packet, PacketType, Properties, ProtocolVersion, Publish, QoS,
    ReasonCode, SubAck, Subscribe, UnsubAck, Unsubscribe,
};

/// MQTT Packet Encoder
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    protocol_version: ProtocolVersion,
}

impl Encoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            protocol_version: version,
        }
    }

    pub fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.protocol_version = version;
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Append one complete packet (fixed header + body) to `buf`
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let packet_type = packet.packet_type();
        let mut flags = packet_type.fixed_flags();
        let mut body = BytesMut::new();

        match packet {
            Packet::Connect(p) => self.encode_connect(p, &mut body)?,
            Packet::ConnAck(p) => {
                body.put_u8(p.session_present as u8);
                match self.protocol_version {
                    ProtocolVersion::V5 => {
                        body.put_u8(p.reason_code as u8);
                        p.properties.encode(&mut body)?;
                    }
                    ProtocolVersion::V311 => body.put_u8(p.reason_code.to_v3_connack_code()),
                }
            }
            Packet::Publish(p) => flags = self.encode_publish(p, &mut body)?,
            Packet::PubAck(p) => {
                self.encode_ack(p.packet_id, p.reason_code, &p.properties, &mut body)?
            }
            Packet::PubRec(p) => {
                self.encode_ack(p.packet_id, p.reason_code, &p.properties, &mut body)?
            }
            Packet::PubRel(p) => {
                self.encode_ack(p.packet_id, p.reason_code, &p.properties, &mut body)?
            }
            Packet::PubComp(p) => {
                self.encode_ack(p.packet_id, p.reason_code, &p.properties, &mut body)?
            }
            Packet::Subscribe(p) => self.encode_subscribe(p, &mut body)?,
            Packet::SubAck(p) => self.encode_suback(p, &mut body)?,
            Packet::Unsubscribe(p) => self.encode_unsubscribe(p, &mut body)?,
            Packet::UnsubAck(p) => self.encode_unsuback(p, &mut body)?,
            Packet::PingReq | Packet::PingResp => {}
            Packet::Disconnect(p) => {
                if self.protocol_version.has_properties() {
                    self.encode_reason_and_properties(p.reason_code, &p.properties, &mut body)?;
                }
            }
            Packet::Auth(p) => {
                if !self.protocol_version.has_properties() {
                    return Err(EncodeError::UnsupportedPacket(
                        PacketType::Auth,
                        self.protocol_version,
                    ));
                }
                self.encode_reason_and_properties(p.reason_code, &p.properties, &mut body)?;
            }
        }

        buf.reserve(body.len() + 5);
        buf.put_u8(((packet_type as u8) << 4) | flags);
        write_variable_int(buf, body.len() as u32)?;
        buf.put_slice(&body);
        Ok(())
    }

    /// CONNECT is encoded for its own protocol version
    fn encode_connect(&self, packet: &Connect, body: &mut BytesMut) -> Result<(), EncodeError> {
        let with_properties = packet.protocol_version.has_properties();

        write_string(body, "MQTT")?;
        body.put_u8(packet.protocol_version.level());

        let mut connect_flags: u8 = 0;
        if packet.clean_start {
            connect_flags |= 0x02;
        }
        if let Some(will) = &packet.will {
            connect_flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                connect_flags |= 0x20;
            }
        }
        if packet.password.is_some() {
            connect_flags |= 0x40;
        }
        if packet.username.is_some() {
            connect_flags |= 0x80;
        }
        body.put_u8(connect_flags);
        body.put_u16(packet.keep_alive);

        if with_properties {
            packet.properties.encode(body)?;
        }
        write_string(body, &packet.client_id)?;

        if let Some(will) = &packet.will {
            if with_properties {
                will.properties.encode(body)?;
            }
            write_string(body, &will.topic)?;
            write_binary(body, &will.payload)?;
        }
        if let Some(username) = &packet.username {
            write_string(body, username)?;
        }
        if let Some(password) = &packet.password {
            write_binary(body, password)?;
        }
        Ok(())
    }

    /// Returns the flags nibble (dup, qos, retain)
    fn encode_publish(&self, packet: &Publish, body: &mut BytesMut) -> Result<u8, EncodeError> {
        write_string(body, &packet.topic)?;

        match (packet.qos, packet.packet_id) {
            (QoS::AtMostOnce, None) => {}
            (QoS::AtLeastOnce | QoS::ExactlyOnce, Some(id)) => body.put_u16(id),
            _ => return Err(EncodeError::PacketIdMismatch),
        }

        if self.protocol_version.has_properties() {
            packet.properties.encode(body)?;
        }
        body.put_slice(&packet.payload);

        let mut flags = (packet.qos as u8) << 1;
        if packet.dup {
            flags |= 0x08;
        }
        if packet.retain {
            flags |= 0x01;
        }
        Ok(flags)
    }

    /// PUBACK / PUBREC / PUBREL / PUBCOMP
    fn encode_ack(
        &self,
        packet_id: u16,
        reason_code: ReasonCode,
        properties: &Properties,
        body: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        body.put_u16(packet_id);
        if self.protocol_version.has_properties() {
            self.encode_reason_and_properties(reason_code, properties, body)?;
        }
        Ok(())
    }

    /// Reason code and properties are left out entirely when the reason is
    /// Success and there are no properties
    fn encode_reason_and_properties(
        &self,
        reason_code: ReasonCode,
        properties: &Properties,
        body: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        if reason_code == ReasonCode::Success && properties.is_empty() {
            return Ok(());
        }
        body.put_u8(reason_code as u8);
        if !properties.is_empty() {
            properties.encode(body)?;
        }
        Ok(())
    }

    fn encode_subscribe(&self, packet: &Subscribe, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        if self.protocol_version.has_properties() {
            packet.properties.encode(body)?;
        }
        for sub in &packet.subscriptions {
            write_string(body, &sub.filter)?;
            body.put_u8(sub.options.to_byte(self.protocol_version));
        }
        Ok(())
    }

    fn encode_suback(&self, packet: &SubAck, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        match self.protocol_version {
            ProtocolVersion::V5 => {
                packet.properties.encode(body)?;
                body.extend(packet.reason_codes.iter().map(|code| *code as u8));
            }
            ProtocolVersion::V311 => {
                body.extend(packet.reason_codes.iter().map(|code| code.to_v3_suback_code()));
            }
        }
        Ok(())
    }

    fn encode_unsubscribe(
        &self,
        packet: &Unsubscribe,
        body: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        if self.protocol_version.has_properties() {
            packet.properties.encode(body)?;
        }
        for filter in &packet.filters {
            write_string(body, filter)?;
        }
        Ok(())
    }

    fn encode_unsuback(&self, packet: &UnsubAck, body: &mut BytesMut) -> Result<(), EncodeError> {
        body.put_u16(packet.packet_id);
        // v3.1.1 UNSUBACK has no payload
        if self.protocol_version.has_properties() {
            packet.properties.encode(body)?;
            body.extend(packet.reason_codes.iter().map(|code| *code as u8));
        }
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}
