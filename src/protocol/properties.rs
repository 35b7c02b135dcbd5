//! MQTT v5.0 properties
//!
//! A property block is `varint length` followed by `{varint id, value}*`.
//! Every identifier has one fixed wire type (Table 2-4 of the v5.0
//! specification); anything outside the table is a decode error.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{variable_int_len, write_binary, write_string, write_variable_int, Reader};
use crate::protocol::{DecodeError, EncodeError};

/// Wire encoding of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    Utf8String,
    BinaryData,
    Utf8StringPair,
}

/// Property identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyId {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0B,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,
}

impl PropertyId {
    pub fn from_u32(v: u32) -> Option<Self> {
        use PropertyId::*;
        Some(match v {
            0x01 => PayloadFormatIndicator,
            0x02 => MessageExpiryInterval,
            0x03 => ContentType,
            0x08 => ResponseTopic,
            0x09 => CorrelationData,
            0x0B => SubscriptionIdentifier,
            0x11 => SessionExpiryInterval,
            0x12 => AssignedClientIdentifier,
            0x13 => ServerKeepAlive,
            0x15 => AuthenticationMethod,
            0x16 => AuthenticationData,
            0x17 => RequestProblemInformation,
            0x18 => WillDelayInterval,
            0x19 => RequestResponseInformation,
            0x1A => ResponseInformation,
            0x1C => ServerReference,
            0x1F => ReasonString,
            0x21 => ReceiveMaximum,
            0x22 => TopicAliasMaximum,
            0x23 => TopicAlias,
            0x24 => MaximumQoS,
            0x25 => RetainAvailable,
            0x26 => UserProperty,
            0x27 => MaximumPacketSize,
            0x28 => WildcardSubscriptionAvailable,
            0x29 => SubscriptionIdentifierAvailable,
            0x2A => SharedSubscriptionAvailable,
            _ => return None,
        })
    }

    pub fn wire_type(self) -> WireType {
        use PropertyId::*;
        match self {
            PayloadFormatIndicator
            | RequestProblemInformation
            | RequestResponseInformation
            | MaximumQoS
            | RetainAvailable
            | WildcardSubscriptionAvailable
            | SubscriptionIdentifierAvailable
            | SharedSubscriptionAvailable => WireType::Byte,
            ServerKeepAlive | ReceiveMaximum | TopicAliasMaximum | TopicAlias => {
                WireType::TwoByteInteger
            }
            MessageExpiryInterval
            | SessionExpiryInterval
            | WillDelayInterval
            | MaximumPacketSize => WireType::FourByteInteger,
            SubscriptionIdentifier => WireType::VariableByteInteger,
            ContentType
            | ResponseTopic
            | AssignedClientIdentifier
            | AuthenticationMethod
            | ResponseInformation
            | ServerReference
            | ReasonString => WireType::Utf8String,
            CorrelationData | AuthenticationData => WireType::BinaryData,
            UserProperty => WireType::Utf8StringPair,
        }
    }

    /// Only user properties and subscription identifiers may repeat
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            PropertyId::UserProperty | PropertyId::SubscriptionIdentifier
        )
    }
}

/// Borrowed property value, tagged by wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value<'a> {
    Byte(u8),
    TwoByte(u16),
    FourByte(u32),
    VarInt(u32),
    Str(&'a str),
    Binary(&'a [u8]),
    Pair(&'a str, &'a str),
}

impl Value<'_> {
    fn read<'a>(reader: &mut Reader<'a>, wire_type: WireType) -> Result<Value<'a>, DecodeError> {
        Ok(match wire_type {
            WireType::Byte => Value::Byte(reader.read_u8()?),
            WireType::TwoByteInteger => Value::TwoByte(reader.read_u16()?),
            WireType::FourByteInteger => Value::FourByte(reader.read_u32()?),
            WireType::VariableByteInteger => Value::VarInt(reader.read_variable_int()?),
            WireType::Utf8String => Value::Str(reader.read_string()?),
            WireType::BinaryData => Value::Binary(reader.read_binary()?),
            WireType::Utf8StringPair => Value::Pair(reader.read_string()?, reader.read_string()?),
        })
    }

    fn encoded_size(&self) -> usize {
        match self {
            Value::Byte(_) => 1,
            Value::TwoByte(_) => 2,
            Value::FourByte(_) => 4,
            Value::VarInt(v) => variable_int_len(*v),
            Value::Str(s) => 2 + s.len(),
            Value::Binary(b) => 2 + b.len(),
            Value::Pair(k, v) => 4 + k.len() + v.len(),
        }
    }

    fn write(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match *self {
            Value::Byte(v) => buf.put_u8(v),
            Value::TwoByte(v) => buf.put_u16(v),
            Value::FourByte(v) => buf.put_u32(v),
            Value::VarInt(v) => {
                write_variable_int(buf, v)?;
            }
            Value::Str(s) => write_string(buf, s)?,
            Value::Binary(b) => write_binary(buf, b)?,
            Value::Pair(k, v) => {
                write_string(buf, k)?;
                write_string(buf, v)?;
            }
        }
        Ok(())
    }
}

/// Sparse record of MQTT v5.0 properties
///
/// Which fields are meaningful depends on the packet; the codec does not
/// reject a property that is legal on the wire but unusual for the packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub payload_format_indicator: Option<u8>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub subscription_identifiers: Vec<u32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub server_keep_alive: Option<u16>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Bytes>,
    pub request_problem_information: Option<u8>,
    pub will_delay_interval: Option<u32>,
    pub request_response_information: Option<u8>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub reason_string: Option<String>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<u16>,
    pub maximum_qos: Option<u8>,
    pub retain_available: Option<u8>,
    /// Order-preserving, duplicates allowed
    pub user_properties: Vec<(String, String)>,
    pub maximum_packet_size: Option<u32>,
    pub wildcard_subscription_available: Option<u8>,
    pub subscription_identifier_available: Option<u8>,
    pub shared_subscription_available: Option<u8>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        let mut empty = true;
        self.visit(|_, _| {
            empty = false;
            Ok::<(), ()>(())
        })
        .ok();
        empty
    }

    /// Size of the property entries, excluding the length prefix
    pub fn encoded_size(&self) -> usize {
        let mut size = 0;
        self.visit(|id, value| {
            size += variable_int_len(id as u32) + value.encoded_size();
            Ok::<(), ()>(())
        })
        .ok();
        size
    }

    /// Size including the variable byte integer length prefix
    pub fn encoded_size_with_prefix(&self) -> usize {
        let size = self.encoded_size();
        variable_int_len(size as u32) + size
    }

    /// Write the length prefix followed by every present property
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        write_variable_int(buf, self.encoded_size() as u32)?;
        self.visit(|id, value| {
            write_variable_int(buf, id as u32)?;
            value.write(buf)
        })
    }

    /// Read a length-prefixed property block; the block must be consumed
    /// exactly
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = reader.read_variable_int()? as usize;
        let mut block = reader.take(len)?;
        let mut props = Properties::new();

        while !block.is_empty() {
            let raw_id = block.read_variable_int()?;
            let id = PropertyId::from_u32(raw_id).ok_or(DecodeError::InvalidPropertyId(raw_id))?;
            let value = Value::read(&mut block, id.wire_type()).map_err(|e| match e {
                DecodeError::InsufficientData => DecodeError::PropertyLengthMismatch,
                other => other,
            })?;
            props.insert(id, value)?;
        }

        Ok(props)
    }

    fn insert(&mut self, id: PropertyId, value: Value<'_>) -> Result<(), DecodeError> {
        fn once<T>(slot: &mut Option<T>, id: PropertyId, v: T) -> Result<(), DecodeError> {
            if slot.is_some() {
                return Err(DecodeError::DuplicateProperty(id as u8));
            }
            *slot = Some(v);
            Ok(())
        }
        fn non_zero<T: Default + PartialEq>(v: T, what: &'static str) -> Result<T, DecodeError> {
            if v == T::default() {
                return Err(DecodeError::MalformedPacket(what));
            }
            Ok(v)
        }

        use PropertyId as P;
        match (id, value) {
            (P::PayloadFormatIndicator, Value::Byte(v)) => {
                once(&mut self.payload_format_indicator, id, v)
            }
            (P::MessageExpiryInterval, Value::FourByte(v)) => {
                once(&mut self.message_expiry_interval, id, v)
            }
            (P::ContentType, Value::Str(s)) => once(&mut self.content_type, id, s.to_owned()),
            (P::ResponseTopic, Value::Str(s)) => once(&mut self.response_topic, id, s.to_owned()),
            (P::CorrelationData, Value::Binary(b)) => {
                once(&mut self.correlation_data, id, Bytes::copy_from_slice(b))
            }
            (P::SubscriptionIdentifier, Value::VarInt(v)) => {
                let v = non_zero(v, "subscription identifier cannot be 0")?;
                self.subscription_identifiers.push(v);
                Ok(())
            }
            (P::SessionExpiryInterval, Value::FourByte(v)) => {
                once(&mut self.session_expiry_interval, id, v)
            }
            (P::AssignedClientIdentifier, Value::Str(s)) => {
                once(&mut self.assigned_client_identifier, id, s.to_owned())
            }
            (P::ServerKeepAlive, Value::TwoByte(v)) => once(&mut self.server_keep_alive, id, v),
            (P::AuthenticationMethod, Value::Str(s)) => {
                once(&mut self.authentication_method, id, s.to_owned())
            }
            (P::AuthenticationData, Value::Binary(b)) => {
                once(&mut self.authentication_data, id, Bytes::copy_from_slice(b))
            }
            (P::RequestProblemInformation, Value::Byte(v)) => {
                once(&mut self.request_problem_information, id, v)
            }
            (P::WillDelayInterval, Value::FourByte(v)) => {
                once(&mut self.will_delay_interval, id, v)
            }
            (P::RequestResponseInformation, Value::Byte(v)) => {
                once(&mut self.request_response_information, id, v)
            }
            (P::ResponseInformation, Value::Str(s)) => {
                once(&mut self.response_information, id, s.to_owned())
            }
            (P::ServerReference, Value::Str(s)) => {
                once(&mut self.server_reference, id, s.to_owned())
            }
            (P::ReasonString, Value::Str(s)) => once(&mut self.reason_string, id, s.to_owned()),
            (P::ReceiveMaximum, Value::TwoByte(v)) => {
                let v = non_zero(v, "receive maximum cannot be 0")?;
                once(&mut self.receive_maximum, id, v)
            }
            (P::TopicAliasMaximum, Value::TwoByte(v)) => {
                once(&mut self.topic_alias_maximum, id, v)
            }
            (P::TopicAlias, Value::TwoByte(v)) => {
                let v = non_zero(v, "topic alias cannot be 0")?;
                once(&mut self.topic_alias, id, v)
            }
            (P::MaximumQoS, Value::Byte(v)) => once(&mut self.maximum_qos, id, v),
            (P::RetainAvailable, Value::Byte(v)) => once(&mut self.retain_available, id, v),
            (P::UserProperty, Value::Pair(k, v)) => {
                self.user_properties.push((k.to_owned(), v.to_owned()));
                Ok(())
            }
            (P::MaximumPacketSize, Value::FourByte(v)) => {
                let v = non_zero(v, "maximum packet size cannot be 0")?;
                once(&mut self.maximum_packet_size, id, v)
            }
            (P::WildcardSubscriptionAvailable, Value::Byte(v)) => {
                once(&mut self.wildcard_subscription_available, id, v)
            }
            (P::SubscriptionIdentifierAvailable, Value::Byte(v)) => {
                once(&mut self.subscription_identifier_available, id, v)
            }
            (P::SharedSubscriptionAvailable, Value::Byte(v)) => {
                once(&mut self.shared_subscription_available, id, v)
            }
            _ => Err(DecodeError::MalformedPacket("property value has wrong type")),
        }
    }

    /// Call `f` for every present property in identifier order
    fn visit<E>(&self, mut f: impl FnMut(PropertyId, Value<'_>) -> Result<(), E>) -> Result<(), E> {
        use PropertyId as P;

        if let Some(v) = self.payload_format_indicator {
            f(P::PayloadFormatIndicator, Value::Byte(v))?;
        }
        if let Some(v) = self.message_expiry_interval {
            f(P::MessageExpiryInterval, Value::FourByte(v))?;
        }
        if let Some(s) = &self.content_type {
            f(P::ContentType, Value::Str(s))?;
        }
        if let Some(s) = &self.response_topic {
            f(P::ResponseTopic, Value::Str(s))?;
        }
        if let Some(b) = &self.correlation_data {
            f(P::CorrelationData, Value::Binary(b))?;
        }
        for v in &self.subscription_identifiers {
            f(P::SubscriptionIdentifier, Value::VarInt(*v))?;
        }
        if let Some(v) = self.session_expiry_interval {
            f(P::SessionExpiryInterval, Value::FourByte(v))?;
        }
        if let Some(s) = &self.assigned_client_identifier {
            f(P::AssignedClientIdentifier, Value::Str(s))?;
        }
        if let Some(v) = self.server_keep_alive {
            f(P::ServerKeepAlive, Value::TwoByte(v))?;
        }
        if let Some(s) = &self.authentication_method {
            f(P::AuthenticationMethod, Value::Str(s))?;
        }
        if let Some(b) = &self.authentication_data {
            f(P::AuthenticationData, Value::Binary(b))?;
        }
        if let Some(v) = self.request_problem_information {
            f(P::RequestProblemInformation, Value::Byte(v))?;
        }
        if let Some(v) = self.will_delay_interval {
            f(P::WillDelayInterval, Value::FourByte(v))?;
        }
        if let Some(v) = self.request_response_information {
            f(P::RequestResponseInformation, Value::Byte(v))?;
        }
        if let Some(s) = &self.response_information {
            f(P::ResponseInformation, Value::Str(s))?;
        }
        if let Some(s) = &self.server_reference {
            f(P::ServerReference, Value::Str(s))?;
        }
        if let Some(s) = &self.reason_string {
            f(P::ReasonString, Value::Str(s))?;
        }
        if let Some(v) = self.receive_maximum {
            f(P::ReceiveMaximum, Value::TwoByte(v))?;
        }
        if let Some(v) = self.topic_alias_maximum {
            f(P::TopicAliasMaximum, Value::TwoByte(v))?;
        }
        if let Some(v) = self.topic_alias {
            f(P::TopicAlias, Value::TwoByte(v))?;
        }
        if let Some(v) = self.maximum_qos {
            f(P::MaximumQoS, Value::Byte(v))?;
        }
        if let Some(v) = self.retain_available {
            f(P::RetainAvailable, Value::Byte(v))?;
        }
        for (k, v) in &self.user_properties {
            f(P::UserProperty, Value::Pair(k, v))?;
        }
        if let Some(v) = self.maximum_packet_size {
            f(P::MaximumPacketSize, Value::FourByte(v))?;
        }
        if let Some(v) = self.wildcard_subscription_available {
            f(P::WildcardSubscriptionAvailable, Value::Byte(v))?;
        }
        if let Some(v) = self.subscription_identifier_available {
            f(P::SubscriptionIdentifierAvailable, Value::Byte(v))?;
        }
        if let Some(v) = self.shared_subscription_available {
            f(P::SharedSubscriptionAvailable, Value::Byte(v))?;
        }
        Ok(())
    }
}
