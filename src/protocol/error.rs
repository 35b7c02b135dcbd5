//! Protocol error types

use std::fmt;

use super::{PacketType, ProtocolVersion};

/// Errors raised while decoding bytes received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before the field was complete
    InsufficientData,
    /// Unknown control packet type
    InvalidPacketType(u8),
    /// Variable byte integer did not terminate within 4 bytes
    MalformedVariableInt,
    /// Remaining length exceeds the configured maximum packet size
    PacketTooLarge(usize),
    /// Invalid protocol name in CONNECT
    InvalidProtocolName,
    /// Unsupported protocol level in CONNECT
    InvalidProtocolVersion(u8),
    /// QoS bits set to 3
    InvalidQoS(u8),
    /// String is not well-formed UTF-8
    InvalidUtf8,
    /// Property identifier outside the MQTT v5.0 table
    InvalidPropertyId(u32),
    /// Non-repeatable property appeared twice
    DuplicateProperty(u8),
    /// Property block length disagrees with its content
    PropertyLengthMismatch,
    /// Reserved flag bits do not match the packet type
    InvalidFlags,
    /// Reason code not defined for the protocol
    InvalidReasonCode(u8),
    /// Reserved bits set in a subscription options byte
    InvalidSubscriptionOptions,
    /// Packet type exists only in another protocol version
    UnsupportedPacket(PacketType, ProtocolVersion),
    /// Any other structural violation
    MalformedPacket(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::MalformedVariableInt => write!(f, "malformed variable byte integer"),
            Self::PacketTooLarge(len) => write!(f, "packet too large: {} bytes", len),
            Self::InvalidProtocolName => write!(f, "invalid protocol name"),
            Self::InvalidProtocolVersion(v) => write!(f, "invalid protocol version: {}", v),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidPropertyId(id) => write!(f, "invalid property identifier: {:#04x}", id),
            Self::DuplicateProperty(id) => write!(f, "duplicate property: {:#04x}", id),
            Self::PropertyLengthMismatch => write!(f, "property length mismatch"),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::InvalidReasonCode(r) => write!(f, "invalid reason code: {:#04x}", r),
            Self::InvalidSubscriptionOptions => write!(f, "invalid subscription options"),
            Self::UnsupportedPacket(t, v) => {
                write!(f, "{:?} packet is not defined for MQTT {}", t, v)
            }
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors raised while encoding a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Variable byte integer above 268,435,455
    VariableIntTooLarge(u32),
    /// String or binary field longer than 65,535 bytes
    StringTooLong(usize),
    /// Packet type exists only in another protocol version
    UnsupportedPacket(PacketType, ProtocolVersion),
    /// QoS > 0 PUBLISH without a packet identifier, or the reverse
    PacketIdMismatch,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VariableIntTooLarge(v) => {
                write!(f, "variable byte integer out of range: {}", v)
            }
            Self::StringTooLong(len) => write!(f, "string too long: {} bytes", len),
            Self::UnsupportedPacket(t, v) => {
                write!(f, "{:?} packet is not defined for MQTT {}", t, v)
            }
            Self::PacketIdMismatch => write!(f, "packet identifier does not match QoS"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Protocol violations detected by the client state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound packet could not be decoded
    Decode(DecodeError),
    /// Outbound packet could not be encoded
    Encode(EncodeError),
    /// Broker sent a packet that is not valid in the current state
    UnexpectedPacket(PacketType),
    /// Inbound PUBLISH referenced an alias that was never registered
    UnknownTopicAlias(u16),
    /// Inbound PUBLISH carried an alias above the advertised maximum
    TopicAliasOutOfRange(u16),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::UnexpectedPacket(t) => write!(f, "unexpected {:?} packet", t),
            Self::UnknownTopicAlias(a) => write!(f, "unknown topic alias: {}", a),
            Self::TopicAliasOutOfRange(a) => write!(f, "topic alias out of range: {}", a),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Decode(e)
    }
}

impl From<EncodeError> for ProtocolError {
    fn from(e: EncodeError) -> Self {
        ProtocolError::Encode(e)
    }
}
