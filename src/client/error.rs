//! Client error type

use std::fmt;
use std::io;

use super::ConnectionState;
use crate::packet_id::PacketIdError;
use crate::protocol::{ProtocolError, ReasonCode};

/// Errors returned by [`Client`](super::Client) operations
#[derive(Debug)]
pub enum ClientError {
    /// Operation requires an online connection
    NotConnected,
    /// Operation is not legal in the current connection state
    InvalidState(ConnectionState),
    /// Broker answered CONNECT with an error reason
    ConnectionRefused(ReasonCode),
    /// No CONNACK within the connect timeout
    Timeout,
    /// Transport closed before the operation completed
    ConnectionClosed,
    /// Session was discarded while the operation was pending
    SessionCleared,
    /// No free packet identifier
    PacketId(PacketIdError),
    Protocol(ProtocolError),
    Io(io::Error),
    /// Client task is gone
    Shutdown,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "Not connected"),
            ClientError::InvalidState(state) => write!(f, "Invalid in state {:?}", state),
            ClientError::ConnectionRefused(reason) => write!(f, "Connection refused: {}", reason),
            ClientError::Timeout => write!(f, "Connect timed out"),
            ClientError::ConnectionClosed => write!(f, "Connection closed"),
            ClientError::SessionCleared => write!(f, "Session cleared"),
            ClientError::PacketId(e) => write!(f, "Packet identifier: {}", e),
            ClientError::Protocol(e) => write!(f, "Protocol error: {}", e),
            ClientError::Io(e) => write!(f, "I/O error: {}", e),
            ClientError::Shutdown => write!(f, "Client shut down"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::PacketId(e) => Some(e),
            ClientError::Protocol(e) => Some(e),
            ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PacketIdError> for ClientError {
    fn from(e: PacketIdError) -> Self {
        ClientError::PacketId(e)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        ClientError::Protocol(e)
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}
