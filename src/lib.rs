//! vibemq-client - MQTT v3.1.1/v5.0 client protocol engine
//!
//! Packet codec, session state and a connection state machine that runs
//! over any ordered byte stream. QoS 1/2 deliveries survive transport loss
//! and are resent when the broker resumes the session.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod packet_id;
pub mod protocol;
pub mod session;
pub mod store;
pub mod topic_alias;

pub use client::{
    Client, ClientError, ClientOptions, ConnectionState, DisconnectOptions, Event, Events,
};
pub use config::ClientConfig;
pub use protocol::{ProtocolVersion, QoS};
