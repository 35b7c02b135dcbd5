//! Client and disconnect options

use std::time::Duration;

use bytes::Bytes;

use crate::protocol::{Connect, Properties, ProtocolVersion, ReasonCode, Will};

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// May be empty under v5.0, in which case the broker assigns one
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    /// Requested keep alive in seconds; 0 disables keep alive
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<Will>,
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    /// Largest packet this client accepts; also bounds the frame reader
    pub maximum_packet_size: Option<u32>,
    /// Inbound aliases the broker may use (advertised in CONNECT)
    pub topic_alias_maximum: u16,
    /// Upper bound on outbound aliases; the broker's CONNACK value shrinks it
    pub outbound_topic_alias_maximum: u16,
    pub request_problem_information: Option<bool>,
    pub request_response_information: Option<bool>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Bytes>,
    pub user_properties: Vec<(String, String)>,
    pub connect_timeout: Duration,
    /// How long a graceful disconnect waits for the broker to close
    pub disconnect_timeout: Duration,
    pub pingresp_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            protocol_version: ProtocolVersion::V5,
            clean_start: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: 0,
            outbound_topic_alias_maximum: u16::MAX,
            request_problem_information: None,
            request_response_information: None,
            authentication_method: None,
            authentication_data: None,
            user_properties: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
            pingresp_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.clean_start = clean_start;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: u16) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Bytes>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn with_topic_alias_maximum(mut self, maximum: u16) -> Self {
        self.topic_alias_maximum = maximum;
        self
    }

    /// CONNECT for the given client identifier
    ///
    /// v5.0-only fields are left out of a v3.1.1 CONNECT entirely.
    pub(crate) fn connect_packet(&self, client_id: &str) -> Connect {
        let mut will = self.will.clone();
        let mut properties = Properties::default();

        match self.protocol_version {
            ProtocolVersion::V5 => {
                properties.session_expiry_interval = self.session_expiry_interval;
                properties.receive_maximum = self.receive_maximum;
                properties.maximum_packet_size = self.maximum_packet_size;
                properties.topic_alias_maximum =
                    (self.topic_alias_maximum > 0).then_some(self.topic_alias_maximum);
                properties.request_problem_information =
                    self.request_problem_information.map(u8::from);
                properties.request_response_information =
                    self.request_response_information.map(u8::from);
                properties.authentication_method = self.authentication_method.clone();
                properties.authentication_data = self.authentication_data.clone();
                properties.user_properties = self.user_properties.clone();
            }
            ProtocolVersion::V311 => {
                if let Some(will) = will.as_mut() {
                    will.properties = Properties::default();
                }
            }
        }

        Connect {
            protocol_version: self.protocol_version,
            client_id: client_id.to_owned(),
            clean_start: self.clean_start,
            keep_alive: self.keep_alive,
            username: self.username.clone(),
            password: self.password.clone(),
            will,
            properties,
        }
    }
}

/// How to end a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectMode {
    /// Send DISCONNECT, then wait for the broker to close the transport
    #[default]
    Graceful,
    /// Close the transport without sending anything
    Force,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectOptions {
    pub mode: DisconnectMode,
    /// v5.0 only
    pub reason_code: ReasonCode,
    /// v5.0 only
    pub properties: Properties,
}

impl DisconnectOptions {
    pub fn graceful() -> Self {
        Self::default()
    }

    pub fn force() -> Self {
        Self {
            mode: DisconnectMode::Force,
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason_code: ReasonCode) -> Self {
        self.reason_code = reason_code;
        self
    }
}
