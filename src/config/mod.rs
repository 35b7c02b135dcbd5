//! Configuration Module
//!
//! TOML configuration for the command line client:
//! - Logging
//! - Broker address and reconnect backoff
//! - Connection options (identity, keep alive, v5.0 negotiation, timeouts)
//! - Optional will message
//! - Environment variable overrides (VIBEMQ_CLIENT__* prefix)

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::client::ClientOptions;
use crate::protocol::{ProtocolVersion, QoS, Will};


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Logging configuration
    pub log: LogConfig,
    /// Where to connect and how to retry
    pub broker: BrokerConfig,
    /// MQTT connection options
    pub client: ConnectionConfig,
    /// Will message published by the broker if the client vanishes
    pub will: Option<WillConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Broker address and reconnect policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// host:port
    pub address: String,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub tcp_timeout: Duration,
    /// First reconnect delay
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// Upper bound for the exponential backoff
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:1883".to_string(),
            tcp_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
        }
    }
}

/// Options carried into [`ClientOptions`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Empty lets a v5.0 broker assign one
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    /// Keep alive in seconds, 0 disables
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Session expiry in seconds (v5.0)
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    /// Aliases the broker may use towards this client (v5.0)
    pub topic_alias_maximum: u16,
    /// Cap on aliases this client uses towards the broker (v5.0)
    pub outbound_topic_alias_maximum: u16,
    pub request_problem_information: Option<bool>,
    pub request_response_information: Option<bool>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub disconnect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pingresp_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            client_id: format!("vibemq-client-{}", std::process::id()),
            protocol_version: options.protocol_version,
            clean_start: options.clean_start,
            keep_alive: options.keep_alive,
            username: None,
            password: None,
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: options.topic_alias_maximum,
            outbound_topic_alias_maximum: options.outbound_topic_alias_maximum,
            request_problem_information: None,
            request_response_information: None,
            connect_timeout: options.connect_timeout,
            disconnect_timeout: options.disconnect_timeout,
            pingresp_timeout: options.pingresp_timeout,
        }
    }
}

/// Will message
#[derive(Debug, Clone, Deserialize)]
pub struct WillConfig {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

impl ClientConfig {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMQ_CLIENT__` prefix with double underscores for nesting:
    ///    - `VIBEMQ_CLIENT__BROKER__ADDRESS=broker:1884` overrides `broker.address`
    ///    - `VIBEMQ_CLIENT__CLIENT__KEEP_ALIVE=30` overrides `client.keep_alive`
    ///
    /// A missing file is not an error; defaults and env vars still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMQ_CLIENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ClientConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.address.is_empty() {
            return Err(ConfigError::Validation(
                "broker.address must not be empty".to_string(),
            ));
        }
        if self.broker.max_reconnect_interval < self.broker.reconnect_interval {
            return Err(ConfigError::Validation(
                "broker.max_reconnect_interval must be >= broker.reconnect_interval".to_string(),
            ));
        }

        let client = &self.client;
        if client.client_id.is_empty()
            && client.protocol_version == ProtocolVersion::V311
            && !client.clean_start
        {
            return Err(ConfigError::Validation(
                "MQTT 3.1.1 requires clean_start with an empty client_id".to_string(),
            ));
        }
        if client.password.is_some() && client.username.is_none() {
            return Err(ConfigError::Validation(
                "client.password requires client.username".to_string(),
            ));
        }
        if client.receive_maximum == Some(0) {
            return Err(ConfigError::Validation(
                "client.receive_maximum must be > 0".to_string(),
            ));
        }
        if client.maximum_packet_size == Some(0) {
            return Err(ConfigError::Validation(
                "client.maximum_packet_size must be > 0".to_string(),
            ));
        }

        if let Some(will) = &self.will {
            if will.topic.is_empty() {
                return Err(ConfigError::Validation(
                    "will.topic must not be empty".to_string(),
                ));
            }
            if QoS::from_u8(will.qos).is_none() {
                return Err(ConfigError::Validation(
                    "will.qos must be 0, 1, or 2".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Client options described by this configuration
    pub fn to_options(&self) -> ClientOptions {
        let client = &self.client;
        let will = self.will.as_ref().map(|will| Will {
            topic: will.topic.clone(),
            payload: Bytes::from(will.payload.clone()),
            qos: QoS::from_u8(will.qos).unwrap_or_default(),
            retain: will.retain,
            ..Default::default()
        });

        ClientOptions {
            client_id: client.client_id.clone(),
            protocol_version: client.protocol_version,
            clean_start: client.clean_start,
            keep_alive: client.keep_alive,
            username: client.username.clone(),
            password: client.password.clone().map(Bytes::from),
            will,
            session_expiry_interval: client.session_expiry_interval,
            receive_maximum: client.receive_maximum,
            maximum_packet_size: client.maximum_packet_size,
            topic_alias_maximum: client.topic_alias_maximum,
            outbound_topic_alias_maximum: client.outbound_topic_alias_maximum,
            request_problem_information: client.request_problem_information,
            request_response_information: client.request_response_information,
            connect_timeout: client.connect_timeout,
            disconnect_timeout: client.disconnect_timeout,
            pingresp_timeout: client.pingresp_timeout,
            ..Default::default()
        }
    }
}
