//! vibemq-client - MQTT v3.1.1/v5.0 command line client
//!
//! Usage:
//!   vibemq-client [OPTIONS] <COMMAND>
//!
//! Commands:
//!   pub   Publish messages to a topic
//!   sub   Subscribe to topic filters and print incoming messages
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   -a, --address <ADDR>     Broker address (default: localhost:1883)
//!   -i, --client-id <ID>     Client identifier
//!   --protocol <VER>         Protocol version (v311, v5)
//!   -k, --keep-alive <SECS>  Keep alive in seconds
//!   -l, --log-level          Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vibemq_client::client::{
    Client, ClientError, DisconnectOptions, Event, Events, TcpConnector,
};
use vibemq_client::config::{BrokerConfig, ClientConfig};
use vibemq_client::protocol::{ConnAck, Properties, ProtocolVersion, Publish, QoS, Subscription};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Protocol version for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    /// MQTT 3.1.1
    V311,
    /// MQTT 5.0
    V5,
}

impl From<Protocol> for ProtocolVersion {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::V311 => ProtocolVersion::V311,
            Protocol::V5 => ProtocolVersion::V5,
        }
    }
}

/// vibemq-client - MQTT command line client
#[derive(Parser, Debug)]
#[command(name = "vibemq-client")]
#[command(author = "VibeMQ Contributors")]
#[command(version)]
#[command(about = "MQTT v3.1.1/v5.0 command line client")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address (host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Client identifier
    #[arg(short = 'i', long)]
    client_id: Option<String>,

    /// Protocol version
    #[arg(long, value_enum)]
    protocol: Option<Protocol>,

    /// Keep alive in seconds (0 disables)
    #[arg(short, long)]
    keep_alive: Option<u16>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish messages to a topic
    Pub {
        /// Topic name
        #[arg(short, long)]
        topic: String,

        /// Message payload
        #[arg(short, long)]
        message: String,

        /// QoS level (0, 1, or 2)
        #[arg(short, long, default_value_t = 0)]
        qos: u8,

        /// Set the retain flag
        #[arg(short, long)]
        retain: bool,

        /// Number of messages to publish
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Delay between messages in milliseconds
        #[arg(long, default_value_t = 0)]
        interval: u64,
    },
    /// Subscribe to topic filters and print incoming messages
    Sub {
        /// Topic filter (repeatable)
        #[arg(short, long, required = true)]
        topic: Vec<String>,

        /// Maximum QoS (0, 1, or 2)
        #[arg(short, long, default_value_t = 0)]
        qos: u8,
    },
}

fn parse_qos(value: u8) -> QoS {
    match QoS::from_u8(value) {
        Some(qos) => qos,
        None => {
            eprintln!("Invalid QoS value: {}. Must be 0, 1, or 2.", value);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Missing file means defaults plus env overrides
    let file_config = match &args.config {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::from_env(),
    };
    let mut config = match file_config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - RUST_LOG wins, then CLI, then config
    let level = args
        .log_level
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| config.log.level.to_lowercase());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(address) = args.address {
        config.broker.address = address;
    }
    if let Some(client_id) = args.client_id {
        config.client.client_id = client_id;
    }
    if let Some(protocol) = args.protocol {
        config.client.protocol_version = protocol.into();
    }
    if let Some(keep_alive) = args.keep_alive {
        config.client.keep_alive = keep_alive;
    }
    if args.username.is_some() {
        config.client.username = args.username;
    }
    if args.password.is_some() {
        config.client.password = args.password;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let connector = TcpConnector::new(config.broker.address.clone())
        .with_connect_timeout(config.broker.tcp_timeout);
    let (client, events) = Client::new(config.to_options());

    info!(
        "Connecting to {} as '{}' (MQTT {})",
        config.broker.address, config.client.client_id, config.client.protocol_version
    );

    match args.command {
        Command::Pub {
            topic,
            message,
            qos,
            retain,
            count,
            interval,
        } => {
            let mut publish = Publish::new(topic, Bytes::from(message), parse_qos(qos));
            publish.retain = retain;
            let interval = Duration::from_millis(interval);
            run_publisher(&client, events, &connector, &config.broker, publish, count, interval)
                .await?;
        }
        Command::Sub { topic, qos } => {
            let qos = parse_qos(qos);
            let subscriptions = topic
                .into_iter()
                .map(|filter| Subscription::new(filter, qos))
                .collect();
            run_subscriber(&client, events, &connector, &config.broker, subscriptions).await?;
        }
    }

    Ok(())
}

/// Connect, retrying with exponential backoff
///
/// A CONNACK refusal is returned as is; retrying would be refused again.
async fn connect_with_backoff(
    client: &Client,
    connector: &TcpConnector,
    broker: &BrokerConfig,
) -> Result<ConnAck, ClientError> {
    let mut retry_interval = broker.reconnect_interval;

    loop {
        match client.connect_with(connector).await {
            Ok(connack) => {
                info!(
                    "Connected to {} (session present: {})",
                    connector.address(),
                    connack.session_present
                );
                return Ok(connack);
            }
            Err(e @ ClientError::ConnectionRefused(_)) => return Err(e),
            Err(e) => {
                error!("Connection to {} failed: {}", connector.address(), e);
                debug!("Reconnecting in {:?}", retry_interval);

                // Exponential backoff
                tokio::time::sleep(retry_interval).await;
                retry_interval = std::cmp::min(retry_interval * 2, broker.max_reconnect_interval);
            }
        }
    }
}

async fn run_publisher(
    client: &Client,
    mut events: Events,
    connector: &TcpConnector,
    broker: &BrokerConfig,
    publish: Publish,
    count: u32,
    interval: Duration,
) -> Result<(), ClientError> {
    connect_with_backoff(client, connector, broker).await?;

    let mut n = 0;
    while n < count {
        if n > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        // QoS 1/2 publishes wait for their ack across reconnects
        let outcome = client.publish(publish.clone());
        tokio::pin!(outcome);
        let result = loop {
            tokio::select! {
                result = &mut outcome => break result,
                event = events.recv() => {
                    if matches!(event, Some(Event::Closed) | Some(Event::Disconnect(_))) {
                        warn!("Connection lost, reconnecting");
                        connect_with_backoff(client, connector, broker).await?;
                    }
                }
            }
        };

        match result {
            Ok(result) if result.reason_code.is_error() => {
                warn!("Publish {} rejected: {}", n + 1, result.reason_code);
            }
            Ok(result) => debug!("Publish {} done ({:?})", n + 1, result.packet_id),
            Err(ClientError::NotConnected) => {
                connect_with_backoff(client, connector, broker).await?;
                continue;
            }
            Err(e) => return Err(e),
        }
        n += 1;
    }

    client.disconnect(DisconnectOptions::graceful()).await?;
    info!("Published {} message(s)", count);
    Ok(())
}

async fn run_subscriber(
    client: &Client,
    mut events: Events,
    connector: &TcpConnector,
    broker: &BrokerConfig,
    subscriptions: Vec<Subscription>,
) -> Result<(), ClientError> {
    loop {
        let connack = connect_with_backoff(client, connector, broker).await?;

        if !connack.session_present {
            match client
                .subscribe(subscriptions.clone(), Properties::default())
                .await
            {
                Ok(result) => {
                    for (subscription, reason) in subscriptions.iter().zip(&result.reason_codes) {
                        if reason.is_error() {
                            warn!("Subscription to '{}' refused: {}", subscription.filter, reason);
                        } else {
                            info!("Subscribed to '{}' ({})", subscription.filter, reason);
                        }
                    }
                }
                Err(e) => {
                    warn!("Subscribe failed: {}", e);
                    continue;
                }
            }
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Publish(publish)) => {
                        println!("{} {}", publish.topic, String::from_utf8_lossy(&publish.payload));
                    }
                    Some(Event::Disconnect(disconnect)) => {
                        warn!("Broker disconnected: {}", disconnect.reason_code);
                        break;
                    }
                    Some(Event::Closed) => {
                        warn!("Connection lost");
                        break;
                    }
                    Some(_) => {}
                    None => return Ok(()),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    if let Err(e) = client.disconnect(DisconnectOptions::graceful()).await {
                        debug!("Disconnect: {}", e);
                    }
                    return Ok(());
                }
            }
        }
    }
}
