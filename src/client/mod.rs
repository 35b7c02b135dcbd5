//! MQTT client
//!
//! [`Client`] is a cheap handle; all protocol state lives in one task that
//! the handle talks to over a command channel, so packets, commands and
//! timer expiries are processed strictly one at a time.
//!
//! ```no_run
//! # async fn run() -> Result<(), vibemq_client::ClientError> {
//! use vibemq_client::client::{Client, ClientOptions, TcpConnector};
//! use vibemq_client::protocol::{Publish, QoS};
//!
//! let (client, _events) = Client::new(ClientOptions::new("sensor-1"));
//! client.connect_with(&TcpConnector::new("127.0.0.1:1883")).await?;
//! client.publish(Publish::new("sensors/1", "21.5", QoS::AtLeastOnce)).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod options;
mod task;
mod timer;
mod transport;

#[cfg(test)]
mod tests;

pub use error::ClientError;
pub use event::Event;
pub use options::{ClientOptions, DisconnectMode, DisconnectOptions};
pub use transport::{BoxedTransport, Connector, TcpConnector, Transport};

pub use crate::session::{PublishResult, SubscribeResult, UnsubscribeResult};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Auth, ConnAck, Properties, Publish, Subscription};
use task::ClientTask;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Offline,
    /// CONNECT sent, waiting for CONNACK
    Connecting,
    Online,
}

/// Receiver for [`Event`]s
pub type Events = mpsc::UnboundedReceiver<Event>;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Requests from handles to the client task
pub(crate) enum Command {
    Connect {
        transport: BoxedTransport,
        reply: Reply<ConnAck>,
    },
    Publish {
        publish: Publish,
        /// Resolved with the acknowledgment
        result: oneshot::Sender<PublishResult>,
        /// Resolved once the publish was accepted or rejected
        reply: Reply<()>,
    },
    Subscribe {
        subscriptions: Vec<Subscription>,
        properties: Properties,
        result: oneshot::Sender<SubscribeResult>,
        reply: Reply<()>,
    },
    Unsubscribe {
        filters: Vec<String>,
        properties: Properties,
        result: oneshot::Sender<UnsubscribeResult>,
        reply: Reply<()>,
    },
    Disconnect {
        options: DisconnectOptions,
        reply: Reply<()>,
    },
    Auth {
        auth: Auth,
        reply: Reply<()>,
    },
    PublishInflightCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to a client task
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<ConnectionState>>,
}

impl Client {
    /// Spawn the client task; must be called inside a Tokio runtime
    pub fn new(options: ClientOptions) -> (Client, Events) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Offline));

        let task = ClientTask::new(options, command_rx, event_tx, state.clone());
        tokio::spawn(task.run());

        (
            Client {
                commands: command_tx,
                state,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Send CONNECT over `transport` and wait for CONNACK
    ///
    /// Only legal while offline. When the broker resumed the session, the
    /// packets stored by an earlier connection are sent again right after
    /// CONNACK, ahead of any command issued once this resolves.
    pub async fn connect<T: Transport>(&self, transport: T) -> Result<ConnAck, ClientError> {
        let transport: BoxedTransport = Box::new(transport);
        self.request(|reply| Command::Connect { transport, reply })
            .await
    }

    /// Open a transport with `connector`, then [`connect`](Self::connect)
    pub async fn connect_with(&self, connector: &dyn Connector) -> Result<ConnAck, ClientError> {
        if self.state() != ConnectionState::Offline {
            return Err(ClientError::InvalidState(self.state()));
        }
        let transport = connector.connect().await?;
        self.request(|reply| Command::Connect { transport, reply })
            .await
    }

    /// Publish and wait for the acknowledgment its QoS calls for
    ///
    /// QoS 0 resolves once written, QoS 1 on PUBACK, QoS 2 on PUBCOMP (or
    /// on a PUBREC carrying an error reason). A QoS 1/2 publish survives
    /// transport loss and resolves after the session is resumed.
    pub async fn publish(&self, publish: Publish) -> Result<PublishResult, ClientError> {
        let (result, outcome) = oneshot::channel();
        self.request(|reply| Command::Publish {
            publish,
            result,
            reply,
        })
        .await?;
        outcome.await.map_err(|_| ClientError::SessionCleared)
    }

    pub async fn subscribe(
        &self,
        subscriptions: Vec<Subscription>,
        properties: Properties,
    ) -> Result<SubscribeResult, ClientError> {
        let (result, outcome) = oneshot::channel();
        self.request(|reply| Command::Subscribe {
            subscriptions,
            properties,
            result,
            reply,
        })
        .await?;
        outcome.await.map_err(|_| ClientError::SessionCleared)
    }

    pub async fn unsubscribe(
        &self,
        filters: Vec<String>,
        properties: Properties,
    ) -> Result<UnsubscribeResult, ClientError> {
        let (result, outcome) = oneshot::channel();
        self.request(|reply| Command::Unsubscribe {
            filters,
            properties,
            result,
            reply,
        })
        .await?;
        outcome.await.map_err(|_| ClientError::SessionCleared)
    }

    /// End the connection
    ///
    /// While connecting, the disconnect runs as soon as CONNACK arrives.
    pub async fn disconnect(&self, options: DisconnectOptions) -> Result<(), ClientError> {
        self.request(|reply| Command::Disconnect { options, reply })
            .await
    }

    /// Send AUTH (v5.0 only); the broker's answer arrives as [`Event::Auth`]
    pub async fn auth(&self, auth: Auth) -> Result<(), ClientError> {
        self.request(|reply| Command::Auth { auth, reply }).await
    }

    /// Outbound QoS 1/2 messages not yet fully acknowledged
    pub async fn publish_inflight_count(&self) -> Result<usize, ClientError> {
        let (reply, count) = oneshot::channel();
        self.commands
            .send(Command::PublishInflightCount { reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        count.await.map_err(|_| ClientError::Shutdown)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        response.await.map_err(|_| ClientError::Shutdown)?
    }
}
