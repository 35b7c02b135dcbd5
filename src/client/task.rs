//! Client task
//!
//! Owns the session, the current connection and the timers. Commands from
//! [`Client`](super::Client) handles, frames from the connection's reader
//! task and timer expiries are handled one at a time in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::options::{ClientOptions, DisconnectMode, DisconnectOptions};
use super::timer::Timers;
use super::transport::BoxedTransport;
use super::{ClientError, Command, ConnectionState, Event, Reply};
use crate::codec::{Decoder, Encoder, Frame, FrameError, FrameReader};
use crate::protocol::{
    Auth, ConnAck, DecodeError, Disconnect, EncodeError, Packet, PacketType, Properties,
    ProtocolError, ProtocolVersion, PubAck, PubComp, PubRec, PubRel, Publish, QoS, ReasonCode,
    SubAck, Subscribe, Subscription, UnsubAck, Unsubscribe,
};
use crate::session::{PublishResult, Session, SubscribeResult, UnsubscribeResult};
use crate::store::StoredPacket;
use crate::topic_alias::{TopicAlias, TopicAliasManager};

/// Frame (or end of stream) from a connection's reader task
struct Inbound {
    generation: u64,
    frame: Result<Option<Frame>, FrameError>,
}

/// Acknowledgment an outbound packet id is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    PubAck,
    PubRec,
    PubComp,
}

pub(crate) struct ClientTask {
    options: ClientOptions,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<Event>,
    shared_state: Arc<RwLock<ConnectionState>>,
    state: ConnectionState,

    session: Session,
    encoder: Encoder,
    decoder: Decoder,

    /// Bumped on every connect and teardown; frames tagged with an older
    /// generation belong to a dead connection
    generation: u64,
    writer: Option<WriteHalf<BoxedTransport>>,
    reader: Option<JoinHandle<()>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,

    /// Effective keep alive in seconds, 0 until CONNACK
    keep_alive: u16,
    outbound_aliases: Option<TopicAliasManager>,
    inbound_aliases: HashMap<u16, String>,
    timers: Timers,

    pending_connect: Option<Reply<ConnAck>>,
    deferred_disconnect: Option<(DisconnectOptions, Reply<()>)>,
    /// Graceful disconnect waiting for the broker to close
    closing: Option<Reply<()>>,
}

impl ClientTask {
    pub fn new(
        options: ClientOptions,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<Event>,
        shared_state: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let version = options.protocol_version;

        Self {
            session: Session::new(options.client_id.clone()),
            encoder: Encoder::new(version),
            decoder: Decoder::new(version),
            options,
            commands,
            events,
            shared_state,
            state: ConnectionState::Offline,
            generation: 0,
            writer: None,
            reader: None,
            inbound_tx,
            inbound_rx,
            keep_alive: 0,
            outbound_aliases: None,
            inbound_aliases: HashMap::new(),
            timers: Timers::default(),
            pending_connect: None,
            deferred_disconnect: None,
            closing: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(inbound) = self.inbound_rx.recv() => {
                    if inbound.generation == self.generation {
                        self.handle_inbound(inbound.frame).await;
                    }
                }
                _ = self.timers.connect.expired() => self.on_connect_timeout(),
                _ = self.timers.keep_alive.expired() => self.on_keep_alive().await,
                _ = self.timers.pingresp.expired() => self.on_pingresp_timeout(),
                _ = self.timers.disconnect.expired() => self.on_disconnect_timeout(),
            }
        }

        debug!("Client '{}': all handles dropped, stopping", self.session.client_id());
        self.teardown(false);
    }

    fn version(&self) -> ProtocolVersion {
        self.options.protocol_version
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        *self.shared_state.write() = state;
    }

    fn emit(&self, event: Event) {
        // receiver may be gone; events are best effort
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { transport, reply } => self.connect(transport, reply).await,
            Command::Publish {
                publish,
                result,
                reply,
            } => {
                let accepted = self.publish(publish, result).await;
                let _ = reply.send(accepted);
            }
            Command::Subscribe {
                subscriptions,
                properties,
                result,
                reply,
            } => {
                let accepted = self.subscribe(subscriptions, properties, result).await;
                let _ = reply.send(accepted);
            }
            Command::Unsubscribe {
                filters,
                properties,
                result,
                reply,
            } => {
                let accepted = self.unsubscribe(filters, properties, result).await;
                let _ = reply.send(accepted);
            }
            Command::Disconnect { options, reply } => self.disconnect(options, reply).await,
            Command::Auth { auth, reply } => {
                let sent = self.auth(auth).await;
                let _ = reply.send(sent);
            }
            Command::PublishInflightCount { reply } => {
                let _ = reply.send(self.session.publish_inflight_count());
            }
        }
    }

    async fn connect(&mut self, transport: BoxedTransport, reply: Reply<ConnAck>) {
        if self.state != ConnectionState::Offline {
            let _ = reply.send(Err(ClientError::InvalidState(self.state)));
            return;
        }
        // a graceful close still draining is cut short
        if self.closing.is_some() {
            self.teardown(false);
        }

        self.generation += 1;
        self.encoder.set_protocol_version(self.version());
        self.decoder.set_protocol_version(self.version());
        let (read_half, write_half) = tokio::io::split(transport);
        let max_packet_size = self
            .options
            .maximum_packet_size
            .map_or(usize::MAX, |size| size as usize);
        self.reader = Some(spawn_reader(
            read_half,
            max_packet_size,
            self.generation,
            self.inbound_tx.clone(),
        ));
        self.writer = Some(write_half);

        self.keep_alive = 0;
        self.inbound_aliases.clear();
        self.outbound_aliases = (self.version() == ProtocolVersion::V5
            && self.options.outbound_topic_alias_maximum > 0)
            .then(|| TopicAliasManager::new(self.options.outbound_topic_alias_maximum));

        let connect = self.options.connect_packet(self.session.client_id());
        info!(
            "Client '{}': connecting (MQTT {}, clean_start={})",
            connect.client_id, connect.protocol_version, connect.clean_start
        );

        self.set_state(ConnectionState::Connecting);
        self.timers.connect.arm(self.options.connect_timeout);
        self.pending_connect = Some(reply);

        // on failure `send` has torn down and failed the pending connect
        let _ = self.send(&Packet::Connect(Box::new(connect))).await;
    }

    async fn publish(
        &mut self,
        mut publish: Publish,
        result: oneshot::Sender<PublishResult>,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Online {
            return Err(ClientError::NotConnected);
        }
        publish.dup = false;
        publish.properties.topic_alias = None;

        if publish.qos == QoS::AtMostOnce {
            publish.packet_id = None;
            let (wire, assigned) =
                apply_outbound_alias(self.outbound_aliases.as_ref(), publish).await;
            if let Err(e) = self.send(&Packet::Publish(wire)).await {
                self.forget_unsent_alias(&e, assigned).await;
                return Err(e);
            }
            let _ = result.send(PublishResult {
                packet_id: None,
                reason_code: ReasonCode::Success,
                reason_string: None,
            });
            return Ok(());
        }

        let packet_id = self.session.acquire_packet_id()?;
        publish.packet_id = Some(packet_id);
        // the full topic is stored; an alias is only valid on this connection
        self.session.store_publish(packet_id, publish.clone(), result);
        let (wire, assigned) =
            apply_outbound_alias(self.outbound_aliases.as_ref(), publish).await;

        match self.send(&Packet::Publish(wire)).await {
            Ok(()) => Ok(()),
            Err(e @ ClientError::Protocol(_)) => {
                self.forget_unsent_alias(&e, assigned).await;
                self.session.take_publish_handle(packet_id);
                self.session.discard(packet_id);
                Err(e)
            }
            Err(e) => {
                debug!(
                    "Client '{}': publish {} stored for resend after {}",
                    self.session.client_id(),
                    packet_id,
                    e
                );
                Ok(())
            }
        }
    }

    /// Undo an alias assigned to a publish that never reached the wire
    ///
    /// Only encode failures leave the connection up; after an I/O error the
    /// alias table went away with it.
    async fn forget_unsent_alias(&mut self, error: &ClientError, assigned: Option<String>) {
        let (ClientError::Protocol(_), Some(topic)) = (error, assigned) else {
            return;
        };
        if let Some(aliases) = self.outbound_aliases.as_ref() {
            aliases.release_topic(&topic).await;
            trace!(
                "Client '{}': alias for '{}' released, publish not sent",
                self.session.client_id(),
                topic
            );
        }
    }

    async fn subscribe(
        &mut self,
        subscriptions: Vec<Subscription>,
        properties: Properties,
        result: oneshot::Sender<SubscribeResult>,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Online {
            return Err(ClientError::NotConnected);
        }
        let packet_id = self.session.acquire_packet_id()?;
        self.session.store_subscribe(packet_id, result);

        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions,
            properties,
        });
        if let Err(e) = self.send(&packet).await {
            self.session.take_subscribe_handle(packet_id);
            self.session.discard(packet_id);
            return Err(e);
        }
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        filters: Vec<String>,
        properties: Properties,
        result: oneshot::Sender<UnsubscribeResult>,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Online {
            return Err(ClientError::NotConnected);
        }
        let packet_id = self.session.acquire_packet_id()?;
        self.session.store_unsubscribe(packet_id, result);

        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id,
            filters,
            properties,
        });
        if let Err(e) = self.send(&packet).await {
            self.session.take_unsubscribe_handle(packet_id);
            self.session.discard(packet_id);
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&mut self, options: DisconnectOptions, reply: Reply<()>) {
        match self.state {
            ConnectionState::Offline => {
                let _ = reply.send(Err(ClientError::NotConnected));
            }
            ConnectionState::Connecting => {
                if self.deferred_disconnect.is_some() {
                    let _ = reply.send(Err(ClientError::InvalidState(self.state)));
                } else {
                    debug!(
                        "Client '{}': disconnect deferred until CONNACK",
                        self.session.client_id()
                    );
                    self.deferred_disconnect = Some((options, reply));
                }
            }
            ConnectionState::Online => match options.mode {
                DisconnectMode::Force => {
                    info!("Client '{}': disconnecting (forced)", self.session.client_id());
                    self.teardown(false);
                    let _ = reply.send(Ok(()));
                }
                DisconnectMode::Graceful => {
                    info!("Client '{}': disconnecting", self.session.client_id());
                    let packet = Packet::Disconnect(Disconnect {
                        reason_code: options.reason_code,
                        properties: options.properties,
                    });
                    if self.send(&packet).await.is_err() {
                        // connection already gone
                        let _ = reply.send(Ok(()));
                        return;
                    }
                    if let Some(writer) = self.writer.as_mut() {
                        let _ = writer.shutdown().await;
                    }
                    self.timers.keep_alive.cancel();
                    self.timers.pingresp.cancel();
                    self.timers.disconnect.arm(self.options.disconnect_timeout);
                    self.set_state(ConnectionState::Offline);
                    self.closing = Some(reply);
                }
            },
        }
    }

    async fn auth(&mut self, auth: Auth) -> Result<(), ClientError> {
        if self.version() != ProtocolVersion::V5 {
            return Err(ProtocolError::Encode(EncodeError::UnsupportedPacket(
                PacketType::Auth,
                self.version(),
            ))
            .into());
        }
        if self.state == ConnectionState::Offline {
            return Err(ClientError::NotConnected);
        }
        self.send(&Packet::Auth(auth)).await
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Encode and write one packet; a write failure tears the connection down
    async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let mut buf = BytesMut::new();
        self.encoder
            .encode(packet, &mut buf)
            .map_err(ProtocolError::from)?;

        let Some(writer) = self.writer.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        trace!(
            "Client '{}': sending {:?} ({} bytes)",
            self.session.client_id(),
            packet.packet_type(),
            buf.len()
        );

        let written = match writer.write_all(&buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Client '{}': write failed: {}", self.session.client_id(), e);
            self.teardown(true);
            return Err(ClientError::Io(e));
        }

        if self.state == ConnectionState::Online && self.keep_alive > 0 {
            self.timers
                .keep_alive
                .arm(Duration::from_secs(self.keep_alive as u64));
        }
        Ok(())
    }

    /// Drop the current connection
    ///
    /// In-flight publishes stay in the session. A pending connect fails,
    /// pending disconnects succeed.
    fn teardown(&mut self, emit_closed: bool) {
        let was_connected = self.writer.is_some() || self.reader.is_some();

        self.generation += 1;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        self.timers.cancel_all();
        self.keep_alive = 0;
        self.outbound_aliases = None;
        self.inbound_aliases.clear();
        self.set_state(ConnectionState::Offline);

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(ClientError::ConnectionClosed));
        }
        if let Some((_, reply)) = self.deferred_disconnect.take() {
            let _ = reply.send(Ok(()));
        }
        if let Some(reply) = self.closing.take() {
            let _ = reply.send(Ok(()));
        }

        if was_connected {
            debug!("Client '{}': connection closed", self.session.client_id());
            if emit_closed {
                self.emit(Event::Closed);
            }
        }
    }

    /// Close after the broker broke the protocol, telling it why under v5.0
    async fn protocol_violation(&mut self, reason_code: ReasonCode, error: ProtocolError) {
        error!("Client '{}': {}", self.session.client_id(), error);
        if self.version() == ProtocolVersion::V5 && self.writer.is_some() {
            let packet = Packet::Disconnect(Disconnect {
                reason_code,
                properties: Properties::default(),
            });
            let _ = self.send(&packet).await;
        }
        self.teardown(true);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn handle_inbound(&mut self, frame: Result<Option<Frame>, FrameError>) {
        match frame {
            // brokers never send CONNECT; reject it before the body is parsed
            Ok(Some(frame)) if frame.header >> 4 == PacketType::Connect as u8 => {
                let unexpected = ProtocolError::UnexpectedPacket(PacketType::Connect);
                self.protocol_violation(ReasonCode::ProtocolError, unexpected)
                    .await;
            }
            Ok(Some(frame)) => match self.decoder.decode_frame(frame.header, &frame.body) {
                Ok(packet) => self.handle_packet(packet).await,
                Err(e) => self.decode_failure(e).await,
            },
            Ok(None) => {
                let expected = self.closing.is_some();
                if !expected {
                    info!("Client '{}': broker closed the connection", self.session.client_id());
                }
                self.teardown(!expected);
            }
            Err(FrameError::Io(e)) => {
                let expected = self.closing.is_some();
                if !expected {
                    warn!("Client '{}': read failed: {}", self.session.client_id(), e);
                }
                self.teardown(!expected);
            }
            Err(FrameError::Decode(e)) => self.decode_failure(e).await,
        }
    }

    async fn decode_failure(&mut self, error: DecodeError) {
        let reason_code = match error {
            DecodeError::PacketTooLarge(_) => ReasonCode::PacketTooLarge,
            _ => ReasonCode::MalformedPacket,
        };
        self.protocol_violation(reason_code, error.into()).await;
    }

    async fn handle_packet(&mut self, packet: Packet) {
        trace!(
            "Client '{}': received {:?}",
            self.session.client_id(),
            packet.packet_type()
        );

        let allowed = match self.state {
            ConnectionState::Connecting => matches!(
                packet,
                Packet::ConnAck(_) | Packet::Auth(_) | Packet::Disconnect(_)
            ),
            _ => !matches!(packet, Packet::ConnAck(_)),
        };
        if !allowed {
            let unexpected = ProtocolError::UnexpectedPacket(packet.packet_type());
            self.protocol_violation(ReasonCode::ProtocolError, unexpected)
                .await;
            return;
        }

        match packet {
            Packet::ConnAck(connack) => self.on_connack(connack).await,
            Packet::Publish(publish) => self.on_publish(publish).await,
            Packet::PubAck(ack) => self.on_puback(ack),
            Packet::PubRec(rec) => self.on_pubrec(rec).await,
            Packet::PubRel(rel) => self.on_pubrel(rel).await,
            Packet::PubComp(comp) => self.on_pubcomp(comp),
            Packet::SubAck(ack) => self.on_suback(ack),
            Packet::UnsubAck(ack) => self.on_unsuback(ack),
            Packet::PingResp => self.timers.pingresp.cancel(),
            Packet::Disconnect(disconnect) => self.on_disconnect(disconnect),
            Packet::Auth(auth) => self.emit(Event::Auth(auth)),
            Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq => {
                let unexpected = ProtocolError::UnexpectedPacket(packet.packet_type());
                self.protocol_violation(ReasonCode::ProtocolError, unexpected)
                    .await;
            }
        }
    }

    async fn on_connack(&mut self, connack: ConnAck) {
        self.timers.connect.cancel();
        self.emit(Event::Connack(connack.clone()));

        if connack.reason_code.is_error() {
            warn!(
                "Client '{}': connection refused: {}",
                self.session.client_id(),
                connack.reason_code
            );
            let reply = self.pending_connect.take();
            self.teardown(false);
            if let Some(reply) = reply {
                let _ = reply.send(Err(ClientError::ConnectionRefused(connack.reason_code)));
            }
            return;
        }

        let props = &connack.properties;
        self.keep_alive = match props.server_keep_alive {
            Some(server) => self.options.keep_alive.min(server),
            None => self.options.keep_alive,
        };

        let alias_maximum = props.topic_alias_maximum.unwrap_or(0);
        if alias_maximum == 0 {
            self.outbound_aliases = None;
        } else if let Some(aliases) = &self.outbound_aliases {
            aliases.shrink(alias_maximum).await;
        }

        let client_id = props
            .assigned_client_identifier
            .clone()
            .unwrap_or_else(|| self.session.client_id().to_owned());
        if connack.session_present {
            self.session.set_client_id(client_id);
        } else {
            self.session.clear_all_stores(client_id);
        }

        self.set_state(ConnectionState::Online);
        info!(
            "Client '{}': connected (session_present={}, keep_alive={}s)",
            self.session.client_id(),
            connack.session_present,
            self.keep_alive
        );
        if self.keep_alive > 0 {
            self.timers
                .keep_alive
                .arm(Duration::from_secs(self.keep_alive as u64));
        }

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(connack));
        }

        let replay = self.session.resend_targets();
        if !replay.is_empty() {
            debug!(
                "Client '{}': resending {} stored packets",
                self.session.client_id(),
                replay.len()
            );
        }
        for packet in replay {
            if self.send(&packet).await.is_err() {
                return;
            }
        }

        if let Some((options, reply)) = self.deferred_disconnect.take() {
            self.disconnect(options, reply).await;
        }
    }

    async fn on_publish(&mut self, mut publish: Publish) {
        if self.version() == ProtocolVersion::V5 {
            if let Err(e) = self.resolve_inbound_alias(&mut publish) {
                self.protocol_violation(ReasonCode::TopicAliasInvalid, e)
                    .await;
                return;
            }
        }

        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => {
                let _ = self.send(&Packet::PubAck(PubAck::new(packet_id))).await;
                self.emit(Event::Publish(publish));
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                if publish.dup && self.session.has_incoming(packet_id) {
                    debug!(
                        "Client '{}': duplicate QoS 2 publish {} not delivered",
                        self.session.client_id(),
                        packet_id
                    );
                } else {
                    self.session.store_incoming(packet_id);
                    self.emit(Event::Publish(publish));
                }
                let _ = self.send(&Packet::PubRec(PubRec::new(packet_id))).await;
            }
            _ => self.emit(Event::Publish(publish)),
        }
    }

    /// Replace an inbound alias with its topic, or learn a new alias
    fn resolve_inbound_alias(&mut self, publish: &mut Publish) -> Result<(), ProtocolError> {
        let Some(alias) = publish.properties.topic_alias else {
            return Ok(());
        };
        if alias > self.options.topic_alias_maximum {
            return Err(ProtocolError::TopicAliasOutOfRange(alias));
        }

        if publish.topic.is_empty() {
            publish.topic = self
                .inbound_aliases
                .get(&alias)
                .cloned()
                .ok_or(ProtocolError::UnknownTopicAlias(alias))?;
        } else {
            self.inbound_aliases.insert(alias, publish.topic.clone());
        }
        Ok(())
    }

    fn awaiting(&self, packet_id: u16) -> Option<Awaiting> {
        match self.session.outgoing(packet_id)? {
            StoredPacket::Publish(p) if p.qos == QoS::AtLeastOnce => Some(Awaiting::PubAck),
            StoredPacket::Publish(p) if p.qos == QoS::ExactlyOnce => Some(Awaiting::PubRec),
            StoredPacket::Publish(_) => None,
            StoredPacket::PubRel(_) => Some(Awaiting::PubComp),
        }
    }

    /// Finish an outbound publish and hand its result to the caller
    fn complete_publish(
        &mut self,
        packet_id: u16,
        reason_code: ReasonCode,
        properties: Properties,
    ) {
        self.session.discard(packet_id);
        if let Some(handle) = self.session.take_publish_handle(packet_id) {
            let _ = handle.send(PublishResult {
                packet_id: Some(packet_id),
                reason_code,
                reason_string: properties.reason_string,
            });
        }
    }

    fn unknown_packet_id(&self, kind: PacketType, packet_id: u16) {
        warn!(
            "Client '{}': {:?} for unknown packet id {}",
            self.session.client_id(),
            kind,
            packet_id
        );
    }

    fn on_puback(&mut self, ack: PubAck) {
        if self.awaiting(ack.packet_id) != Some(Awaiting::PubAck) {
            self.unknown_packet_id(PacketType::PubAck, ack.packet_id);
            return;
        }
        self.complete_publish(ack.packet_id, ack.reason_code, ack.properties);
    }

    async fn on_pubrec(&mut self, rec: PubRec) {
        let packet_id = rec.packet_id;
        match self.awaiting(packet_id) {
            Some(Awaiting::PubRec) if rec.reason_code.is_error() => {
                self.complete_publish(packet_id, rec.reason_code, rec.properties);
            }
            // a repeated PUBREC gets the PUBREL again
            Some(Awaiting::PubRec) | Some(Awaiting::PubComp) => {
                let pubrel = PubRel::new(packet_id);
                self.session.store_pubrel(packet_id, pubrel.clone());
                let _ = self.send(&Packet::PubRel(pubrel)).await;
            }
            _ => {
                self.unknown_packet_id(PacketType::PubRec, packet_id);
                if self.version() == ProtocolVersion::V5 {
                    let pubrel = PubRel::with_reason(packet_id, ReasonCode::PacketIdNotFound);
                    let _ = self.send(&Packet::PubRel(pubrel)).await;
                }
            }
        }
    }

    async fn on_pubrel(&mut self, rel: PubRel) {
        let packet_id = rel.packet_id;
        if self.session.discard_incoming(packet_id) {
            let _ = self.send(&Packet::PubComp(PubComp::new(packet_id))).await;
            return;
        }

        self.unknown_packet_id(PacketType::PubRel, packet_id);
        if self.version() == ProtocolVersion::V5 {
            let pubcomp = PubComp::with_reason(packet_id, ReasonCode::PacketIdNotFound);
            let _ = self.send(&Packet::PubComp(pubcomp)).await;
        }
    }

    fn on_pubcomp(&mut self, comp: PubComp) {
        if self.awaiting(comp.packet_id) != Some(Awaiting::PubComp) {
            self.unknown_packet_id(PacketType::PubComp, comp.packet_id);
            return;
        }
        self.complete_publish(comp.packet_id, comp.reason_code, comp.properties);
    }

    fn on_suback(&mut self, ack: SubAck) {
        let Some(handle) = self.session.take_subscribe_handle(ack.packet_id) else {
            self.unknown_packet_id(PacketType::SubAck, ack.packet_id);
            return;
        };
        self.session.discard(ack.packet_id);
        let _ = handle.send(SubscribeResult {
            packet_id: ack.packet_id,
            reason_codes: ack.reason_codes,
            reason_string: ack.properties.reason_string,
        });
    }

    fn on_unsuback(&mut self, ack: UnsubAck) {
        let Some(handle) = self.session.take_unsubscribe_handle(ack.packet_id) else {
            self.unknown_packet_id(PacketType::UnsubAck, ack.packet_id);
            return;
        };
        self.session.discard(ack.packet_id);
        let _ = handle.send(UnsubscribeResult {
            packet_id: ack.packet_id,
            reason_codes: ack.reason_codes,
            reason_string: ack.properties.reason_string,
        });
    }

    fn on_disconnect(&mut self, disconnect: Disconnect) {
        warn!(
            "Client '{}': broker sent DISCONNECT: {}",
            self.session.client_id(),
            disconnect.reason_code
        );
        self.emit(Event::Disconnect(disconnect));
        self.teardown(false);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_connect_timeout(&mut self) {
        self.timers.connect.cancel();
        warn!("Client '{}': no CONNACK, giving up", self.session.client_id());
        let reply = self.pending_connect.take();
        self.teardown(false);
        if let Some(reply) = reply {
            let _ = reply.send(Err(ClientError::Timeout));
        }
    }

    async fn on_keep_alive(&mut self) {
        self.timers.keep_alive.cancel();
        if self.state != ConnectionState::Online || self.keep_alive == 0 {
            return;
        }
        if self.timers.pingresp.is_armed() {
            // a ping is already outstanding
            self.timers
                .keep_alive
                .arm(Duration::from_secs(self.keep_alive as u64));
            return;
        }
        if self.send(&Packet::PingReq).await.is_ok() {
            self.timers.pingresp.arm(self.options.pingresp_timeout);
        }
    }

    fn on_pingresp_timeout(&mut self) {
        self.timers.pingresp.cancel();
        warn!("Client '{}': no PINGRESP, closing", self.session.client_id());
        self.teardown(true);
    }

    fn on_disconnect_timeout(&mut self) {
        self.timers.disconnect.cancel();
        debug!(
            "Client '{}': broker did not close after DISCONNECT, closing",
            self.session.client_id()
        );
        self.teardown(false);
    }
}

/// Swap the topic for an alias when the broker allows aliases
///
/// A newly assigned alias travels with the full topic; later publishes on
/// the same topic carry the alias and an empty topic. The topic is returned
/// alongside when this call assigned its alias.
async fn apply_outbound_alias(
    aliases: Option<&TopicAliasManager>,
    mut publish: Publish,
) -> (Publish, Option<String>) {
    let Some(aliases) = aliases else {
        return (publish, None);
    };
    match aliases.get_topic_id(&publish.topic).await {
        Some(TopicAlias {
            generated: true,
            alias,
        }) => {
            publish.properties.topic_alias = Some(alias);
            let topic = publish.topic.clone();
            (publish, Some(topic))
        }
        Some(TopicAlias { alias, .. }) => {
            publish.properties.topic_alias = Some(alias);
            publish.topic.clear();
            (publish, None)
        }
        None => (publish, None),
    }
}

/// Read whole frames until end of stream or error, forwarding each
fn spawn_reader(
    read_half: ReadHalf<BoxedTransport>,
    max_packet_size: usize,
    generation: u64,
    inbound: mpsc::Sender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = FrameReader::new(read_half).with_max_packet_size(max_packet_size);
        loop {
            let frame = reader.read_frame().await;
            let last = !matches!(frame, Ok(Some(_)));
            if inbound.send(Inbound { generation, frame }).await.is_err() || last {
                break;
            }
        }
    })
}
