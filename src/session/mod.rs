//! MQTT Session
//!
//! Client-side session state that outlives a single connection when the
//! broker resumes it: packet identifier allocation, the delivery stores and
//! the result handles of operations still waiting for an acknowledgment.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use crate::packet_id::{PacketIdError, PacketIdProvider};
use crate::protocol::{Packet, PubRel, Publish, ReasonCode};
use crate::store::{
    IncomingStore, MemoryIncomingStore, MemoryOutgoingStore, OutgoingStore, StoredPacket,
};

/// Outcome of an acknowledged QoS 1/2 publish (or a transmitted QoS 0 one)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub packet_id: Option<u16>,
    /// PUBACK / PUBREC / PUBCOMP reason (Success under v3.1.1)
    pub reason_code: ReasonCode,
    pub reason_string: Option<String>,
}

/// Outcome of a SUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub packet_id: u16,
    /// One per requested filter, in request order
    pub reason_codes: Vec<ReasonCode>,
    pub reason_string: Option<String>,
}

/// Outcome of an UNSUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeResult {
    pub packet_id: u16,
    /// Empty under v3.1.1
    pub reason_codes: Vec<ReasonCode>,
    pub reason_string: Option<String>,
}

pub type PublishHandle = oneshot::Sender<PublishResult>;
pub type SubscribeHandle = oneshot::Sender<SubscribeResult>;
pub type UnsubscribeHandle = oneshot::Sender<UnsubscribeResult>;

/// Client session
pub struct Session {
    client_id: String,
    ids: PacketIdProvider,
    outgoing: Box<dyn OutgoingStore>,
    incoming: Box<dyn IncomingStore>,
    publishes: HashMap<u16, PublishHandle>,
    subscribes: HashMap<u16, SubscribeHandle>,
    unsubscribes: HashMap<u16, UnsubscribeHandle>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_stores(
            client_id,
            Box::new(MemoryOutgoingStore::new()),
            Box::new(MemoryIncomingStore::new()),
        )
    }

    pub fn with_stores(
        client_id: impl Into<String>,
        outgoing: Box<dyn OutgoingStore>,
        incoming: Box<dyn IncomingStore>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            ids: PacketIdProvider::default(),
            outgoing,
            incoming,
            publishes: HashMap::new(),
            subscribes: HashMap::new(),
            unsubscribes: HashMap::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
    }

    pub fn acquire_packet_id(&mut self) -> Result<u16, PacketIdError> {
        self.ids.acquire()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Persist an outbound QoS 1/2 PUBLISH and remember who awaits it
    pub fn store_publish(&mut self, packet_id: u16, publish: Publish, handle: PublishHandle) {
        self.outgoing
            .store(packet_id, StoredPacket::Publish(publish));
        self.publishes.insert(packet_id, handle);
    }

    /// Replace the stored PUBLISH with its PUBREL
    pub fn store_pubrel(&mut self, packet_id: u16, pubrel: PubRel) {
        self.outgoing.store(packet_id, StoredPacket::PubRel(pubrel));
    }

    pub fn store_subscribe(&mut self, packet_id: u16, handle: SubscribeHandle) {
        self.subscribes.insert(packet_id, handle);
    }

    pub fn store_unsubscribe(&mut self, packet_id: u16, handle: UnsubscribeHandle) {
        self.unsubscribes.insert(packet_id, handle);
    }

    pub fn take_publish_handle(&mut self, packet_id: u16) -> Option<PublishHandle> {
        self.publishes.remove(&packet_id)
    }

    pub fn take_subscribe_handle(&mut self, packet_id: u16) -> Option<SubscribeHandle> {
        self.subscribes.remove(&packet_id)
    }

    pub fn take_unsubscribe_handle(&mut self, packet_id: u16) -> Option<UnsubscribeHandle> {
        self.unsubscribes.remove(&packet_id)
    }

    /// Stored outbound packet for `packet_id`
    pub fn outgoing(&self, packet_id: u16) -> Option<&StoredPacket> {
        self.outgoing.get(packet_id)
    }

    /// Finish with `packet_id`: free the identifier and drop the stored packet
    pub fn discard(&mut self, packet_id: u16) {
        self.ids.release(packet_id);
        self.outgoing.discard(packet_id);
    }

    /// Stored packets in original order, ready to be sent again
    ///
    /// PUBLISH copies carry `dup`. Each identifier is re-registered with the
    /// provider, which matters after the provider was rebuilt.
    pub fn resend_targets(&mut self) -> Vec<Packet> {
        let targets = self.outgoing.resend_targets();
        targets
            .into_iter()
            .map(|(packet_id, packet)| {
                self.ids.register_if_not_in_use(packet_id);
                packet.into_packet()
            })
            .collect()
    }

    /// Reset for a session the broker did not resume
    ///
    /// Pending handles are dropped, not resolved, so their callers observe
    /// the session going away.
    pub fn clear_all_stores(&mut self, client_id: impl Into<String>) {
        debug!(
            "Session '{}': clearing {} outgoing, {} incoming, {} pending results",
            self.client_id,
            self.outgoing.count(),
            self.incoming.len(),
            self.publishes.len() + self.subscribes.len() + self.unsubscribes.len()
        );
        self.client_id = client_id.into();
        self.ids.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.publishes.clear();
        self.subscribes.clear();
        self.unsubscribes.clear();
    }

    // ========================================================================
    // Inbound QoS 2
    // ========================================================================

    /// Record a delivered QoS 2 id; `false` if it was already recorded
    pub fn store_incoming(&mut self, packet_id: u16) -> bool {
        self.incoming.store(packet_id)
    }

    pub fn has_incoming(&self, packet_id: u16) -> bool {
        self.incoming.has(packet_id)
    }

    pub fn discard_incoming(&mut self, packet_id: u16) -> bool {
        self.incoming.discard(packet_id)
    }

    // ========================================================================
    // Counts
    // ========================================================================

    /// Outbound QoS 1/2 messages not yet fully acknowledged
    pub fn publish_inflight_count(&self) -> usize {
        self.outgoing.count()
    }

    pub fn subscribe_inflight_count(&self) -> usize {
        self.subscribes.len()
    }

    pub fn unsubscribe_inflight_count(&self) -> usize {
        self.unsubscribes.len()
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    pub fn packet_ids_in_use(&self) -> usize {
        self.ids.in_use_count()
    }
}
