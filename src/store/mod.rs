//! Delivery stores
//!
//! The outgoing store keeps every unacknowledged QoS 1/2 PUBLISH and every
//! PUBREL awaiting PUBCOMP so they can be replayed after a reconnect. The
//! incoming store remembers QoS 2 packet ids that were delivered to the
//! application but not yet released, which suppresses duplicate delivery.
//!
//! Only in-memory stores ship with the crate; the traits are the seam for
//! anything durable.

mod memory;

pub use memory::{MemoryIncomingStore, MemoryOutgoingStore};

use crate::protocol::{Packet, PubRel, Publish};

/// Packet kept for replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPacket {
    Publish(Publish),
    PubRel(PubRel),
}

impl StoredPacket {
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            StoredPacket::Publish(p) => p.packet_id,
            StoredPacket::PubRel(p) => Some(p.packet_id),
        }
    }

    pub fn into_packet(self) -> Packet {
        match self {
            StoredPacket::Publish(p) => Packet::Publish(p),
            StoredPacket::PubRel(p) => Packet::PubRel(p),
        }
    }
}

/// Inbound QoS 2 ids delivered but not yet released by PUBREL
pub trait IncomingStore: Send {
    /// Record `packet_id`; returns `false` if it was already present
    fn store(&mut self, packet_id: u16) -> bool;

    fn has(&self, packet_id: u16) -> bool;

    /// Forget `packet_id`; returns `false` if it was not present
    fn discard(&mut self, packet_id: u16) -> bool;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outbound packets awaiting their terminating acknowledgment
pub trait OutgoingStore: Send {
    /// Insert or replace the entry for `packet_id`
    ///
    /// Replacing (PUBLISH by PUBREL for the same id) keeps the entry's
    /// original position in replay order.
    fn store(&mut self, packet_id: u16, packet: StoredPacket);

    fn discard(&mut self, packet_id: u16) -> Option<StoredPacket>;

    fn has(&self, packet_id: u16) -> bool;

    fn get(&self, packet_id: u16) -> Option<&StoredPacket>;

    fn count(&self) -> usize;

    fn clear(&mut self);

    /// Every entry in insertion order, for replay
    ///
    /// Stored PUBLISH entries are marked `dup` as they are handed out, so
    /// the returned copies and any later replay carry the flag. PUBREL
    /// entries are returned unchanged.
    fn resend_targets(&mut self) -> Vec<(u16, StoredPacket)>;
}
