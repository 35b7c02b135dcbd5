//! In-memory delivery stores

use std::collections::{HashMap, HashSet, VecDeque};

use super::{IncomingStore, OutgoingStore, StoredPacket};

#[derive(Debug, Default)]
pub struct MemoryIncomingStore {
    ids: HashSet<u16>,
}

impl MemoryIncomingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncomingStore for MemoryIncomingStore {
    fn store(&mut self, packet_id: u16) -> bool {
        self.ids.insert(packet_id)
    }

    fn has(&self, packet_id: u16) -> bool {
        self.ids.contains(&packet_id)
    }

    fn discard(&mut self, packet_id: u16) -> bool {
        self.ids.remove(&packet_id)
    }

    fn clear(&mut self) {
        self.ids.clear();
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Default)]
pub struct MemoryOutgoingStore {
    packets: HashMap<u16, StoredPacket>,
    /// Replay order; holds exactly the keys of `packets`
    order: VecDeque<u16>,
}

impl MemoryOutgoingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutgoingStore for MemoryOutgoingStore {
    fn store(&mut self, packet_id: u16, packet: StoredPacket) {
        if self.packets.insert(packet_id, packet).is_none() {
            self.order.push_back(packet_id);
        }
    }

    fn discard(&mut self, packet_id: u16) -> Option<StoredPacket> {
        let packet = self.packets.remove(&packet_id)?;
        self.order.retain(|&id| id != packet_id);
        Some(packet)
    }

    fn has(&self, packet_id: u16) -> bool {
        self.packets.contains_key(&packet_id)
    }

    fn get(&self, packet_id: u16) -> Option<&StoredPacket> {
        self.packets.get(&packet_id)
    }

    fn count(&self) -> usize {
        self.packets.len()
    }

    fn clear(&mut self) {
        self.packets.clear();
        self.order.clear();
    }

    fn resend_targets(&mut self) -> Vec<(u16, StoredPacket)> {
        let mut targets = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(packet) = self.packets.get_mut(id) {
                if let StoredPacket::Publish(publish) = packet {
                    publish.dup = true;
                }
                targets.push((*id, packet.clone()));
            }
        }
        targets
    }
}
