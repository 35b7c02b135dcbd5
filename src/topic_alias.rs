//! Outbound topic alias assignment (MQTT v5.0)
//!
//! Aliases are numbered from 1 to the maximum the broker advertised in
//! CONNACK. When the table is full the least used topic gives up its alias
//! to the new one.

use tokio::sync::Mutex;
use tracing::trace;

use crate::cache::BoundedCache;
use crate::packet_id::PacketIdProvider;

/// Result of an alias lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicAlias {
    /// The alias was assigned by this call, so the full topic must be sent
    /// alongside it once
    pub generated: bool,
    pub alias: u16,
}

#[derive(Debug)]
struct AliasTable {
    maximum: u16,
    ids: PacketIdProvider,
    topics: BoundedCache<String, u16>,
}

impl AliasTable {
    fn new(maximum: u16) -> Self {
        Self {
            maximum,
            ids: PacketIdProvider::new(1, maximum.max(1)),
            topics: BoundedCache::new(maximum as usize, None),
        }
    }
}

/// Topic to alias table for one connection
///
/// Lookups are serialized so two concurrent publishes to new topics never
/// claim the same free alias.
#[derive(Debug)]
pub struct TopicAliasManager {
    table: Mutex<AliasTable>,
}

impl TopicAliasManager {
    pub fn new(maximum: u16) -> Self {
        Self {
            table: Mutex::new(AliasTable::new(maximum)),
        }
    }

    /// Alias for `topic`, assigning one if needed
    ///
    /// `None` when aliasing is disabled (maximum 0).
    pub async fn get_topic_id(&self, topic: &str) -> Option<TopicAlias> {
        let mut table = self.table.lock().await;
        if table.maximum == 0 || topic.is_empty() {
            return None;
        }

        let key = topic.to_owned();
        if let Some(alias) = table.topics.get(&key) {
            return Some(TopicAlias {
                generated: false,
                alias,
            });
        }

        if table.topics.len() >= table.maximum as usize {
            if let Some(victim) = table.topics.lru_key() {
                if let Some(alias) = table.topics.remove(&victim) {
                    trace!("Topic alias {} reassigned from '{}' to '{}'", alias, victim, topic);
                    table.ids.release(alias);
                }
            }
        }

        let alias = table.ids.acquire().ok()?;
        table.topics.set(key, alias);
        Some(TopicAlias {
            generated: true,
            alias,
        })
    }

    /// Forget `topic`, freeing its alias
    pub async fn release_topic(&self, topic: &str) -> bool {
        let mut table = self.table.lock().await;
        match table.topics.remove(&topic.to_owned()) {
            Some(alias) => table.ids.release(alias),
            None => false,
        }
    }

    /// Apply a new maximum; aliases above it are dropped
    pub async fn shrink(&self, maximum: u16) {
        let mut table = self.table.lock().await;
        if maximum >= table.maximum {
            return;
        }

        let old = std::mem::replace(&mut *table, AliasTable::new(maximum));
        if maximum == 0 {
            return;
        }
        for (topic, alias) in old.topics.into_entries() {
            if alias <= maximum {
                table.ids.register_if_not_in_use(alias);
                table.topics.set(topic, alias);
            }
        }
    }

    pub async fn maximum(&self) -> u16 {
        self.table.lock().await.maximum
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.topics.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
