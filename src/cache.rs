//! Bounded key/value cache
//!
//! Eviction picks the entry with the fewest reads, ties broken by insertion
//! order. This is a use-count policy rather than recency LRU. An optional
//! `max_age` retires an entry on the read that pushes its count past the
//! limit; that read still returns the value.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    counter: u32,
    /// Insertion sequence, for tie-breaking
    seq: u64,
}

#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    max_age: Option<u32>,
    next_seq: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, max_age: Option<u32>) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            max_age,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace
    ///
    /// A replaced value keeps its counter. A new key at capacity evicts
    /// `lru_key()` first; returns the evicted pair if any.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return None;
        }
        if self.capacity == 0 {
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.lru_key()
                .and_then(|k| self.entries.remove(&k).map(|e| (k, e.value)))
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                counter: 1,
                seq,
            },
        );
        evicted
    }

    /// Read a value, counting the access
    pub fn get(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        entry.counter = entry.counter.saturating_add(1);

        match self.max_age {
            Some(max_age) if entry.counter > max_age => {
                self.entries.remove(key).map(|e| e.value)
            }
            _ => Some(entry.value.clone()),
        }
    }

    /// Read without counting
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Key the next eviction would pick
    pub fn lru_key(&self) -> Option<K> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.counter, e.seq))
            .map(|(k, _)| k.clone())
    }

    /// Consume the cache, yielding entries in insertion order
    pub fn into_entries(self) -> Vec<(K, V)> {
        let mut entries: Vec<_> = self.entries.into_iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        entries.into_iter().map(|(k, e)| (k, e.value)).collect()
    }
}
