//! Bounded in-process tier.
//!
//! The memory tier holds entries in a `HashMap` keyed by cache key. Two
//! independent guards run before every insert, in this order:
//!
//! 1. **Item guard**: if the insert would push the entry count past
//!    `max_items`, the least-recently-accessed 10% of entries are evicted
//!    (at least one).
//! 2. **Byte guard**: if the insert would push the aggregate size past
//!    `max_bytes`, least-recently-accessed entries are evicted until the
//!    aggregate (including the incoming value) is at or below 80% of
//!    `max_bytes`.
//!
//! The tier itself is not synchronized; `CacheManager` guards it with a
//! single mutex that is never held across an await point.

use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::entry::CacheEntry;

/// Fraction of entries dropped by the item guard.
const ITEM_EVICTION_FRACTION: usize = 10;

/// Target fill ratio after the byte guard runs, in percent.
const BYTE_EVICTION_TARGET_PERCENT: u64 = 80;

/// Outcome of an insert into the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Whether the entry was admitted.
    pub stored: bool,
    /// Entries evicted to make room.
    pub evicted: u64,
}

/// The memory tier's entry table.
#[derive(Debug)]
pub struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    next_seq: u64,
    max_items: usize,
    max_bytes: u64,
}

impl MemoryTier {
    /// Create an empty tier with the given bounds.
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            next_seq: 0,
            max_items,
            max_bytes,
        }
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate payload size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Look up a live entry and record the hit.
    ///
    /// An expired entry is removed and reported as [`Lookup::Expired`] so the
    /// caller can account for it.
    pub fn get(&mut self, key: &str, now: Instant) -> Lookup {
        match self.entries.get_mut(key) {
            None => Lookup::Missing,
            Some(entry) if !entry.is_expired_at(now) => {
                entry.touch(now);
                Lookup::Hit(entry.value.clone())
            }
            Some(_) => {
                self.remove(key);
                Lookup::Expired
            }
        }
    }

    /// Presence check that honours TTL without touching access metadata.
    pub fn contains_live(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Insert an entry, running both capacity guards first.
    pub fn insert(&mut self, mut entry: CacheEntry) -> InsertOutcome {
        if entry.size_bytes > self.max_bytes {
            return InsertOutcome { stored: false, evicted: 0 };
        }

        // Replacement never counts against the item guard.
        self.remove(&entry.key);

        let mut evicted = self.enforce_item_limit();
        evicted += self.enforce_byte_limit(entry.size_bytes);

        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);

        InsertOutcome { stored: true, evicted }
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Remove `key` only if it is still past its TTL at `now`.
    ///
    /// Returns `false` when the key is gone or was replaced by a live entry.
    pub fn remove_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|entry| entry.is_expired_at(now));
        if expired {
            self.remove(key);
        }
        expired
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Keys whose age exceeds their own TTL at `now`.
    pub fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn enforce_item_limit(&mut self) -> u64 {
        if self.entries.len() < self.max_items {
            return 0;
        }

        let count = (self.entries.len() / ITEM_EVICTION_FRACTION).max(1);
        let evicted = self.evict_lru(count);
        debug!(evicted, max_items = self.max_items, "Item limit reached, evicted oldest entries");
        evicted
    }

    fn enforce_byte_limit(&mut self, incoming: u64) -> u64 {
        if self.total_bytes + incoming <= self.max_bytes {
            return 0;
        }

        let target = self.max_bytes * BYTE_EVICTION_TARGET_PERCENT / 100;
        let mut ranked = self.ranked_keys();
        ranked.reverse();

        let mut evicted = 0;
        while self.total_bytes + incoming > target {
            let Some(key) = ranked.pop() else { break };
            if self.remove(&key).is_some() {
                evicted += 1;
            }
        }
        debug!(
            evicted,
            total_bytes = self.total_bytes,
            max_bytes = self.max_bytes,
            "Byte limit reached, evicted least recently used entries"
        );
        evicted
    }

    fn evict_lru(&mut self, count: usize) -> u64 {
        let victims: Vec<String> = self.ranked_keys().into_iter().take(count).collect();
        let mut evicted = 0;
        for key in victims {
            if self.remove(&key).is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    /// Keys ordered from least to most recently used.
    fn ranked_keys(&self) -> Vec<String> {
        let mut ranked: Vec<&CacheEntry> = self.entries.values().collect();
        ranked.sort_by_key(|entry| entry.lru_rank());
        ranked.into_iter().map(|entry| entry.key.clone()).collect()
    }
}

/// Result of a memory-tier lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live entry found.
    Hit(bytes::Bytes),
    /// Entry was present but past its TTL; it has been removed.
    Expired,
    /// No entry for the key.
    Missing,
}
