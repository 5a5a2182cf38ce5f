//! Memory-tier entry with access metadata.

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value with TTL and access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key.
    pub key: String,
    /// The cached payload.
    pub value: Bytes,
    /// When the entry was inserted.
    pub created_at: Instant,
    /// Lifetime measured from `created_at`.
    pub ttl: Duration,
    /// Number of hits served by this entry.
    pub access_count: u64,
    /// Timestamp of the last hit (creation time until the first hit).
    pub last_accessed: Instant,
    /// Payload size in bytes, fixed at insertion.
    pub size_bytes: u64,
    /// Monotonic insertion sequence, used to break timestamp ties.
    pub(crate) seq: u64,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(key: String, value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        let size_bytes = value.len() as u64;
        Self {
            key,
            value,
            created_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
            size_bytes,
            seq: 0,
        }
    }

    /// Whether the entry's age exceeds its TTL at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// Record a hit.
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// LRU ordering key: oldest access first, then oldest creation, then insertion order.
    pub(crate) fn lru_rank(&self) -> (Instant, Instant, u64) {
        (self.last_accessed, self.created_at, self.seq)
    }
}
