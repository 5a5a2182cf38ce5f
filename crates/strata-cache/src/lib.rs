//! Tiered cache for Strata.
//!
//! Values are opaque byte payloads kept in up to three tiers:
//!
//! - **Memory**: bounded by item count and aggregate size, LRU eviction,
//!   per-entry TTL checked on every read.
//! - **Remote**: a shared key-value service (`GET`/`SETEX`/`DEL`/`FLUSHDB`).
//! - **Disk**: one file per key, reserved for payloads above 1 MiB.
//!
//! [`CacheManager`] reads through the tiers in that order and writes through
//! them best-effort. Cache operations never fail from the caller's point of
//! view; a tier outage looks exactly like a miss.

pub mod config;
pub mod entry;
pub mod manager;
pub mod stats;
pub mod tier;

pub use config::{CacheConfig, CacheConfigError, DiskConfig, RemoteConfig};
pub use entry::CacheEntry;
pub use manager::{cache_key, CacheManager, WRITE_BACK_TTL};
pub use stats::{CacheStats, StatsCollector};
pub use tier::{DiskHit, DiskTier, RedisStore, RemoteStore, TierError};
