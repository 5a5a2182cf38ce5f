//! Backing stores in the cache's fallback chain.
//!
//! - **Memory** ([`MemoryTier`]): bounded, in-process, fastest.
//! - **Remote** ([`RemoteStore`]): shared key-value service, medium latency.
//! - **Disk** ([`DiskTier`]): one file per key, reserved for large payloads.

pub mod disk;
pub mod memory;
pub mod remote;

pub use disk::{DiskHit, DiskTier};
pub use memory::{InsertOutcome, Lookup, MemoryTier};
pub use remote::{RedisStore, RemoteStore};

use thiserror::Error;

/// Errors raised by an individual tier.
///
/// These never cross the `CacheManager` boundary: every variant is logged
/// and downgraded to a miss or a failed write.
#[derive(Debug, Error)]
pub enum TierError {
    /// The remote key-value service rejected or failed a command.
    #[error("Remote tier error: {0}")]
    Remote(#[from] redis::RedisError),

    /// A disk-tier file operation failed.
    #[error("Disk tier I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tier is reachable but not usable for this operation.
    #[error("Tier unavailable: {0}")]
    Unavailable(String),
}
