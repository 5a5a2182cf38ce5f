//! Remote key-value tier.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use super::TierError;
use crate::config::RemoteConfig;

/// How long startup waits for the key-value service before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal command set the cache needs from a shared key-value service.
///
/// The production implementation is [`RedisStore`]. Any store speaking the
/// same four commands (`GET`, `SETEX`, `DEL`, `FLUSHDB`) can be plugged in
/// through `CacheManager::with_remote_store`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the raw payload stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TierError>;

    /// Store `value` under `key`, expiring after `ttl` (at least one second).
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TierError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), TierError>;

    /// Remove every key in the selected database.
    async fn flush_db(&self) -> Result<(), TierError>;
}

/// Redis-backed remote tier over a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the configured service and verify it answers `PING`.
    ///
    /// # Errors
    /// Returns `TierError` if the URL is invalid, the service is unreachable
    /// within the connect timeout, or `PING` fails.
    pub async fn connect(config: &RemoteConfig) -> Result<Self, TierError> {
        let client = redis::Client::open(config.url())?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                TierError::Unavailable(format!(
                    "timed out connecting to {}:{}",
                    config.host, config.port
                ))
            })??;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(host = %config.host, port = config.port, db = config.db, reply = %pong, "Remote tier connected");

        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, TierError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TierError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value.as_ref(), seconds).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), TierError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn flush_db(&self) -> Result<(), TierError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}
