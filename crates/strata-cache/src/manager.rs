//! CacheManager: read-through / write-through across the three tiers.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, CacheConfigError};
use crate::entry::CacheEntry;
use crate::stats::{CacheStats, StatsCollector};
use crate::tier::{DiskTier, Lookup, MemoryTier, RedisStore, RemoteStore};

/// TTL given to values promoted into memory from a slower tier.
pub const WRITE_BACK_TTL: Duration = Duration::from_secs(3600);

/// Multi-tier cache with TTL expiry and capacity-based eviction.
///
/// No operation on this type returns a cache error: tier failures are
/// logged and treated as a miss (reads) or a failed write (writes). A miss
/// caused by an outage is indistinguishable from a true miss.
pub struct CacheManager {
    /// The memory tier, guarded by a single lock never held across an await.
    memory: Mutex<MemoryTier>,
    /// Remote tier, if enabled and reachable at startup.
    remote: Option<Arc<dyn RemoteStore>>,
    /// Disk tier, if enabled.
    disk: Option<DiskTier>,
    /// Values must exceed this many bytes to be written to disk.
    large_object_threshold: u64,
    /// Cache statistics.
    stats: StatsCollector,
    /// Cache configuration.
    config: CacheConfig,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("remote_enabled", &self.remote.is_some())
            .field("disk_enabled", &self.disk.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Create a cache with the memory tier and, if enabled, the disk tier.
    ///
    /// The remote tier is not connected here; use [`CacheManager::connect`]
    /// or [`CacheManager::with_remote_store`].
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;

        let memory = MemoryTier::new(config.memory_max_items, config.memory_max_bytes());
        let disk = config.disk.enabled.then(|| DiskTier::new(&config.disk));

        Ok(Self {
            memory: Mutex::new(memory),
            remote: None,
            disk,
            large_object_threshold: config.disk.large_object_threshold_bytes,
            stats: StatsCollector::new(),
            config,
        })
    }

    /// Create a cache and connect the remote tier when it is enabled.
    ///
    /// If the connection cannot be established the remote tier stays
    /// disabled for the lifetime of this manager; a single warning is logged
    /// and no reconnection is attempted.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub async fn connect(config: CacheConfig) -> Result<Self, CacheConfigError> {
        let remote_config = config.remote.clone();
        let manager = Self::new(config)?;
        if !remote_config.enabled {
            return Ok(manager);
        }

        match RedisStore::connect(&remote_config).await {
            Ok(store) => {
                info!(host = %remote_config.host, port = remote_config.port, "Remote cache tier enabled");
                Ok(manager.with_remote_store(Arc::new(store)))
            }
            Err(e) => {
                warn!(
                    host = %remote_config.host,
                    port = remote_config.port,
                    error = %e,
                    "Remote cache tier unavailable, disabled for this process"
                );
                Ok(manager)
            }
        }
    }

    /// Attach a remote tier implementation.
    #[must_use]
    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether a remote tier is attached.
    #[must_use]
    pub fn remote_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether the disk tier is enabled.
    #[must_use]
    pub fn disk_enabled(&self) -> bool {
        self.disk.is_some()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, falling back through remote and disk.
    ///
    /// A hit in a slower tier is written back into memory with a TTL of at
    /// most one hour. An expired memory entry is a miss and its copies in the
    /// slower tiers are deleted. Exactly one `hits` or `misses` increment per
    /// call.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let lookup = self.memory().get(key, Instant::now());
        match lookup {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                debug!(key = %key, tier = "memory", "Cache hit");
                return Some(value);
            }
            Lookup::Expired => {
                // Slower tiers may still hold a copy written with the same TTL.
                self.remove_from_slower_tiers(key).await;
                self.stats.record_evictions(1);
                self.stats.record_miss();
                debug!(key = %key, "Memory entry expired on read");
                return None;
            }
            Lookup::Missing => {}
        }

        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(value)) => {
                    self.write_back(key, &value);
                    self.stats.record_hit();
                    debug!(key = %key, tier = "remote", "Cache hit");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Remote tier read failed"),
            }
        }

        if let Some(disk) = &self.disk {
            match disk.get(key).await {
                Ok(Some(hit)) => {
                    self.write_back_for(key, &hit.value, hit.remaining.min(WRITE_BACK_TTL));
                    self.stats.record_hit();
                    debug!(key = %key, tier = "disk", "Cache hit");
                    return Some(hit.value);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Disk tier read failed"),
            }
        }

        self.stats.record_miss();
        debug!(key = %key, "Cache miss");
        None
    }

    fn write_back(&self, key: &str, value: &Bytes) {
        self.write_back_for(key, value, WRITE_BACK_TTL);
    }

    fn write_back_for(&self, key: &str, value: &Bytes, ttl: Duration) {
        self.insert_memory(CacheEntry::new(key.to_string(), value.clone(), ttl));
    }

    fn insert_memory(&self, entry: CacheEntry) -> bool {
        let key = entry.key.clone();
        let size = entry.size_bytes;
        let outcome = self.memory().insert(entry);
        self.stats.record_evictions(outcome.evicted);
        if outcome.evicted > 0 {
            info!(evicted = outcome.evicted, "Evicted entries from memory tier");
        }
        if !outcome.stored {
            warn!(key = %key, size_bytes = size, "Value larger than memory tier capacity, not cached in memory");
        }
        outcome.stored
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Always writes memory; writes remote when enabled; writes disk when
    /// enabled and the value exceeds the large-object threshold. Returns the
    /// AND of the attempted writes. A failed tier does not roll back the
    /// others.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> bool {
        self.stats.record_set();
        let size = value.len() as u64;

        let mut success =
            self.insert_memory(CacheEntry::new(key.to_string(), value.clone(), ttl));

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set_ex(key, value.clone(), ttl).await {
                warn!(key = %key, error = %e, "Remote tier write failed");
                success = false;
            }
        }

        if let Some(disk) = &self.disk {
            if size > self.large_object_threshold {
                if let Err(e) = disk.set(key, &value, ttl).await {
                    warn!(key = %key, error = %e, "Disk tier write failed");
                    success = false;
                }
            }
        }

        debug!(key = %key, size_bytes = size, ttl_secs = ttl.as_secs(), success, "Cache set");
        success
    }

    /// Store `value` with the configured default TTL.
    pub async fn set_default(&self, key: &str, value: Bytes) -> bool {
        self.set(key, value, self.config.default_ttl()).await
    }

    /// Remove `key` from every enabled tier.
    ///
    /// A tier that does not hold the key counts as success for that tier.
    pub async fn delete(&self, key: &str) -> bool {
        self.stats.record_delete();
        self.remove_everywhere(key).await
    }

    async fn remove_everywhere(&self, key: &str) -> bool {
        self.memory().remove(key);
        self.remove_from_slower_tiers(key).await
    }

    async fn remove_from_slower_tiers(&self, key: &str) -> bool {
        let mut success = true;

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.del(key).await {
                warn!(key = %key, error = %e, "Remote tier delete failed");
                success = false;
            }
        }

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.delete(key).await {
                warn!(key = %key, error = %e, "Disk tier delete failed");
                success = false;
            }
        }

        success
    }

    /// Empty every tier and reset the counters.
    pub async fn clear(&self) -> bool {
        let cleared = {
            let mut memory = self.memory();
            let count = memory.len();
            memory.clear();
            count
        };
        let mut success = true;

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.flush_db().await {
                warn!(error = %e, "Remote tier flush failed");
                success = false;
            }
        }

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear().await {
                warn!(error = %e, "Disk tier clear failed");
                success = false;
            }
        }

        self.stats.reset();
        info!(cleared_count = cleared, "Cleared all cache tiers");
        success
    }

    /// Memory-tier presence check honouring TTL. Does not affect stats.
    pub fn contains(&self, key: &str) -> bool {
        self.memory().contains_live(key, Instant::now())
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.snapshot();
        let memory = self.memory();
        stats.memory_items = memory.len();
        stats.memory_bytes = memory.total_bytes();
        stats
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `compute` are returned unchanged and nothing is stored.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Fetch and decode a JSON value. Undecodable payloads count as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached payload could not be decoded");
                None
            }
        }
    }

    /// Encode `value` as JSON and store it.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, Bytes::from(bytes), ttl).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Value could not be encoded for caching");
                false
            }
        }
    }

    /// Remove every memory-tier key starting with `prefix` from all tiers.
    ///
    /// Only keys currently resident in memory are known; entries living
    /// solely in the remote or disk tiers are left to expire on their own.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys = self.memory().keys_with_prefix(prefix);
        for key in &keys {
            self.remove_everywhere(key).await;
        }
        if !keys.is_empty() {
            info!(prefix = %prefix, removed = keys.len(), "Invalidated cache keys by prefix");
        }
        keys.len()
    }

    /// Remove every memory entry past its TTL, cleaning all tiers.
    ///
    /// Each candidate is re-checked under the memory lock before removal, so
    /// a key set again or already expired by a read while the sweep runs is
    /// left alone and counted once.
    pub async fn sweep_expired(&self) -> usize {
        let candidates = self.memory().expired_keys(Instant::now());
        let mut removed = 0;
        for key in &candidates {
            if !self.memory().remove_if_expired(key, Instant::now()) {
                continue;
            }
            removed += 1;
            self.stats.record_evictions(1);
            self.remove_from_slower_tiers(key).await;
        }
        if removed > 0 {
            info!(expired = removed, "Expiry sweep removed entries");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every cleanup interval until `token` is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.cleanup_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("Cache expiry sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        cache.sweep_expired().await;
                    }
                }
            }
        })
    }
}

/// Derive a deterministic cache key from a prefix and argument parts.
///
/// The parts are hashed so arbitrarily long or sensitive arguments never
/// appear in the key itself.
pub fn cache_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{}:{:x}", prefix, hasher.finalize())
}
