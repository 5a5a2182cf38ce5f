//! Configuration for the tiered cache.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Configuration for the tiered cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum aggregate size of the memory tier in MiB (default: 256).
    #[serde(default = "default_memory_max_size_mb")]
    pub memory_max_size_mb: u64,

    /// Maximum number of entries in the memory tier (default: 10000).
    #[serde(default = "default_memory_max_items")]
    pub memory_max_items: usize,

    /// TTL applied by callers that do not pick one (default: 3600 = 1 hour).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// How often the expiry sweep runs in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Remote key-value tier.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local disk tier.
    #[serde(default)]
    pub disk: DiskConfig,
}

/// Connection settings for the remote key-value tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Whether the remote tier is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Host of the key-value service.
    #[serde(default = "default_remote_host")]
    pub host: String,

    /// Port of the key-value service.
    #[serde(default = "default_remote_port")]
    pub port: u16,

    /// Database index.
    #[serde(default)]
    pub db: i64,

    /// Optional password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Settings for the local disk tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskConfig {
    /// Whether the disk tier is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding one `.cache` file per key.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Values must be strictly larger than this to be written to disk (default: 1 MiB).
    #[serde(default = "default_large_object_threshold_bytes")]
    pub large_object_threshold_bytes: u64,

    /// Files older than this are treated as expired on read (default: 3600).
    #[serde(default = "default_disk_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_memory_max_size_mb() -> u64 {
    256
}

fn default_memory_max_items() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_remote_host() -> String {
    "127.0.0.1".to_string()
}

fn default_remote_port() -> u16 {
    6379
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/strata_cache")
}

fn default_large_object_threshold_bytes() -> u64 {
    MIB
}

fn default_disk_max_age_secs() -> u64 {
    3600
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid memory size (must be > 0).
    #[error("Invalid memory max size: must be greater than 0")]
    InvalidMemoryMaxSize,

    /// Invalid item limit (must be > 0).
    #[error("Invalid memory max items: must be greater than 0")]
    InvalidMemoryMaxItems,

    /// Invalid cleanup interval (must be > 0).
    #[error("Invalid cleanup interval: must be greater than 0")]
    InvalidCleanupInterval,

    /// Remote tier enabled without a host.
    #[error("Invalid remote host: must not be empty when the remote tier is enabled")]
    InvalidRemoteHost,

    /// Disk tier enabled without a directory.
    #[error("Invalid disk cache dir: must not be empty when the disk tier is enabled")]
    InvalidDiskCacheDir,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_size_mb: default_memory_max_size_mb(),
            memory_max_items: default_memory_max_items(),
            default_ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            remote: RemoteConfig::default(),
            disk: DiskConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_remote_host(),
            port: default_remote_port(),
            db: 0,
            password: None,
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_dir: default_cache_dir(),
            large_object_threshold_bytes: default_large_object_threshold_bytes(),
            max_age_secs: default_disk_max_age_secs(),
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.memory_max_size_mb == 0 {
            return Err(CacheConfigError::InvalidMemoryMaxSize);
        }

        if self.memory_max_items == 0 {
            return Err(CacheConfigError::InvalidMemoryMaxItems);
        }

        if self.cleanup_interval_secs == 0 {
            return Err(CacheConfigError::InvalidCleanupInterval);
        }

        if self.remote.enabled && self.remote.host.trim().is_empty() {
            return Err(CacheConfigError::InvalidRemoteHost);
        }

        if self.disk.enabled && self.disk.cache_dir.as_os_str().is_empty() {
            return Err(CacheConfigError::InvalidDiskCacheDir);
        }

        Ok(())
    }

    /// Memory tier byte bound.
    #[must_use]
    pub fn memory_max_bytes(&self) -> u64 {
        self.memory_max_size_mb.saturating_mul(MIB)
    }

    /// Get the default TTL as a Duration.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Get the cleanup interval as a Duration.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl RemoteConfig {
    /// Connection URL in `redis://` form.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl DiskConfig {
    /// Get the maximum file age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}
