//! Configuration for the model manager.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration for the model manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelManagerConfig {
    /// Soft memory ceiling in MiB that triggers idle cleanup before a load (default: 4096).
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,

    /// How often the idle reclamation task runs in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Seconds without use before a loaded resource is unloaded (default: 1800 = 30 minutes).
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_max_memory_mb() -> u64 {
    4096
}

fn default_cleanup_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_idle_ttl_secs() -> u64 {
    1800 // 30 minutes
}

/// Errors that can occur during model manager configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelConfigError {
    /// Invalid memory ceiling (must be > 0).
    #[error("Invalid max memory: must be greater than 0")]
    InvalidMaxMemory,

    /// Invalid cleanup interval (must be > 0).
    #[error("Invalid cleanup interval: must be greater than 0")]
    InvalidCleanupInterval,

    /// Invalid idle TTL (must be > 0).
    #[error("Invalid idle TTL: must be greater than 0")]
    InvalidIdleTtl,
}

impl Default for ModelManagerConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

impl ModelManagerConfig {
    /// Validate the model manager configuration.
    ///
    /// # Errors
    /// Returns `ModelConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        if self.max_memory_mb == 0 {
            return Err(ModelConfigError::InvalidMaxMemory);
        }

        if self.cleanup_interval_secs == 0 {
            return Err(ModelConfigError::InvalidCleanupInterval);
        }

        if self.idle_ttl_secs == 0 {
            return Err(ModelConfigError::InvalidIdleTtl);
        }

        Ok(())
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Get the cleanup interval as a Duration.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Get the idle TTL as a Duration.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_manager_config_default() {
        let config = ModelManagerConfig::default();
        assert_eq!(config.max_memory_mb, 4096);
        assert_eq!(config.cleanup_interval_secs, 300);
        assert_eq!(config.idle_ttl_secs, 1800);
        assert_eq!(config.max_memory_bytes(), 4096 * 1024 * 1024);
    }

    #[test]
    fn test_model_manager_config_validation() {
        assert!(ModelManagerConfig::default().validate().is_ok());

        let config = ModelManagerConfig { max_memory_mb: 0, ..ModelManagerConfig::default() };
        assert_eq!(config.validate(), Err(ModelConfigError::InvalidMaxMemory));

        let config = ModelManagerConfig { cleanup_interval_secs: 0, ..ModelManagerConfig::default() };
        assert_eq!(config.validate(), Err(ModelConfigError::InvalidCleanupInterval));

        let config = ModelManagerConfig { idle_ttl_secs: 0, ..ModelManagerConfig::default() };
        assert_eq!(config.validate(), Err(ModelConfigError::InvalidIdleTtl));
    }

    #[test]
    fn test_model_manager_config_durations() {
        let config: ModelManagerConfig = toml::from_str("idle_ttl_secs = 60").unwrap();
        assert_eq!(config.idle_ttl(), Duration::from_secs(60));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(300));
    }
}
