//! Workspace configuration loading.
//!
//! Configuration lives in `.strata/config.toml` under the workspace root:
//!
//! ```toml
//! [cache]
//! memory_max_size_mb = 512
//!
//! [cache.disk]
//! enabled = true
//!
//! [models]
//! idle_ttl_secs = 900
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every section and field is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_cache::CacheConfig;
use strata_models::ModelManagerConfig;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, StrataError};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output (default: false).
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), json: false }
    }
}

impl LoggingConfig {
    /// Validate the filter directive.
    ///
    /// # Errors
    /// Returns `StrataError::Logging` if `level` is not a valid filter.
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|e| StrataError::Logging(format!("invalid level '{}': {}", self.level, e)))
    }
}

/// Complete Strata configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrataConfig {
    /// `[cache]` section.
    #[serde(default)]
    pub cache: CacheConfig,

    /// `[models]` section.
    #[serde(default)]
    pub models: ModelManagerConfig,

    /// `[logging]` section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StrataConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first section error found.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.models.validate()?;
        self.logging.validate()
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or a section is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Load configuration for a workspace.
///
/// A missing file yields the default configuration.
///
/// # Errors
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_config(workspace_root: &Path) -> Result<StrataConfig> {
    let config_path = config_path(workspace_root);

    if !config_path.exists() {
        return Ok(StrataConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    StrataConfig::from_toml_str(&content)
}

/// Path to `.strata/config.toml` for a workspace.
#[must_use]
pub fn config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".strata").join("config.toml")
}
