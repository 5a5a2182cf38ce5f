//! Error types for Strata Core.

use strata_cache::CacheConfigError;
use strata_models::{ModelConfigError, ModelManagerError};
use thiserror::Error;

/// Core error type for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Invalid cache section
    #[error("Invalid cache configuration: {0}")]
    CacheConfig(#[from] CacheConfigError),

    /// Invalid models section
    #[error("Invalid models configuration: {0}")]
    ModelConfig(#[from] ModelConfigError),

    /// Invalid logging section or subscriber setup
    #[error("Logging error: {0}")]
    Logging(String),

    /// Model manager errors
    #[error("Model error: {0}")]
    Model(#[from] ModelManagerError),
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
