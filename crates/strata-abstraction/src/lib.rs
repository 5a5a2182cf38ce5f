//! Resource abstraction layer for Strata.
//!
//! This crate defines the traits shared between the model manager and the
//! builders that construct heavyweight resources (inference models, index
//! handles, and the like). The manager never looks inside a resource; it only
//! needs to know its footprint and how to release it.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Construction parameters passed verbatim to a builder.
pub type ResourceConfig = serde_json::Map<String, serde_json::Value>;

/// Represents an error raised while building or releasing a resource.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceError {
    /// The builder could not construct the resource.
    #[error("Build Error: {0}")]
    BuildFailed(String),

    /// The construction parameters were rejected by the builder.
    #[error("Invalid Config: {0}")]
    InvalidConfig(String),

    /// The resource's cleanup hook failed.
    #[error("Cleanup Error: {0}")]
    CleanupFailed(String),

    /// Other unexpected errors.
    #[error("Other Resource Error: {0}")]
    Other(String),
}

/// A heavyweight, shareable resource owned by the model manager.
///
/// All resources must be `Send + Sync` so a single loaded instance can be
/// handed to many concurrent callers.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Estimated memory footprint in bytes, used for budget accounting.
    fn size_bytes_estimate(&self) -> u64 {
        0
    }

    /// Optional cleanup hook invoked when the resource is unloaded.
    ///
    /// # Errors
    /// Returns a `ResourceError` if releasing external state fails.
    async fn cleanup(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Access to the concrete type for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Constructs resources of one kind.
#[async_trait]
pub trait ResourceBuilder: Send + Sync {
    /// Builds the resource registered under `name` from `config`.
    ///
    /// # Errors
    /// Returns a `ResourceError` if construction fails.
    async fn build(
        &self,
        name: &str,
        config: &ResourceConfig,
    ) -> Result<Arc<dyn Resource>, ResourceError>;
}

/// Downcasts a loaded resource to its concrete type.
pub fn downcast_ref<T: 'static>(resource: &dyn Resource) -> Option<&T> {
    resource.as_any().downcast_ref::<T>()
}
