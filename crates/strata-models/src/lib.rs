//! Model manager for Strata.
//!
//! Heavyweight resources (inference models, index handles) are registered by
//! name and built on first use by a [`ResourceBuilder`](strata_abstraction::ResourceBuilder)
//! chosen by kind tag. The [`ModelManager`] guarantees that concurrent loads
//! of one name trigger a single construction, shares the instance by `Arc`,
//! and unloads resources that sit idle longer than the configured TTL.

pub mod builder;
pub mod config;
pub mod error;
pub mod manager;
pub mod slot;

pub use builder::{BlockingBuilder, BuilderRegistry, KIND_KEY};
pub use config::{ModelConfigError, ModelManagerConfig};
pub use error::{ModelManagerError, Result};
pub use manager::{FootprintProbe, HealthReport, MemoryProbe, ModelManager};
pub use slot::{ResourceSlot, SlotRegistry, SlotStatus, StatusRecord};
