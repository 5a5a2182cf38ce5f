//! Strata Core.
//!
//! Wires the tiered cache and the model manager into a single [`Engine`],
//! loads workspace configuration and sets up logging.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::{config_path, load_config, LoggingConfig, StrataConfig};
pub use engine::Engine;
pub use error::{Result, StrataError};
pub use logging::init_tracing;

pub use strata_abstraction as abstraction;
pub use strata_cache as cache;
pub use strata_models as models;
