//! Error types for the model manager.

use thiserror::Error;

/// Errors surfaced by [`ModelManager`](crate::ModelManager) operations.
///
/// `Clone` so every caller waiting on the same failed construction receives
/// an error carrying the same message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelManagerError {
    /// No builder is registered for the requested kind.
    #[error("No builder registered for kind '{kind}' (requested by '{name}')")]
    UnknownKind {
        /// The resource name.
        name: String,
        /// The unresolved kind tag.
        kind: String,
    },

    /// Construction failed.
    #[error("Failed to load '{name}': {message}")]
    LoadFailed {
        /// The resource name.
        name: String,
        /// The builder's error message.
        message: String,
    },

    /// The cleanup hook failed while unloading.
    #[error("Failed to unload '{name}': {message}")]
    UnloadFailed {
        /// The resource name.
        name: String,
        /// The cleanup hook's error message.
        message: String,
    },
}

/// Result type alias for model manager operations.
pub type Result<T> = std::result::Result<T, ModelManagerError>;
