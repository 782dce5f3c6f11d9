//! Error types for the model engine
//!
//! Validation failures carry the offending field and are never recovered
//! internally. Adapter failures pass through opaquely. A miss on
//! find/update/delete is a normal `None`/zero-count result, not an error.

use relata_validation::ValidationError;
use thiserror::Error;

/// Result type alias for model operations
pub type OrmResult<T> = Result<T, ModelError>;

/// Error types for model operations
#[derive(Error, Debug)]
pub enum ModelError {
    /// A field failed validation; always carries the field name.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An operation was attempted before a storage adapter was bound.
    #[error("no database adapter bound to model '{0}'")]
    AdapterNotInitialized(String),

    /// Opaque passthrough of whatever the adapter raised.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid model definition or operation arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
