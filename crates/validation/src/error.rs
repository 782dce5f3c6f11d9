//! Validation error type
//!
//! A validation pass reports at most one failure per field; the first check
//! that fails wins, so the error is a single field-tagged value rather than
//! a collection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// A single field-tagged validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: "validation_failed".to_string(),
        }
    }

    /// Create a validation error with a specific code
    pub fn with_code(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}
