//! Error types for osclink core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// A message failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Argument kind that has no osclink representation
    #[error("unsupported argument type: {0}")]
    UnsupportedArg(String),

    /// Document serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raised when a message does not satisfy a binding's declared schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Type tags differ from the declared signature
    #[error("type tags mismatch: expected '{expected}', got '{actual}'")]
    TypeTags { expected: String, actual: String },

    /// Typed schema rejected the message document
    #[error("schema mismatch: {0}")]
    Schema(String),
}
