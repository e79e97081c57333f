//! Error types for the core domain algebra.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by the core constraint and quantity algebra.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Two requirement sets have no value in common for the named key.
    #[error("incompatible requirement on key {0}")]
    IncompatibleRequirement(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl CoreError {
    /// The key a requirement conflict was detected on, if any.
    pub fn conflicting_key(&self) -> Option<&str> {
        match self {
            CoreError::IncompatibleRequirement(key) => Some(key),
            _ => None,
        }
    }
}
