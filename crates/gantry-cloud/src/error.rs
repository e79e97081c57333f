//! Error types for cloud-provider adapters.

use thiserror::Error;

/// Result type alias for cloud-provider operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors surfaced by cloud-provider adapters.
#[derive(Debug, Error)]
pub enum CloudError {
    /// No adapter is registered for the payload's provider variant.
    #[error("no provider registered for {0}")]
    UnknownProvider(String),

    /// The payload variant does not belong to this adapter.
    #[error("invalid provider payload: {0}")]
    InvalidPayload(String),

    /// The provider cannot satisfy the request.
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// A fleet definition failed to load.
    #[error("fleet definition: {0}")]
    Fleet(String),

    /// Transport or provider-side failure; the pass retries later.
    #[error("provider call failed: {0}")]
    Provider(String),
}
