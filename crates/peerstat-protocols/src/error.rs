//! Error types for peerstat-protocols.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the transport boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload is not JSON of the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload exceeds the frame limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The payload parsed but violates a snapshot invariant.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
