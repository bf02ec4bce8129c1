//! Error types for the peerstat node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Store mutation or schema error
    #[error("Metrics error: {0}")]
    Metrics(#[from] peerstat_metrics::Error),

    /// Wire decode or validation error
    #[error("Protocol error: {0}")]
    Protocol(#[from] peerstat_protocols::Error),

    /// No store with this name
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// The node task has stopped
    #[error("Node stopped")]
    Stopped,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON rendering error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
