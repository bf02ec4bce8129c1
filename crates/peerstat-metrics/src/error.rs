//! Error types for peerstat-metrics.

use thiserror::Error;

/// Result type for metric store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mutating or configuring metric stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The label is not part of the store's fixed key set.
    #[error("store {store:?} has no label {label:?}")]
    UnknownLabel { store: String, label: String },

    /// Comments must carry text.
    #[error("empty comment rejected by store {store:?}")]
    EmptyComment { store: String },

    /// Samples can only be pushed into open-schema stores.
    #[error("store {store:?} has a fixed schema and cannot take samples")]
    FixedSchema { store: String },

    /// A funnel listed the same step twice.
    #[error("funnel step {0:?} appears more than once")]
    DuplicateStep(String),

    /// A funnel needs at least one step.
    #[error("funnel has no steps")]
    EmptyFunnel,
}
