//! Peerstat Metrics - mergeable analytics state
//!
//! The building blocks every peer holds a copy of:
//!
//! - [`MetricStore`]: named counters and a comment log with a deterministic merge
//! - [`FunnelTracker`]: counts only in-order completions of a step sequence
//! - [`VisibilityEdgeDetector`]: one view per visible period
//!
//! # Merge rules
//!
//! ```text
//! counts    max(local, remote) per label     commutative, idempotent
//! comments  union by index, remote wins      idempotent
//! ```
//!
//! Concurrent increments of the same label on two peers are not summed, so
//! merged counts are a lower bound on total activity.

pub mod error;
pub mod funnel;
pub mod snapshot;
pub mod store;
pub mod visibility;

pub use error::{Error, Result};
pub use funnel::FunnelTracker;
pub use snapshot::{AggregateSnapshot, Bar, StoreSnapshot};
pub use store::{MetricStore, MutationHook, Schema, TypedComment};
pub use visibility::{Rect, Viewport, VisibilityEdgeDetector};
