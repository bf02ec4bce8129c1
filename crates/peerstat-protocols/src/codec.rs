//! Snapshot codec.
//!
//! Every broadcast is one JSON object:
//!
//! ```text
//! { "graphs": { "<store>": { "comments": ["..."], "data": { "<label>": <u64> } } } }
//! ```
//!
//! Decoding is strict: the shape is enforced by the typed structs, and
//! [`validate`] then rejects values the stores would never produce locally.

use crate::error::{Error, Result};
use peerstat_metrics::AggregateSnapshot;
use tracing::trace;

/// Largest payload accepted from a peer.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Serialize a snapshot for the wire.
pub fn encode(snapshot: &AggregateSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

/// Parse and validate a payload received from a peer.
pub fn decode(raw: &str) -> Result<AggregateSnapshot> {
    if raw.len() > MAX_PAYLOAD_BYTES {
        return Err(Error::PayloadTooLarge {
            size: raw.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    let snapshot: AggregateSnapshot = serde_json::from_str(raw.trim())?;
    validate(&snapshot)?;
    trace!(stores = snapshot.graphs.len(), bytes = raw.len(), "Decoded snapshot");
    Ok(snapshot)
}

/// Check the invariants a well-behaved peer always upholds.
pub fn validate(snapshot: &AggregateSnapshot) -> Result<()> {
    for (name, store) in &snapshot.graphs {
        if name.is_empty() {
            return Err(Error::InvalidSnapshot("empty store name".into()));
        }
        if store.data.keys().any(String::is_empty) {
            return Err(Error::InvalidSnapshot(format!("store {name:?} has an empty label")));
        }
        if let Some(index) = store.comments.iter().position(String::is_empty) {
            return Err(Error::InvalidSnapshot(format!(
                "store {name:?} has an empty comment at index {index}"
            )));
        }
    }
    Ok(())
}
