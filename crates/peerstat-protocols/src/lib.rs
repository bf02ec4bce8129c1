//! Peerstat Protocols - state gossip wire format
//!
//! Peers gossip their full analytics snapshot on every change. This crate owns
//! the boundary between raw bytes and typed state: [`codec::encode`] produces the
//! payload, [`codec::decode`] parses it against the snapshot schema and rejects
//! anything a local store could not have produced.
//!
//! # Example
//!
//! ```rust
//! use peerstat_metrics::AggregateSnapshot;
//! use peerstat_protocols::codec;
//!
//! let payload = codec::encode(&AggregateSnapshot::default()).unwrap();
//! assert_eq!(payload, r#"{"graphs":{}}"#);
//! assert!(codec::decode(&payload).is_ok());
//! ```

pub mod codec;
pub mod error;

pub use codec::{decode, encode, MAX_PAYLOAD_BYTES};
pub use error::{Error, Result};
