//! Peerstat Node - peer-to-peer analytics dashboard
//!
//! Every open copy of the dashboard is a peer. Each one counts its own user's
//! activity, gossips its full state to every peer it can reach, and merges
//! whatever it hears back, so all copies drift towards the same numbers without
//! a server.
//!
//! # Architecture
//!
//! - **Dashboard**: the four standard charts and the funnel steps
//! - **State**: the aggregate of all stores plus change-detected broadcast
//! - **Mesh**: the set of open peer channels
//! - **Transport**: TCP or in-memory channels behind one trait
//! - **Node**: the actor that owns state and mesh and serialises every mutation
//!
//! # Example
//!
//! ```no_run
//! use peerstat_node::{Node, NodeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let transport = Arc::new(config.tcp_transport());
//!     let (node, handle) = Node::new(config, transport, Box::new(|_| {}))?;
//!     tokio::spawn(node.run());
//!     handle.scroll()?;
//!     println!("{:?}", handle.snapshot().await?);
//!     Ok(())
//! }
//! ```

pub mod dashboard;
pub mod error;
pub mod mesh;
pub mod node;
pub mod state;
pub mod transport;

#[cfg(test)]
mod convergence_test;

pub use dashboard::StoreDef;
pub use error::{Error, Result};
pub use mesh::{MeshStats, PeerMesh};
pub use node::{Command, Node, NodeConfig, NodeHandle, RenderFn};
pub use state::StateAggregate;
pub use transport::{Channel, MemoryTransport, TcpTransport, Transport, TransportEvent};
