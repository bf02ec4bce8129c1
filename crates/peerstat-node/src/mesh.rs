//! Peerstat Mesh
//!
//! # No Server
//!
//! Every node dials every id in a small fixed id space (itself included) and
//! accepts whatever dials it. There is no membership protocol: a channel joins
//! the mesh the moment its transport reports it open, and it is never removed.
//!
//! ```text
//! bootstrap ──► listen(own_id)
//!           └─► connect(0..id_space) ──► pending ──Open──► connections
//! inbound   ────────────────────────────► pending ──Open──► connections
//! ```
//!
//! # Identity
//!
//! Connections are keyed by [`ConnectionId`], the identity of the transport
//! channel, not by peer id. Two handshakes with the same logical peer are two
//! entries, and two peers that drew the same id are simply both reachable.
//!
//! # Failure
//!
//! A pending channel that errors is dropped and never retried. An open channel
//! that errors or closes stays registered; later sends to it fail quietly.

use crate::error::{Error, Result};
use crate::transport::{Channel, ConnectionId, EventSink, PeerId, Transport};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Point-in-time view of the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    pub own_id: PeerId,
    pub pending: usize,
    pub connections: usize,
}

/// The set of live peer channels.
#[derive(Debug)]
pub struct PeerMesh {
    own_id: PeerId,
    id_space: PeerId,
    /// Channels waiting for their transport to open.
    pending: HashMap<ConnectionId, Channel>,
    /// Open channels, in registration order.
    connections: BTreeMap<ConnectionId, Channel>,
}

impl PeerMesh {
    /// Create a mesh with a chosen id in `0..id_space`.
    pub fn new(own_id: PeerId, id_space: PeerId) -> Self {
        Self {
            own_id,
            id_space,
            pending: HashMap::new(),
            connections: BTreeMap::new(),
        }
    }

    /// Create a mesh with an id drawn uniformly from `0..id_space`.
    pub fn random(id_space: PeerId) -> Self {
        let own_id = rand::thread_rng().gen_range(0..id_space.max(1));
        Self::new(own_id, id_space)
    }

    pub fn own_id(&self) -> PeerId {
        self.own_id
    }

    pub fn id_space(&self) -> PeerId {
        self.id_space
    }

    /// Listen under our id, then dial every id in the space.
    ///
    /// A failed listen (typically another peer holding our id) is logged and the
    /// node carries on with outbound channels only.
    pub fn bootstrap<T: Transport + ?Sized>(&mut self, transport: &T, events: &EventSink) {
        info!("Bootstrapping mesh as peer {} (id space {})", self.own_id, self.id_space);

        if let Err(e) = transport.listen(self.own_id, events.clone()) {
            warn!("Could not listen as peer {}: {}", self.own_id, e);
        }

        for peer in 0..self.id_space {
            let channel = transport.connect(peer, events.clone());
            debug!("Dialling peer {} on connection {}", peer, channel.id());
            self.pending.insert(channel.id(), channel);
        }
    }

    /// Track a channel a peer opened to us.
    pub fn on_inbound(&mut self, channel: Channel) {
        debug!("Inbound connection {}", channel.id());
        self.pending.insert(channel.id(), channel);
    }

    /// Promote a pending channel once its transport is open.
    ///
    /// Returns the newly registered channel, or `None` if the id was unknown or
    /// already open.
    pub fn on_open(&mut self, conn: ConnectionId) -> Option<&Channel> {
        let channel = self.pending.remove(&conn)?;
        match channel.peer() {
            Some(peer) => info!("Connection {} to peer {} open", conn, peer),
            None => info!("Inbound connection {} open", conn),
        }
        self.connections.insert(conn, channel);
        self.connections.get(&conn)
    }

    /// Record a transport error.
    pub fn on_error(&mut self, conn: ConnectionId, reason: &str) {
        if let Some(channel) = self.pending.remove(&conn) {
            match channel.peer() {
                Some(peer) => warn!("Connection to peer {} failed before opening: {}", peer, reason),
                None => warn!("Inbound connection {} failed before opening: {}", conn, reason),
            }
        } else if self.connections.contains_key(&conn) {
            warn!("Connection {} error: {}", conn, reason);
        } else {
            debug!("Error on unknown connection {}: {}", conn, reason);
        }
    }

    /// Record that the remote end hung up. The channel stays registered.
    pub fn on_close(&mut self, conn: ConnectionId) {
        if self.pending.remove(&conn).is_some() {
            debug!("Pending connection {} closed", conn);
        } else {
            info!("Connection {} closed by peer", conn);
        }
    }

    /// Send the same payload to every open channel; returns how many accepted it.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        for (conn, channel) in &self.connections {
            match channel.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Broadcast skipped connection {}: {}", conn, e),
            }
        }
        debug!(
            delivered,
            connections = self.connections.len(),
            bytes = payload.len(),
            "Broadcast snapshot"
        );
        delivered
    }

    /// Send to one open channel.
    pub fn send_to(&self, conn: ConnectionId, payload: &str) -> Result<()> {
        self.connections
            .get(&conn)
            .ok_or_else(|| Error::Transport(format!("connection {conn} is not open")))?
            .send(payload)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Channel> {
        self.connections.values()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> MeshStats {
        MeshStats {
            own_id: self.own_id,
            pending: self.pending.len(),
            connections: self.connections.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TransportEvent};
    use tokio::sync::mpsc;

    fn drain(mesh: &mut PeerMesh, rx: &mut mpsc::UnboundedReceiver<TransportEvent>) {
        while let Ok(event) = rx.try_recv() {
            match event {
                TransportEvent::Incoming(channel) => mesh.on_inbound(channel),
                TransportEvent::Open(conn) => {
                    mesh.on_open(conn);
                }
                TransportEvent::Error { conn, reason } => mesh.on_error(conn, &reason),
                TransportEvent::Closed(conn) => mesh.on_close(conn),
                TransportEvent::Data { .. } => {}
            }
        }
    }

    #[test]
    fn random_id_stays_in_space() {
        for _ in 0..100 {
            assert!(PeerMesh::random(10).own_id() < 10);
        }
        assert_eq!(PeerMesh::random(0).own_id(), 0);
    }

    #[test]
    fn registers_only_once_open() {
        let mut mesh = PeerMesh::new(0, 10);
        let (channel, _rx) = Channel::new(None);
        let conn = channel.id();

        mesh.on_inbound(channel);
        assert_eq!(mesh.connection_count(), 0);
        assert_eq!(mesh.stats().pending, 1);

        assert!(mesh.on_open(conn).is_some());
        assert_eq!(mesh.connection_count(), 1);
        assert_eq!(mesh.stats().pending, 0);

        // A second open for the same channel is not a second entry.
        assert!(mesh.on_open(conn).is_none());
        assert_eq!(mesh.connection_count(), 1);
    }

    #[test]
    fn error_before_open_drops_channel() {
        let mut mesh = PeerMesh::new(0, 10);
        let (channel, _rx) = Channel::new(Some(3));
        let conn = channel.id();
        mesh.on_inbound(channel);

        mesh.on_error(conn, "refused");
        assert_eq!(mesh.stats().pending, 0);
        assert!(mesh.on_open(conn).is_none());
        assert_eq!(mesh.connection_count(), 0);
    }

    #[test]
    fn closed_channels_stay_registered() {
        let mut mesh = PeerMesh::new(0, 10);
        let (channel, _rx) = Channel::new(Some(3));
        let conn = channel.id();
        mesh.on_inbound(channel);
        mesh.on_open(conn);

        mesh.on_error(conn, "reset");
        mesh.on_close(conn);
        assert_eq!(mesh.connection_count(), 1);
    }

    #[test]
    fn broadcast_skips_dead_channels() {
        let mut mesh = PeerMesh::new(0, 10);
        let (dead, dead_rx) = Channel::new(Some(1));
        let (live, mut live_rx) = Channel::new(Some(2));
        let (dead_id, live_id) = (dead.id(), live.id());
        mesh.on_inbound(dead);
        mesh.on_inbound(live);
        mesh.on_open(dead_id);
        mesh.on_open(live_id);
        drop(dead_rx);

        assert_eq!(mesh.broadcast("payload"), 1);
        assert_eq!(live_rx.try_recv().unwrap(), "payload");
    }

    #[test]
    fn send_to_requires_open_channel() {
        let mut mesh = PeerMesh::new(0, 10);
        let (channel, mut rx) = Channel::new(Some(1));
        let conn = channel.id();
        mesh.on_inbound(channel);
        assert!(mesh.send_to(conn, "early").is_err());

        mesh.on_open(conn);
        mesh.send_to(conn, "hello").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[tokio::test]
    async fn inbound_connections_join_the_pool() {
        let hub = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mesh = PeerMesh::new(0, 1);
        hub.listen(0, tx.clone()).unwrap();

        // A stranger dials us.
        let (other_tx, _other_rx) = mpsc::unbounded_channel();
        let _stranger = hub.connect(0, other_tx);

        drain(&mut mesh, &mut rx);
        assert_eq!(mesh.connection_count(), 1);
    }

    #[tokio::test]
    async fn bootstrap_dials_whole_space_including_self() {
        let hub = MemoryTransport::new();
        let (other_tx, _other_rx) = mpsc::unbounded_channel();
        hub.listen(5, other_tx).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mesh = PeerMesh::new(2, 10);
        mesh.bootstrap(&hub, &tx);
        drain(&mut mesh, &mut rx);

        // Peer 5, plus both ends of the self-connection to peer 2.
        assert_eq!(mesh.connection_count(), 3);
        assert_eq!(mesh.stats().pending, 8);
        let mut dialled: Vec<_> = mesh.connections().filter_map(Channel::peer).collect();
        dialled.sort_unstable();
        assert_eq!(dialled, [2, 5]);
    }
}
