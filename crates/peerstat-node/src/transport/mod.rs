//! Transport boundary.
//!
//! The mesh needs very little from a transport: a way to listen under its own
//! peer id, a way to dial another id, and a stream of events per channel.
//! Transports push [`TransportEvent`]s into an [`EventSink`] owned by the node
//! task, so all connection bookkeeping happens in one place.
//!
//! Sends are fire-and-forget onto an unbounded per-channel buffer. A slow peer
//! can therefore accumulate backlog; nothing here pushes back.

pub mod memory;
pub mod tcp;

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Small integer address of a peer. Not guaranteed unique.
pub type PeerId = u16;

/// Identity of one transport channel.
pub type ConnectionId = u64;

/// Where transports deliver channel events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a bidirectional channel.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ConnectionId,
    peer: Option<PeerId>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Channel {
    /// Allocate a channel with a fresh id, returning the queue the transport drains.
    pub fn new(peer: Option<PeerId>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, peer, outbound }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Dialled peer id; `None` for inbound channels.
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    /// Queue a payload. Fails only once the transport side has gone away.
    pub fn send(&self, payload: &str) -> Result<()> {
        self.outbound
            .send(payload.to_string())
            .map_err(|_| Error::Transport(format!("connection {} is closed", self.id)))
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Something that happened on a channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer dialled us; the channel is not open yet.
    Incoming(Channel),
    /// The channel is ready for traffic.
    Open(ConnectionId),
    /// One payload arrived.
    Data { conn: ConnectionId, payload: String },
    /// The channel failed.
    Error { conn: ConnectionId, reason: String },
    /// The remote end hung up.
    Closed(ConnectionId),
}

/// Channel factory used by the mesh.
pub trait Transport: Send + Sync + 'static {
    /// Accept inbound channels addressed to `own_id`.
    fn listen(&self, own_id: PeerId, events: EventSink) -> Result<()>;

    /// Dial `peer`. The channel is returned at once; an `Open` event follows if
    /// the attempt succeeds, an `Error` event if it fails, and nothing at all if
    /// the peer never answers.
    fn connect(&self, peer: PeerId, events: EventSink) -> Channel;
}
