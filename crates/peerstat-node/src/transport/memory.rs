//! In-process transport for tests and local demos.
//!
//! Every clone of a [`MemoryTransport`] shares one hub. Dialling an id that has
//! a listener opens a channel pair immediately; dialling an id nobody listens on
//! yields a channel that never opens, like a peer that never answers.

use super::{Channel, ConnectionId, EventSink, PeerId, Transport, TransportEvent};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<PeerId, EventSink>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn listener(&self, peer: PeerId) -> Option<EventSink> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .filter(|sink| !sink.is_closed())
            .cloned()
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, own_id: PeerId, events: EventSink) -> Result<()> {
        let previous = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(own_id, events);
        if previous.is_some() {
            // Duplicate ids are tolerated; the newest listener takes the address.
            warn!("Peer id {} already had a listener, replacing it", own_id);
        }
        debug!("Memory transport listening as peer {}", own_id);
        Ok(())
    }

    fn connect(&self, peer: PeerId, events: EventSink) -> Channel {
        let (local, local_out) = Channel::new(Some(peer));
        let Some(listener) = self.listener(peer) else {
            return local;
        };

        let (remote, remote_out) = Channel::new(None);
        let remote_id = remote.id();
        if listener.send(TransportEvent::Incoming(remote)).is_err() {
            return local;
        }
        let _ = listener.send(TransportEvent::Open(remote_id));
        let _ = events.send(TransportEvent::Open(local.id()));

        tokio::spawn(pump(local_out, remote_id, listener));
        tokio::spawn(pump(remote_out, local.id(), events));
        local
    }
}

/// Forward everything queued on one end as `Data` for the other end.
async fn pump(mut outbound: mpsc::UnboundedReceiver<String>, to: ConnectionId, sink: EventSink) {
    while let Some(payload) = outbound.recv().await {
        if sink.send(TransportEvent::Data { conn: to, payload }).is_err() {
            return;
        }
    }
    let _ = sink.send(TransportEvent::Closed(to));
}
