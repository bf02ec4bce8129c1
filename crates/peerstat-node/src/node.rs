//! Peerstat Node - the actor that owns a session's state.
//!
//! Architecture:
//! - One task owns the [`StateAggregate`] and the [`PeerMesh`]
//! - UI events arrive as [`Command`]s through a cloneable [`NodeHandle`]
//! - Transports report channel activity as [`TransportEvent`]s
//! - Both queues are drained by one `select!` loop, so mutations never interleave

use crate::error::{Error, Result};
use crate::mesh::{MeshStats, PeerMesh};
use crate::state::StateAggregate;
use crate::transport::{
    ConnectionId, EventSink, PeerId, TcpTransport, Transport, TransportEvent,
};
use peerstat_metrics::{AggregateSnapshot, Rect, Viewport};
use peerstat_protocols::codec;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Configuration for a peerstat node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Host every peer listens on
    pub host: IpAddr,

    /// Port of peer 0; peer `n` listens on `base_port + n`
    pub base_port: u16,

    /// Number of peer ids dialled at startup
    pub id_space: PeerId,

    /// Fixed peer id instead of a random draw
    pub peer_id: Option<PeerId>,

    /// Send the current snapshot to each newly opened channel
    pub greet_new_peers: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 47000,
            id_space: 10,
            peer_id: None,
            greet_new_peers: true,
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let host = parse_var(&lookup, "PEERSTAT_HOST")?.unwrap_or(defaults.host);
        let base_port = parse_var(&lookup, "PEERSTAT_BASE_PORT")?.unwrap_or(defaults.base_port);
        let id_space = parse_var(&lookup, "PEERSTAT_ID_SPACE")?.unwrap_or(defaults.id_space);
        let peer_id = parse_var(&lookup, "PEERSTAT_PEER_ID")?;
        let greet_new_peers = match lookup("PEERSTAT_GREET_PEERS") {
            None => defaults.greet_new_peers,
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                Error::Config(format!("PEERSTAT_GREET_PEERS: expected a boolean, got {raw:?}"))
            })?,
        };

        let config = Self {
            host,
            base_port,
            id_space,
            peer_id,
            greet_new_peers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject id spaces that are empty or run past the last port.
    pub fn validate(&self) -> Result<()> {
        if self.id_space == 0 {
            return Err(Error::Config("id space must hold at least one peer".into()));
        }
        if u32::from(self.base_port) + u32::from(self.id_space) - 1 > u32::from(u16::MAX) {
            return Err(Error::Config(format!(
                "ports {}..{} do not fit",
                self.base_port,
                u32::from(self.base_port) + u32::from(self.id_space)
            )));
        }
        if let Some(id) = self.peer_id {
            if id >= self.id_space {
                return Err(Error::Config(format!(
                    "peer id {id} is outside the id space 0..{}",
                    self.id_space
                )));
            }
        }
        Ok(())
    }

    /// TCP transport over this config's port range.
    pub fn tcp_transport(&self) -> TcpTransport {
        TcpTransport::new(self.host, self.base_port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}: {e} (got {raw:?})")))
        })
        .transpose()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Requests handled by the node task.
#[derive(Debug)]
pub enum Command {
    TextFieldChange { store: String, text: String },
    KeyUp { store: String, key_code: u32 },
    Focus { store: String },
    VisibilityCheck { store: String, rect: Rect, viewport: Viewport },
    Scroll,
    Snapshot(oneshot::Sender<AggregateSnapshot>),
    Stats(oneshot::Sender<MeshStats>),
    Shutdown,
}

/// Cloneable sender side of a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NodeHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Stopped)
    }

    pub fn text_field_change(&self, store: &str, text: impl Into<String>) -> Result<()> {
        self.send(Command::TextFieldChange {
            store: store.to_string(),
            text: text.into(),
        })
    }

    pub fn key_up(&self, store: &str, key_code: u32) -> Result<()> {
        self.send(Command::KeyUp {
            store: store.to_string(),
            key_code,
        })
    }

    pub fn focus(&self, store: &str) -> Result<()> {
        self.send(Command::Focus {
            store: store.to_string(),
        })
    }

    pub fn visibility_check(&self, store: &str, rect: Rect, viewport: Viewport) -> Result<()> {
        self.send(Command::VisibilityCheck {
            store: store.to_string(),
            rect,
            viewport,
        })
    }

    pub fn scroll(&self) -> Result<()> {
        self.send(Command::Scroll)
    }

    /// Current aggregate snapshot.
    pub async fn snapshot(&self) -> Result<AggregateSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub async fn stats(&self) -> Result<MeshStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx))?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Called with the aggregate after every change that could affect the view.
pub type RenderFn = Box<dyn FnMut(&StateAggregate) + Send>;

/// A peerstat node instance.
pub struct Node<T: Transport> {
    config: NodeConfig,
    transport: Arc<T>,
    state: StateAggregate,
    mesh: PeerMesh,
    render: RenderFn,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: EventSink,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl<T: Transport> Node<T> {
    /// Create a node with the standard dashboard. Nothing touches the network
    /// until [`Node::run`].
    pub fn new(config: NodeConfig, transport: Arc<T>, render: RenderFn) -> Result<(Self, NodeHandle)> {
        config.validate()?;
        let state = StateAggregate::dashboard()?;
        let mesh = match config.peer_id {
            Some(id) => PeerMesh::new(id, config.id_space),
            None => PeerMesh::random(config.id_space),
        };

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let node = Self {
            config,
            transport,
            state,
            mesh,
            render,
            commands,
            events_tx,
            events,
        };
        Ok((node, NodeHandle { commands: commands_tx }))
    }

    pub fn own_id(&self) -> PeerId {
        self.mesh.own_id()
    }

    /// Join the mesh and serve commands and transport events until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!("Peerstat node starting");
        info!("  Peer id: {}", self.mesh.own_id());
        info!("  Id space: {}", self.config.id_space);
        info!("  Greet new peers: {}", self.config.greet_new_peers);

        self.mesh.bootstrap(self.transport.as_ref(), &self.events_tx);
        // Baseline broadcast, so the initial page load is not lost.
        self.render_and_broadcast();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    // Every handle dropped counts as a shutdown.
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        info!("Peerstat node {} stopped", self.mesh.own_id());
        Ok(())
    }

    /// Returns false once the node should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        let outcome = match command {
            Command::TextFieldChange { store, text } => self.state.on_text_field_change(&store, text),
            Command::KeyUp { store, key_code } => self.state.on_key_up(&store, key_code).map(drop),
            Command::Focus { store } => self.state.on_focus(&store),
            Command::VisibilityCheck {
                store,
                rect,
                viewport,
            } => self
                .state
                .on_possible_visibility_change(&store, &rect, &viewport)
                .map(drop),
            Command::Scroll => self.state.on_scroll(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
                return true;
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.mesh.stats());
                return true;
            }
            Command::Shutdown => {
                debug!("Shutdown requested");
                return false;
            }
        };

        if let Err(e) = outcome {
            warn!("Command failed: {}", e);
        }
        self.render_and_broadcast();
        true
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Incoming(channel) => self.mesh.on_inbound(channel),
            TransportEvent::Open(conn) => {
                if self.mesh.on_open(conn).is_some() && self.config.greet_new_peers {
                    self.greet(conn);
                }
            }
            TransportEvent::Data { conn, payload } => self.handle_payload(conn, &payload),
            TransportEvent::Error { conn, reason } => self.mesh.on_error(conn, &reason),
            TransportEvent::Closed(conn) => self.mesh.on_close(conn),
        }
    }

    fn handle_payload(&mut self, conn: ConnectionId, payload: &str) {
        let remote = match codec::decode(payload) {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Dropping payload from connection {}: {}", conn, e);
                return;
            }
        };

        let changed = self.state.apply_remote(&remote);
        trace!(conn, changed, "Applied remote snapshot");
        self.render_and_broadcast();
    }

    /// Bring a freshly opened channel up to date.
    fn greet(&self, conn: ConnectionId) {
        let payload = match codec::encode(&self.state.snapshot()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode greeting: {}", e);
                return;
            }
        };
        if let Err(e) = self.mesh.send_to(conn, &payload) {
            debug!("Greeting connection {} failed: {}", conn, e);
        }
    }

    fn render_and_broadcast(&mut self) {
        (self.render)(&self.state);
        if let Err(e) = self.state.recompute_and_maybe_broadcast(&self.mesh) {
            warn!("Broadcast failed: {}", e);
        }
    }
}
