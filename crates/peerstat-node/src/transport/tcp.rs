//! TCP transport: peer `n` listens on `base_port + n`.
//!
//! Frames are newline-delimited JSON, one snapshot per line. A frame that is
//! longer than [`MAX_PAYLOAD_BYTES`] or not UTF-8 is skipped up to the next
//! newline; the connection stays up. There are no connect timeouts and no
//! retries; a dial that fails reports an `Error` event and is never attempted
//! again.

use super::{Channel, ConnectionId, EventSink, PeerId, Transport, TransportEvent};
use crate::error::Result;
use peerstat_protocols::MAX_PAYLOAD_BYTES;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Maps the peer id space onto a contiguous port range on one host.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: IpAddr,
    base_port: u16,
}

impl TcpTransport {
    pub fn new(host: IpAddr, base_port: u16) -> Self {
        Self { host, base_port }
    }

    /// Listening address of a peer id.
    pub fn addr_for(&self, peer: PeerId) -> SocketAddr {
        SocketAddr::new(self.host, self.base_port.saturating_add(peer))
    }
}

impl Transport for TcpTransport {
    fn listen(&self, own_id: PeerId, events: EventSink) -> Result<()> {
        let addr = self.addr_for(own_id);
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        info!("Mesh (TCP) listening on {} as peer {}", addr, own_id);

        tokio::spawn(accept_loop(listener, events));
        Ok(())
    }

    fn connect(&self, peer: PeerId, events: EventSink) -> Channel {
        let (channel, outbound) = Channel::new(Some(peer));
        let conn = channel.id();
        let addr = self.addr_for(peer);

        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!("Connected to peer {} at {}", peer, addr);
                    drive(stream, conn, outbound, events).await;
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Error {
                        conn,
                        reason: format!("connect to {addr}: {e}"),
                    });
                }
            }
        });

        channel
    }
}

async fn accept_loop(listener: TcpListener, events: EventSink) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Incoming mesh connection from {}", addr);
                let (channel, outbound) = Channel::new(None);
                let conn = channel.id();
                if events.send(TransportEvent::Incoming(channel)).is_err() {
                    debug!("Node gone, closing listener");
                    break;
                }
                tokio::spawn(drive(stream, conn, outbound, events.clone()));
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Pump one connected stream: report it open, forward inbound frames, write
/// queued payloads.
async fn drive(
    stream: TcpStream,
    conn: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: EventSink,
) {
    if events.send(TransportEvent::Open(conn)).is_err() {
        return;
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    // Partial frame; survives a cancelled read.
    let mut buf = Vec::new();
    let mut oversized = false;

    loop {
        tokio::select! {
            read = read_capped(&mut reader, &mut buf) => {
                match read {
                    Ok(_) if buf.ends_with(b"\n") => {
                        if oversized {
                            oversized = false;
                        } else if let Some(payload) = frame_payload(conn, &buf) {
                            trace!(conn, bytes = payload.len(), "Frame received");
                            if events.send(TransportEvent::Data { conn, payload }).is_err() {
                                break;
                            }
                        }
                        buf.clear();
                    }
                    Ok(_) if buf.len() > MAX_PAYLOAD_BYTES => {
                        if !oversized {
                            warn!(conn, limit = MAX_PAYLOAD_BYTES, "Dropping oversized frame");
                            oversized = true;
                        }
                        buf.clear();
                    }
                    Ok(0) => {
                        let _ = events.send(TransportEvent::Closed(conn));
                        break;
                    }
                    // Unterminated tail before EOF; the next read reports it.
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error { conn, reason: e.to_string() });
                        break;
                    }
                }
            }
            next = outbound.recv() => {
                let Some(payload) = next else {
                    // Every handle to the channel was dropped.
                    break;
                };
                if let Err(e) = write_frame(&mut writer, &payload).await {
                    let _ = events.send(TransportEvent::Error { conn, reason: e.to_string() });
                    break;
                }
            }
        }
    }
}

/// Read towards the next newline, never holding more than one byte past the
/// frame limit. Bytes read before a cancellation stay in `buf`.
async fn read_capped(reader: &mut BufReader<OwnedReadHalf>, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let room = (MAX_PAYLOAD_BYTES + 1).saturating_sub(buf.len()) as u64;
    reader.take(room).read_until(b'\n', buf).await
}

/// Text of a complete frame, or `None` if it is blank or not UTF-8.
fn frame_payload(conn: ConnectionId, frame: &[u8]) -> Option<String> {
    let line = frame.strip_suffix(b"\n").unwrap_or(frame);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            warn!(conn, "Dropping frame that is not UTF-8: {}", e);
            None
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, payload: &str) -> std::io::Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}
