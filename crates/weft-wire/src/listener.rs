//! The listening endpoint a coordinator opens.
//!
//! Binds a TCP listener, accepts connections in a spawned loop, and forwards
//! every decoded inbound envelope (plus a handle for replying on the same
//! connection) into an mpsc queue consumed by the node. The listener also
//! remembers which connection each sender arrived on, so the node can push
//! envelopes back down to peers that dialed in.

use crate::frame::{read_frame, write_frame, EnvelopeCodec};
use crate::transport::WireError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use weft_types::{Envelope, NodeId};

/// An envelope received on the listening endpoint.
pub struct InboundEnvelope {
    pub envelope: Envelope,
    /// Remote address of the connection it arrived on.
    pub remote: SocketAddr,
    /// Writes back on the same connection.
    pub reply: ReplyHandle,
}

/// Write handle for one accepted connection.
#[derive(Clone)]
pub struct ReplyHandle {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    codec: Arc<dyn EnvelopeCodec>,
}

impl ReplyHandle {
    /// Send an envelope down this connection.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), WireError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut writer, &*self.codec, envelope).await
    }
}

/// The coordinator-side listening endpoint.
pub struct WireListener {
    local_addr: SocketAddr,
    /// Live inbound connections keyed by the sender observed on them.
    connections: Arc<DashMap<NodeId, ReplyHandle>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WireListener {
    /// Bind and start accepting. Port 0 picks an ephemeral port.
    pub async fn bind(
        addr: SocketAddr,
        codec: Arc<dyn EnvelopeCodec>,
        inbound: mpsc::Sender<InboundEnvelope>,
    ) -> Result<Self, WireError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WireError::Connection(format!("{addr}: {e}")))?;
        let local_addr = listener.local_addr()?;
        let connections: Arc<DashMap<NodeId, ReplyHandle>> = Arc::new(DashMap::new());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            codec,
            inbound,
            Arc::clone(&connections),
        ));

        info!(%local_addr, "listening endpoint open");
        Ok(Self {
            local_addr,
            connections,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Push an envelope down the live connection a peer dialed in on.
    /// Returns `false` if no such connection exists.
    pub async fn send_to(&self, id: &NodeId, envelope: &Envelope) -> Result<bool, WireError> {
        let handle = match self.connections.get(id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };
        handle.send(envelope).await?;
        Ok(true)
    }

    /// Node IDs with a live inbound connection.
    pub fn connected(&self) -> Vec<NodeId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop accepting, drop all inbound connections, and wait for the
    /// accept loop to end. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        self.connections.clear();
        info!(local_addr = %self.local_addr, "listening endpoint closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    codec: Arc<dyn EnvelopeCodec>,
    inbound: mpsc::Sender<InboundEnvelope>,
    connections: Arc<DashMap<NodeId, ReplyHandle>>,
) {
    // Connection tasks live in the JoinSet so aborting the accept loop
    // (listener shutdown) aborts them too.
    let mut conns = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(%remote, "accepted connection");
                conns.spawn(serve_connection(
                    stream,
                    remote,
                    Arc::clone(&codec),
                    inbound.clone(),
                    Arc::clone(&connections),
                ));
            }
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Read loop for one accepted connection. Malformed frames are dropped and
/// logged; the connection stays open until EOF or a framing violation.
async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    codec: Arc<dyn EnvelopeCodec>,
    inbound: mpsc::Sender<InboundEnvelope>,
    connections: Arc<DashMap<NodeId, ReplyHandle>>,
) {
    let (mut reader, writer) = stream.into_split();
    let reply = ReplyHandle {
        writer: Arc::new(Mutex::new(writer)),
        codec: Arc::clone(&codec),
    };
    let mut peer_id: Option<NodeId> = None;

    loop {
        match read_frame(&mut reader, &*codec).await {
            Ok(envelope) => {
                // Remember which connection this sender is reachable on.
                if peer_id.as_ref() != Some(&envelope.sender) {
                    peer_id = Some(envelope.sender.clone());
                    connections.insert(envelope.sender.clone(), reply.clone());
                }
                let item = InboundEnvelope {
                    envelope,
                    remote,
                    reply: reply.clone(),
                };
                if inbound.send(item).await.is_err() {
                    break;
                }
            }
            Err(WireError::Decode(e)) => {
                warn!(%remote, error = %e, "dropping malformed frame");
            }
            Err(WireError::Closed) => break,
            Err(e) => {
                debug!(%remote, error = %e, "inbound connection ended");
                break;
            }
        }
    }

    if let Some(id) = peer_id {
        connections.remove(&id);
    }
    debug!(%remote, "connection closed");
}
