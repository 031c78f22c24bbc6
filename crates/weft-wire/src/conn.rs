//! Shared connection core for both outbound transport variants.
//!
//! Owns the socket halves, a background read loop, and the correlation map
//! that resolves request/response pairs by `sequence_id`. Inbound envelopes
//! that do not match a pending request flow to `recv` in arrival order.

use crate::frame::{read_frame, write_frame, EnvelopeCodec};
use crate::transport::WireError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use weft_types::Envelope;

/// Inbound queue depth before the read loop applies backpressure.
const INBOUND_BUFFER: usize = 256;

pub(crate) struct Conn {
    peer_addr: SocketAddr,
    codec: Arc<dyn EnvelopeCodec>,
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<Envelope>>>,
    inbound: Mutex<mpsc::Receiver<Envelope>>,
    closed: AtomicBool,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Conn {
    /// Dial the endpoint and start the read loop. The only place a socket
    /// is allocated; `close` is the only place it is released.
    pub(crate) async fn connect(
        addr: SocketAddr,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Result<Self, WireError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| WireError::Connection(format!("{addr}: {e}")))?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let pending: Arc<DashMap<Uuid, oneshot::Sender<Envelope>>> = Arc::new(DashMap::new());
        let read_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&codec),
            Arc::clone(&pending),
            inbound_tx,
        ));

        Ok(Self {
            peer_addr,
            codec,
            writer: Mutex::new(writer),
            pending,
            inbound: Mutex::new(inbound_rx),
            closed: AtomicBool::new(false),
            read_task: Mutex::new(Some(read_task)),
        })
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write one framed envelope, fire-and-forget.
    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), WireError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WireError::Closed);
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut writer, &*self.codec, envelope).await
    }

    /// Write one framed envelope and await the reply with the same
    /// `sequence_id`, or time out.
    pub(crate) async fn request(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Envelope, WireError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WireError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(envelope.sequence_id, tx);

        if let Err(e) = self.send(envelope).await {
            self.pending.remove(&envelope.sequence_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The read loop ended and dropped our sender.
            Ok(Err(_)) => Err(WireError::Closed),
            Err(_) => {
                self.pending.remove(&envelope.sequence_id);
                Err(WireError::Timeout(timeout))
            }
        }
    }

    /// Next uncorrelated inbound envelope, in connection order.
    pub(crate) async fn recv(&self) -> Result<Envelope, WireError> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(WireError::Closed)
    }

    /// Stop the read loop, fail pending requests with `Closed`, and release
    /// the socket. Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        // Dropping the senders wakes correlated waiters with Closed.
        self.pending.clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(peer = %self.peer_addr, "transport closed");
    }
}

/// Background read loop: correlated replies resolve their pending request,
/// everything else is queued for `recv`. A malformed frame is logged and
/// dropped; the connection stays open.
async fn read_loop(
    mut reader: OwnedReadHalf,
    codec: Arc<dyn EnvelopeCodec>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<Envelope>>>,
    inbound: mpsc::Sender<Envelope>,
) {
    loop {
        match read_frame(&mut reader, &*codec).await {
            Ok(envelope) => {
                if let Some((_, tx)) = pending.remove(&envelope.sequence_id) {
                    let _ = tx.send(envelope);
                    continue;
                }
                if inbound.send(envelope).await.is_err() {
                    break;
                }
            }
            Err(WireError::Decode(e)) => {
                warn!(error = %e, "dropping malformed frame");
            }
            Err(WireError::Closed) => break,
            Err(e) => {
                debug!(error = %e, "connection read ended");
                break;
            }
        }
    }
    // Wake any requests still waiting on this connection.
    pending.clear();
}
