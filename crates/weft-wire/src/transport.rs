//! The transport contract and its error taxonomy.

use crate::duplex::DuplexTransport;
use crate::frame::EnvelopeCodec;
use crate::rpc::RpcTransport;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use weft_types::{Envelope, TransportKind};

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The endpoint was unreachable or refused at connect time. Fatal to
    /// that connect attempt; retried by caller policy, never in here.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A per-call send failure (write error, serialization failure).
    #[error("send failed: {0}")]
    Send(String),

    /// A correlated reply did not arrive within the caller's timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An inbound frame could not be decoded. Per-frame: logged and
    /// dropped by the read loop, the connection stays open.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A frame header announced a body larger than [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// The transport was closed; surfaced to any operation racing the close.
    #[error("transport closed")]
    Closed,

    /// An underlying I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The pluggable mechanism that physically carries envelopes.
///
/// Establishing a connection is the only place network resources are
/// allocated and [`Transport::close`] the only place they are released.
/// `close` is idempotent and cancels in-flight `recv`/`request` calls,
/// which resolve with [`WireError::Closed`] rather than hanging.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// The remote endpoint this transport is connected to.
    fn peer_addr(&self) -> SocketAddr;

    /// Dispatch an envelope with the variant's send semantics: the RPC
    /// variant waits for the correlated reply and returns it, the duplex
    /// variant is fire-and-forget and returns `None`.
    async fn send(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Option<Envelope>, WireError>;

    /// Dispatch an envelope and await the reply carrying the same
    /// `sequence_id`, or fail with [`WireError::Timeout`]. Works on both
    /// variants; health probes use this.
    async fn request(&self, envelope: &Envelope, timeout: Duration)
        -> Result<Envelope, WireError>;

    /// Write an envelope without waiting for anything. Used for protocol
    /// replies (which are themselves the answer to a pending request on
    /// the other side) and broadcast fan-out.
    async fn push(&self, envelope: &Envelope) -> Result<(), WireError>;

    /// Next inbound envelope that is not a correlated reply, in the order
    /// received on this connection.
    async fn recv(&self) -> Result<Envelope, WireError>;

    /// Release the underlying socket. Idempotent.
    async fn close(&self);
}

/// Connect a transport of the configured kind.
///
/// The variant is selected once here, at construction; callers hold a
/// `dyn Transport` and never branch on the kind per call.
pub async fn connect_transport(
    kind: TransportKind,
    addr: SocketAddr,
    codec: Arc<dyn EnvelopeCodec>,
) -> Result<Arc<dyn Transport>, WireError> {
    match kind {
        TransportKind::Rpc => {
            let transport = RpcTransport::connect(addr, codec).await?;
            Ok(Arc::new(transport))
        }
        TransportKind::DuplexSocket => {
            let transport = DuplexTransport::connect(addr, codec).await?;
            Ok(Arc::new(transport))
        }
    }
}
