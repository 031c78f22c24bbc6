//! Request/response transport variant.

use crate::conn::Conn;
use crate::frame::EnvelopeCodec;
use crate::transport::{Transport, WireError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use weft_types::{Envelope, TransportKind};

/// Synchronous-request-shaped transport over a persistent connection.
///
/// `send` blocks until the reply with the same `sequence_id` arrives or the
/// timeout elapses, and hands the reply back. Server-pushed envelopes
/// (anything without a pending correlation) are still available through
/// `recv`.
pub struct RpcTransport {
    conn: Conn,
}

impl RpcTransport {
    pub async fn connect(
        addr: SocketAddr,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Result<Self, WireError> {
        let conn = Conn::connect(addr, codec).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Transport for RpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rpc
    }

    fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    async fn send(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Option<Envelope>, WireError> {
        // Request-shaped: delivery is acknowledged by the correlated reply.
        self.conn.request(envelope, timeout).await.map(Some)
    }

    async fn request(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Envelope, WireError> {
        self.conn.request(envelope, timeout).await
    }

    async fn push(&self, envelope: &Envelope) -> Result<(), WireError> {
        self.conn.send(envelope).await
    }

    async fn recv(&self) -> Result<Envelope, WireError> {
        self.conn.recv().await
    }

    async fn close(&self) {
        self.conn.close().await;
    }
}
