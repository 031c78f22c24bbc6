//! Persistent duplex-socket transport variant.

use crate::conn::Conn;
use crate::frame::EnvelopeCodec;
use crate::transport::{Transport, WireError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use weft_types::{Envelope, TransportKind};

/// Fire-and-forget transport over a persistent connection.
///
/// `send` returns as soon as the frame is written; replies arrive
/// asynchronously on the `recv` sequence. `request` shares the connection's
/// correlation map so health probes work over this variant too.
pub struct DuplexTransport {
    conn: Conn,
}

impl DuplexTransport {
    pub async fn connect(
        addr: SocketAddr,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Result<Self, WireError> {
        let conn = Conn::connect(addr, codec).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::DuplexSocket
    }

    fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    async fn send(
        &self,
        envelope: &Envelope,
        _timeout: Duration,
    ) -> Result<Option<Envelope>, WireError> {
        self.conn.send(envelope).await.map(|_| None)
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
