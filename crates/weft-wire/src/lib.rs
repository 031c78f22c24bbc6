//! Transport layer for the weft communication fabric.
//!
//! Hides transport-specific connection and framing details behind one
//! send/receive contract:
//!
//! - **[`Transport`]**: the polymorphic capability (send, request, push,
//!   recv, close) with two variants — [`RpcTransport`] (request/response)
//!   and [`DuplexTransport`] (fire-and-forget over a persistent socket).
//! - **[`WireListener`]**: the listening endpoint a coordinator opens.
//! - **[`EnvelopeCodec`]**: the injected serialize/deserialize seam. Frames
//!   are a 4-byte big-endian length header followed by the codec body.

pub mod frame;
pub mod listener;
pub mod transport;

mod conn;
mod duplex;
mod rpc;

pub use duplex::DuplexTransport;
pub use frame::{EnvelopeCodec, JsonCodec, MAX_FRAME_SIZE};
pub use listener::{InboundEnvelope, ReplyHandle, WireListener};
pub use rpc::RpcTransport;
pub use transport::{connect_transport, Transport, WireError};
