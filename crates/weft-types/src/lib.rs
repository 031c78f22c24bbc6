//! Core types for the weft communication fabric.
//!
//! Pure data, no I/O: node identity, the message [`Envelope`], topological
//! [`Role`]s, control-command payloads, and the static configuration object
//! consumed by a fabric node.

pub mod config;
pub mod control;
pub mod envelope;
pub mod role;

pub use config::{FabricConfig, HealthSettings, PeerEndpoint, TransportKind};
pub use control::ControlCommand;
pub use envelope::{Envelope, NodeId, Recipient};
pub use role::Role;
