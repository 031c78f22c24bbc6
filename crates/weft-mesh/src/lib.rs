//! Peer registry and health monitoring for the weft communication fabric.
//!
//! The [`PeerRegistry`] tracks known peers, their addresses, last-seen times
//! and measured latency, and groups them into redundancy tiers. The
//! [`HealthMonitor`] probes each peer on a fixed interval through a
//! [`Prober`] and keeps the registry's classification current.

pub mod health;
pub mod registry;

pub use health::{HealthMonitor, PeerEvent, Prober};
pub use registry::{GroupChange, PeerRecord, PeerRegistry, ProbeOutcome, RedundancyGroup};

use thiserror::Error;
use weft_types::NodeId;

/// Errors from the mesh layer.
#[derive(Debug, Error)]
pub enum MeshError {
    /// No reachable peer exists for the recipient. Surfaced immediately,
    /// never retried implicitly.
    #[error("no route to {0}: no reachable peer")]
    NoRoute(NodeId),

    /// The peer is not in the registry.
    #[error("peer not found: {0}")]
    PeerNotFound(NodeId),

    /// A health probe failed to complete.
    #[error("probe failed: {0}")]
    Probe(String),

    /// A runtime setting update named an unknown key or a bad value.
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}
