//! Static configuration consumed by a fabric node.
//!
//! Loaded from a TOML file (see `weft-node`); every field has a default so a
//! partial file is valid.

use crate::envelope::NodeId;
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Which transport variant the node uses for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Request/response: `send` blocks until the correlated reply arrives.
    Rpc,
    /// Persistent duplex socket: `send` is fire-and-forget, replies arrive
    /// asynchronously on the receive sequence.
    DuplexSocket,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Rpc
    }
}

/// A statically configured peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    /// The peer's node ID.
    pub id: NodeId,
    /// Where the peer can be dialed.
    pub address: SocketAddr,
}

/// Health-monitor tunables. Thresholds classify peers into redundancy
/// groups by measured round-trip time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Probe cadence per peer, in milliseconds.
    pub probe_interval_ms: u64,
    /// Per-probe timeout, in milliseconds.
    pub probe_timeout_ms: u64,
    /// RTT below this is FAST, in milliseconds.
    pub fast_below_ms: u64,
    /// RTT at or below this (and not FAST) is NORMAL; above is SLOW.
    pub normal_below_ms: u64,
    /// Consecutive probe failures before a peer is UNREACHABLE (>= 2).
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            fast_below_ms: 50,
            normal_below_ms: 200,
            failure_threshold: 3,
        }
    }
}

/// The full static configuration of a fabric node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// This node's unique ID.
    pub node_id: String,
    /// Initial role. `auto` waits for an external assignment.
    pub mode: Role,
    /// Transport variant for outbound connections.
    pub transport: TransportKind,
    /// Host to bind the listening endpoint on (coordinator only).
    pub host: String,
    /// Port to bind the listening endpoint on. 0 picks an ephemeral port.
    pub port: u16,
    /// Statically known peers.
    pub peers: Vec<PeerEndpoint>,
    /// Nodes allowed to issue role assignments while this node is in `auto`
    /// mode. An empty list rejects all assignments.
    pub trusted_senders: Vec<NodeId>,
    /// Request timeout for RPC-style sends, in milliseconds.
    pub request_timeout_ms: u64,
    /// Health-monitor tunables.
    pub health: HealthSettings,
    /// Default tracing filter for the CLI.
    pub log_level: String,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            mode: Role::StandalonePeer,
            transport: TransportKind::default(),
            host: "127.0.0.1".to_string(),
            port: 50_051,
            peers: Vec::new(),
            trusted_senders: Vec::new(),
            request_timeout_ms: 5_000,
            health: HealthSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl FabricConfig {
    /// This node's ID as a [`NodeId`].
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    /// The address the listening endpoint binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Whether a sender is on the role-assignment allowlist.
    pub fn is_trusted(&self, sender: &NodeId) -> bool {
        self.trusted_senders.contains(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FabricConfig::default();
        assert_eq!(config.mode, Role::StandalonePeer);
        assert_eq!(config.transport, TransportKind::Rpc);
        assert_eq!(config.port, 50_051);
        assert!(config.peers.is_empty());
        assert!(config.trusted_senders.is_empty());
        assert!(!config.node_id.is_empty());
        assert_eq!(config.health.failure_threshold, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: FabricConfig = toml::from_str(
            r#"
            node_id = "n-1"
            mode = "worker"

            [[peers]]
            id = "coord"
            address = "10.0.0.5:50051"
        "#,
        )
        .unwrap();
        assert_eq!(config.node_id, "n-1");
        assert_eq!(config.mode, Role::Worker);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].id, NodeId::from("coord"));
        // untouched fields keep defaults
        assert_eq!(config.health.probe_timeout_ms, 1_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_listen_addr() {
        let config = FabricConfig {
            host: "0.0.0.0".to_string(),
            port: 7000,
            ..Default::default()
        };
        assert_eq!(config.listen_addr().unwrap().port(), 7000);

        let bad = FabricConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(bad.listen_addr().is_err());
    }

    #[test]
    fn test_is_trusted() {
        let config = FabricConfig {
            trusted_senders: vec!["ctl".into()],
            ..Default::default()
        };
        assert!(config.is_trusted(&"ctl".into()));
        assert!(!config.is_trusted(&"stranger".into()));
        assert!(!FabricConfig::default().is_trusted(&"ctl".into()));
    }
}
