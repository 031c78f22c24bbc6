//! The message envelope — the unit of communication on the fabric.
//!
//! Envelopes are immutable once constructed. The `sequence_id` is unique per
//! message and is used for request/response correlation and deduplication;
//! a reply deliberately reuses the sequence ID of the message it answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque stable identifier for a fabric member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where an envelope is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// A single fabric member.
    Node(NodeId),
    /// Every reachable fabric member.
    Broadcast,
}

/// The addressed, timestamped, uniquely-sequenced unit of application data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating node.
    pub sender: NodeId,
    /// Destination node, or broadcast.
    pub recipient: Recipient,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Wall-clock instant of construction.
    pub timestamp: DateTime<Utc>,
    /// Globally unique message identifier.
    pub sequence_id: Uuid,
}

impl Envelope {
    /// Construct a new envelope with a fresh sequence ID and timestamp.
    pub fn new(sender: NodeId, recipient: Recipient, payload: Vec<u8>) -> Self {
        Self {
            sender,
            recipient,
            payload,
            timestamp: Utc::now(),
            sequence_id: Uuid::new_v4(),
        }
    }

    /// Construct a reply addressed back to this envelope's sender.
    ///
    /// The reply carries the same `sequence_id` so the requester can
    /// correlate it with the original message.
    pub fn reply(&self, sender: NodeId, payload: Vec<u8>) -> Self {
        Self {
            sender,
            recipient: Recipient::Node(self.sender.clone()),
            payload,
            timestamp: Utc::now(),
            sequence_id: self.sequence_id,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == Recipient::Broadcast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_eq() {
        let id = NodeId::new("node-a");
        assert_eq!(id.to_string(), "node-a");
        assert_eq!(id, NodeId::from("node-a"));
        assert_ne!(id, NodeId::from("node-b"));
    }

    #[test]
    fn test_envelope_unique_sequence_ids() {
        let a = Envelope::new("n1".into(), Recipient::Broadcast, vec![]);
        let b = Envelope::new("n1".into(), Recipient::Broadcast, vec![]);
        assert_ne!(a.sequence_id, b.sequence_id);
    }

    #[test]
    fn test_reply_correlates_and_swaps_direction() {
        let req = Envelope::new(
            "client".into(),
            Recipient::Node("server".into()),
            b"ask".to_vec(),
        );
        let resp = req.reply("server".into(), b"answer".to_vec());
        assert_eq!(resp.sequence_id, req.sequence_id);
        assert_eq!(resp.sender, NodeId::from("server"));
        assert_eq!(resp.recipient, Recipient::Node("client".into()));
    }

    #[test]
    fn test_envelope_json_roundtrip() {
        let env = Envelope::new(
            "n1".into(),
            Recipient::Node("n2".into()),
            b"hello".to_vec(),
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_recipient_serde_shape() {
        let json = serde_json::to_string(&Recipient::Broadcast).unwrap();
        assert!(json.contains("broadcast"));
        let json = serde_json::to_string(&Recipient::Node("x".into())).unwrap();
        assert!(json.contains("node"));
        assert!(json.contains("x"));
    }
}
