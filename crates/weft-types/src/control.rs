//! Control-message payloads carried inside an [`Envelope`].
//!
//! Control commands steer the fabric itself: role assignment, health probes
//! and runtime configuration updates. They are JSON-encoded in the envelope
//! payload; any payload that does not parse as a control command is plain
//! application data.

use crate::envelope::NodeId;
use crate::role::Role;
use serde::{Deserialize, Serialize};

/// A control command addressed to the fabric layer of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Assign a role to a node currently in `Auto` mode.
    AssignRole {
        /// The role the node should adopt.
        target_role: Role,
        /// The node claiming authority over the assignment.
        issued_by: NodeId,
    },
    /// Update a runtime-tunable setting (health thresholds, probe cadence).
    UpdateConfig { key: String, value: String },
    /// Lightweight reachability probe.
    Ping,
    /// Answer to a [`ControlCommand::Ping`].
    Pong,
}

impl ControlCommand {
    /// Encode this command as an envelope payload.
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("control commands serialize to JSON")
    }

    /// Try to parse an envelope payload as a control command.
    ///
    /// Returns `None` for anything that is not a control command; such
    /// payloads belong to the application or to a plugin.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_role_roundtrip() {
        let cmd = ControlCommand::AssignRole {
            target_role: Role::Coordinator,
            issued_by: "ctl-1".into(),
        };
        let payload = cmd.to_payload();
        assert_eq!(ControlCommand::from_payload(&payload), Some(cmd));
    }

    #[test]
    fn test_ping_pong_roundtrip() {
        assert_eq!(
            ControlCommand::from_payload(&ControlCommand::Ping.to_payload()),
            Some(ControlCommand::Ping)
        );
        assert_eq!(
            ControlCommand::from_payload(&ControlCommand::Pong.to_payload()),
            Some(ControlCommand::Pong)
        );
    }

    #[test]
    fn test_non_control_payload_is_none() {
        assert_eq!(ControlCommand::from_payload(b"hello world"), None);
        assert_eq!(ControlCommand::from_payload(b"{\"type\":\"metrics\"}"), None);
        assert_eq!(ControlCommand::from_payload(&[]), None);
    }

    #[test]
    fn test_wire_shape_is_tagged() {
        let cmd = ControlCommand::UpdateConfig {
            key: "probe_interval_ms".to_string(),
            value: "250".to_string(),
        };
        let json = String::from_utf8(cmd.to_payload()).unwrap();
        assert!(json.contains("\"command\":\"update_config\""));
    }
}
