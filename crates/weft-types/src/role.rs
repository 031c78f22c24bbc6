//! Topological roles of a fabric node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node's position in the fabric topology.
///
/// `Auto` is not a steady state: it is a pending state awaiting a
/// role-assignment command from a trusted coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Independent peer: outbound connections only, no listener.
    StandalonePeer,
    /// Accepts inbound connections on a listening endpoint.
    Coordinator,
    /// Maintains an outbound connection to the configured coordinator.
    Worker,
    /// Transient: waiting for an external role assignment.
    Auto,
}

impl Role {
    /// Whether this role requires an open listening endpoint.
    pub fn listens(&self) -> bool {
        matches!(self, Role::Coordinator)
    }

    /// Whether this role is a pending state rather than a steady one.
    pub fn is_transient(&self) -> bool {
        matches!(self, Role::Auto)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::StandalonePeer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::StandalonePeer => "standalone_peer",
            Role::Coordinator => "coordinator",
            Role::Worker => "worker",
            Role::Auto => "auto",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_names() {
        assert_eq!(
            serde_json::to_string(&Role::StandalonePeer).unwrap(),
            "\"standalone_peer\""
        );
        let role: Role = serde_json::from_str("\"coordinator\"").unwrap();
        assert_eq!(role, Role::Coordinator);
    }

    #[test]
    fn test_role_properties() {
        assert!(Role::Coordinator.listens());
        assert!(!Role::Worker.listens());
        assert!(Role::Auto.is_transient());
        assert!(!Role::StandalonePeer.is_transient());
    }

    #[test]
    fn test_role_default() {
        assert_eq!(Role::default(), Role::StandalonePeer);
    }
}
