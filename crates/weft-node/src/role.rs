//! Role state and role-assignment authorization.

use crate::error::FabricError;
use std::sync::RwLock;
use tracing::info;
use weft_types::{NodeId, Role};

/// Holds the node's current role and decides whether external role
/// assignments are honored.
///
/// Assignments are accepted only while the node is in `auto` mode and only
/// from senders on the configured allowlist; an empty allowlist rejects all
/// assignments. Rejections are surfaced to the caller so they can be logged;
/// a rejected assignment is never silently applied.
pub struct RoleController {
    current: RwLock<Role>,
    trusted: Vec<NodeId>,
}

impl RoleController {
    pub fn new(initial: Role, trusted: Vec<NodeId>) -> Self {
        Self {
            current: RwLock::new(initial),
            trusted,
        }
    }

    /// Consistent snapshot of the current role.
    pub fn role(&self) -> Role {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Swap the role, returning the previous one.
    pub fn transition(&self, to: Role) -> Role {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = *current;
        *current = to;
        if previous != to {
            info!(from = %previous, to = %to, "role transition");
        }
        previous
    }

    /// Check whether an external role assignment may be applied.
    pub fn authorize_assignment(
        &self,
        target: Role,
        issued_by: &NodeId,
        sender: &NodeId,
    ) -> Result<(), FabricError> {
        if target.is_transient() {
            return Err(FabricError::InvalidControl(
                "cannot assign the transient 'auto' role".to_string(),
            ));
        }
        let current = self.role();
        if !current.is_transient() {
            return Err(FabricError::InvalidControl(format!(
                "role assignments are only honored in auto mode (current role: {current})"
            )));
        }
        // The claimed issuer must be the actual sender, and on the allowlist.
        if issued_by != sender || !self.trusted.contains(sender) {
            return Err(FabricError::UntrustedSender(sender.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(initial: Role, trusted: &[&str]) -> RoleController {
        RoleController::new(initial, trusted.iter().map(|s| NodeId::from(*s)).collect())
    }

    #[test]
    fn test_transition_returns_previous() {
        let roles = controller(Role::Auto, &[]);
        assert_eq!(roles.transition(Role::Worker), Role::Auto);
        assert_eq!(roles.role(), Role::Worker);
        assert_eq!(roles.transition(Role::Worker), Role::Worker);
    }

    #[test]
    fn test_trusted_assignment_in_auto_is_authorized() {
        let roles = controller(Role::Auto, &["ctl"]);
        roles
            .authorize_assignment(Role::Coordinator, &"ctl".into(), &"ctl".into())
            .unwrap();
    }

    #[test]
    fn test_assignment_outside_auto_is_rejected() {
        let roles = controller(Role::Worker, &["ctl"]);
        let result = roles.authorize_assignment(Role::Coordinator, &"ctl".into(), &"ctl".into());
        assert!(matches!(result, Err(FabricError::InvalidControl(_))));
    }

    #[test]
    fn test_untrusted_or_spoofed_sender_is_rejected() {
        let roles = controller(Role::Auto, &["ctl"]);
        // Not on the allowlist.
        assert!(matches!(
            roles.authorize_assignment(Role::Worker, &"rogue".into(), &"rogue".into()),
            Err(FabricError::UntrustedSender(_))
        ));
        // Claims to be the trusted node but was sent by someone else.
        assert!(matches!(
            roles.authorize_assignment(Role::Worker, &"ctl".into(), &"rogue".into()),
            Err(FabricError::UntrustedSender(_))
        ));
    }

    #[test]
    fn test_empty_allowlist_rejects_everyone() {
        let roles = controller(Role::Auto, &[]);
        assert!(matches!(
            roles.authorize_assignment(Role::Worker, &"anyone".into(), &"anyone".into()),
            Err(FabricError::UntrustedSender(_))
        ));
    }

    #[test]
    fn test_auto_cannot_be_assigned() {
        let roles = controller(Role::Auto, &["ctl"]);
        assert!(matches!(
            roles.authorize_assignment(Role::Auto, &"ctl".into(), &"ctl".into()),
            Err(FabricError::InvalidControl(_))
        ));
    }
}
