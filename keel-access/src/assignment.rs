//! User ↔ role grants.

use keel_core::{new_entity_id, EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// One grant of a role to a user, optionally scoped to a resource.
///
/// Revocation flips `is_active` and stamps `revoked_at`; assignments are
/// never removed so the grant history stays auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub assignment_id: EntityId,
    pub user_id: String,
    pub role_id: String,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub granted_by: String,
    pub granted_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
    pub is_active: bool,
}

impl RoleAssignment {
    pub fn new(
        user_id: &str,
        role_id: &str,
        resource_id: Option<&str>,
        resource_type: Option<&str>,
        granted_by: &str,
        now: Timestamp,
    ) -> Self {
        Self {
            assignment_id: new_entity_id(),
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
            resource_id: resource_id.map(str::to_string),
            resource_type: resource_type.map(str::to_string),
            granted_by: granted_by.to_string(),
            granted_at: now,
            revoked_at: None,
            is_active: true,
        }
    }

    /// Same user, role and scope.
    pub fn same_grant(
        &self,
        role_id: &str,
        resource_id: Option<&str>,
        resource_type: Option<&str>,
    ) -> bool {
        self.role_id == role_id
            && self.resource_id.as_deref() == resource_id
            && self.resource_type.as_deref() == resource_type
    }

    /// Granted without any resource scope.
    pub fn is_global(&self) -> bool {
        self.resource_id.is_none() && self.resource_type.is_none()
    }

    /// Whether this grant covers a check on `resource_type` / `resource_id`.
    ///
    /// Unscoped grants cover everything. A grant scoped to a resource type
    /// only covers that type, and one scoped to a resource id only covers
    /// checks naming that id.
    pub fn applies_to(&self, resource_type: &str, resource_id: Option<&str>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(scoped_type) = &self.resource_type {
            if scoped_type != resource_type {
                return false;
            }
        }
        match (&self.resource_id, resource_id) {
            (None, _) => true,
            (Some(scoped), Some(requested)) => scoped == requested,
            (Some(_), None) => false,
        }
    }

    pub fn revoke(&mut self, now: Timestamp) {
        self.is_active = false;
        self.revoked_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_unscoped_assignment_applies_everywhere() {
        let a = RoleAssignment::new("alice", "viewer", None, None, "admin", Utc::now());
        assert!(a.applies_to("project", None));
        assert!(a.applies_to("file", Some("f1")));
    }

    #[test]
    fn test_resource_scoped_assignment() {
        let a = RoleAssignment::new(
            "alice",
            "developer",
            Some("p1"),
            Some("project"),
            "admin",
            Utc::now(),
        );
        assert!(a.applies_to("project", Some("p1")));
        assert!(!a.applies_to("project", Some("p2")));
        assert!(!a.applies_to("project", None));
        assert!(!a.applies_to("file", Some("p1")));
    }

    #[test]
    fn test_global_only_without_scope() {
        let now = Utc::now();
        assert!(RoleAssignment::new("a", "viewer", None, None, "admin", now).is_global());
        assert!(!RoleAssignment::new("a", "owner", Some("p1"), None, "admin", now).is_global());
        assert!(!RoleAssignment::new("a", "owner", None, Some("project"), "admin", now).is_global());
    }

    #[test]
    fn test_revoked_assignment_never_applies() {
        let mut a = RoleAssignment::new("alice", "viewer", None, None, "admin", Utc::now());
        a.revoke(Utc::now());
        assert!(!a.is_active);
        assert!(a.revoked_at.is_some());
        assert!(!a.applies_to("project", None));
    }
}
