//! Role definitions and the built-in role set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use keel_core::WILDCARD;
use serde::{Deserialize, Serialize};

pub const OWNER: &str = "owner";
pub const DEVELOPER: &str = "developer";
pub const VIEWER: &str = "viewer";

/// Resource types the built-in roles know about.
pub mod resources {
    pub const PROJECT: &str = "project";
    pub const FILE: &str = "file";
    pub const SESSION: &str = "session";
    pub const COMPLETION: &str = "completion";
    pub const WORKFLOW: &str = "workflow";
    pub const TEAM: &str = "team";
    pub const BILLING: &str = "billing";
}

/// Action types the built-in roles know about.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const ADMIN: &str = "admin";
}

/// Built-in vs. operator-defined role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Owner,
    Developer,
    Viewer,
    Custom,
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleType::Owner => "owner",
            RoleType::Developer => "developer",
            RoleType::Viewer => "viewer",
            RoleType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: String,
    pub role_name: String,
    pub role_type: RoleType,
    /// Capability tokens such as `"project:read"`; `"*"` grants everything.
    pub permissions: BTreeSet<String>,
    /// Resource type → allowed actions. Either side may be `"*"`.
    pub resource_access: BTreeMap<String, BTreeSet<String>>,
    /// Quota name → limit per period. A missing quota is unlimited.
    pub quota_limits: BTreeMap<String, u64>,
    pub is_system_role: bool,
}

impl Role {
    /// Start an operator-defined role with no grants.
    pub fn custom(role_id: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            role_name: role_name.into(),
            role_type: RoleType::Custom,
            permissions: BTreeSet::new(),
            resource_access: BTreeMap::new(),
            quota_limits: BTreeMap::new(),
            is_system_role: false,
        }
    }

    /// Grant `actions` on `resource_type`, also recording the
    /// matching `"{resource}:{action}"` permission tokens.
    pub fn grant<I, S>(mut self, resource_type: &str, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.resource_access.entry(resource_type.to_string()).or_default();
        for action in actions {
            let action = action.into();
            self.permissions.insert(format!("{}:{}", resource_type, action));
            entry.insert(action);
        }
        self
    }

    pub fn with_quota(mut self, name: impl Into<String>, limit: u64) -> Self {
        self.quota_limits.insert(name.into(), limit);
        self
    }

    pub fn has_wildcard(&self) -> bool {
        self.permissions.contains(WILDCARD)
    }

    /// Whether this role alone allows `action_type` on `resource_type`.
    pub fn allows(&self, resource_type: &str, action_type: &str) -> bool {
        if self.has_wildcard() {
            return true;
        }
        [resource_type, WILDCARD].iter().any(|rt| {
            self.resource_access
                .get(*rt)
                .map(|acts| acts.contains(action_type) || acts.contains(WILDCARD))
                .unwrap_or(false)
        })
    }
}

/// The three roles seeded into every engine.
pub fn builtin_roles() -> Vec<Role> {
    use actions::*;
    use resources::*;

    let owner = Role {
        role_id: OWNER.to_string(),
        role_name: "Owner".to_string(),
        role_type: RoleType::Owner,
        permissions: [WILDCARD.to_string()].into_iter().collect(),
        resource_access: [(
            WILDCARD.to_string(),
            [WILDCARD.to_string()].into_iter().collect(),
        )]
        .into_iter()
        .collect(),
        quota_limits: BTreeMap::new(),
        is_system_role: true,
    };

    let mut developer = Role::custom(DEVELOPER, "Developer")
        .grant(PROJECT, [CREATE, READ, UPDATE])
        .grant(FILE, [CREATE, READ, UPDATE])
        .grant(SESSION, [CREATE, READ, UPDATE])
        .grant(COMPLETION, [CREATE, READ, UPDATE])
        .grant(WORKFLOW, [CREATE, READ, UPDATE])
        .grant(TEAM, [READ])
        .with_quota("completions_per_day", 1000)
        .with_quota("api_calls_per_day", 10_000);
    developer.role_type = RoleType::Developer;
    developer.is_system_role = true;

    let mut viewer = Role::custom(VIEWER, "Viewer")
        .grant(PROJECT, [READ])
        .grant(FILE, [READ])
        .grant(SESSION, [READ])
        .grant(COMPLETION, [READ])
        .grant(WORKFLOW, [READ])
        .grant(TEAM, [READ])
        .with_quota("completions_per_day", 100)
        .with_quota("api_calls_per_day", 1000);
    viewer.role_type = RoleType::Viewer;
    viewer.is_system_role = true;

    vec![owner, developer, viewer]
}
