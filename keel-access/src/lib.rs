//! Keel Access - Role-Based Access Control
//!
//! A registry of roles (permission tokens, per-resource action sets and
//! quota limits) plus the user ↔ role assignments that resolve to
//! permission checks.
//!
//! Unlike every other Keel store, access control fails *closed*: a user
//! with no matching active grant is denied, and callers must treat an
//! `Err` from [`AccessControlEngine::check_permission`] as a denial
//! ([`AccessControlEngine::is_allowed`] does this for them).

pub mod assignment;
pub mod engine;
pub mod role;

pub use assignment::RoleAssignment;
pub use engine::AccessControlEngine;
pub use role::{actions, builtin_roles, resources, Role, RoleType, DEVELOPER, OWNER, VIEWER};
