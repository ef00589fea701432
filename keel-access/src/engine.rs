//! The access control engine.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keel_core::{AccessError, Clock, KeelError, KeelResult};

use crate::assignment::RoleAssignment;
use crate::role::{builtin_roles, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuotaLimit {
    NoRoles,
    Unlimited,
    Limited(u64),
}

#[derive(Debug, Default)]
struct EngineInner {
    roles: HashMap<String, Role>,
    /// Every assignment ever made, per user, active or not.
    assignments: HashMap<String, Vec<RoleAssignment>>,
    /// (user, quota) → usage in the current period.
    usage: HashMap<(String, String), u64>,
}

impl EngineInner {
    fn active_roles<'a>(
        &'a self,
        user_id: &str,
        resource_type: &'a str,
        resource_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Role> + 'a {
        self.assignments
            .get(user_id)
            .into_iter()
            .flatten()
            .filter(move |a| a.applies_to(resource_type, resource_id))
            .filter_map(move |a| self.roles.get(&a.role_id))
    }

    fn active_role_ids(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for a in self.assignments.get(user_id).into_iter().flatten() {
            if a.is_active && !ids.contains(&a.role_id) {
                ids.push(a.role_id.clone());
            }
        }
        ids
    }

    /// Active roles granted without a resource scope.
    fn global_role_ids(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for a in self.assignments.get(user_id).into_iter().flatten() {
            if a.is_active && a.is_global() && !ids.contains(&a.role_id) {
                ids.push(a.role_id.clone());
            }
        }
        ids
    }

    /// Most generous limit across the user's unscoped active roles.
    fn quota_limit(&self, user_id: &str, quota: &str) -> QuotaLimit {
        let ids = self.global_role_ids(user_id);
        let mut limit = QuotaLimit::NoRoles;
        for role in ids.iter().filter_map(|id| self.roles.get(id)) {
            limit = match (role.quota_limits.get(quota), limit) {
                (None, _) => return QuotaLimit::Unlimited,
                (Some(l), QuotaLimit::Limited(best)) => QuotaLimit::Limited(best.max(*l)),
                (Some(l), _) => QuotaLimit::Limited(*l),
            };
        }
        limit
    }

    fn usage(&self, user_id: &str, quota: &str) -> u64 {
        self.usage
            .get(&(user_id.to_string(), quota.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Role registry plus user assignments.
///
/// Seeded with the `owner`, `developer` and `viewer` system roles.
#[derive(Debug)]
pub struct AccessControlEngine {
    inner: RwLock<EngineInner>,
    clock: Arc<dyn Clock>,
}

impl AccessControlEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let roles = builtin_roles()
            .into_iter()
            .map(|r| (r.role_id.clone(), r))
            .collect();
        Self {
            inner: RwLock::new(EngineInner {
                roles,
                ..EngineInner::default()
            }),
            clock,
        }
    }

    fn read(&self) -> KeelResult<RwLockReadGuard<'_, EngineInner>> {
        self.inner.read().map_err(|_| KeelError::poisoned("access"))
    }

    fn write(&self) -> KeelResult<RwLockWriteGuard<'_, EngineInner>> {
        self.inner.write().map_err(|_| KeelError::poisoned("access"))
    }

    /// Grant `role_id` to `user_id`, optionally scoped to a resource.
    ///
    /// Granting the same role with the same scope twice is a no-op and
    /// returns the existing assignment.
    ///
    /// # Errors
    ///
    /// `AccessError::UnknownRole` if the role isn't registered.
    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        resource_id: Option<&str>,
        resource_type: Option<&str>,
        granted_by: &str,
    ) -> KeelResult<RoleAssignment> {
        let now = self.clock.now();
        let mut inner = self.write()?;
        if !inner.roles.contains_key(role_id) {
            return Err(AccessError::UnknownRole {
                role_id: role_id.to_string(),
            }
            .into());
        }

        let assignments = inner.assignments.entry(user_id.to_string()).or_default();
        if let Some(existing) = assignments
            .iter()
            .find(|a| a.is_active && a.same_grant(role_id, resource_id, resource_type))
        {
            return Ok(existing.clone());
        }

        let assignment =
            RoleAssignment::new(user_id, role_id, resource_id, resource_type, granted_by, now);
        assignments.push(assignment.clone());
        tracing::info!(
            user_id,
            role_id,
            resource_id = ?resource_id,
            granted_by,
            "role assigned"
        );
        Ok(assignment)
    }

    /// Deactivate every active assignment of `role_id` to `user_id`.
    ///
    /// Returns whether anything was revoked.
    pub async fn revoke_role(&self, user_id: &str, role_id: &str) -> KeelResult<bool> {
        let now = self.clock.now();
        let mut inner = self.write()?;
        let mut revoked = 0usize;
        if let Some(assignments) = inner.assignments.get_mut(user_id) {
            for a in assignments
                .iter_mut()
                .filter(|a| a.is_active && a.role_id == role_id)
            {
                a.revoke(now);
                revoked += 1;
            }
        }
        if revoked > 0 {
            tracing::info!(user_id, role_id, revoked, "role revoked");
        }
        Ok(revoked > 0)
    }

    /// Whether `user_id` may perform `action_type` on `resource_type`.
    ///
    /// Denies unless some active assignment that covers the resource maps
    /// to a role granting the action. An `Err` must be treated as a denial.
    pub async fn check_permission(
        &self,
        user_id: &str,
        resource_type: &str,
        action_type: &str,
        resource_id: Option<&str>,
    ) -> KeelResult<bool> {
        let inner = self.read()?;
        let allowed = inner
            .active_roles(user_id, resource_type, resource_id)
            .any(|role| role.allows(resource_type, action_type));
        if !allowed {
            tracing::warn!(
                user_id,
                resource_type,
                action_type,
                resource_id = ?resource_id,
                "permission denied"
            );
        }
        Ok(allowed)
    }

    /// [`check_permission`](Self::check_permission) collapsed to a bool,
    /// denying on error.
    pub async fn is_allowed(
        &self,
        user_id: &str,
        resource_type: &str,
        action_type: &str,
        resource_id: Option<&str>,
    ) -> bool {
        match self
            .check_permission(user_id, resource_type, action_type, resource_id)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(error = %e, user_id, "permission check failed, denying");
                false
            }
        }
    }

    /// IDs of the roles `user_id` actively holds, in grant order.
    pub async fn get_user_roles(&self, user_id: &str) -> KeelResult<Vec<String>> {
        Ok(self.read()?.active_role_ids(user_id))
    }

    /// Every assignment ever made to `user_id`, revoked ones included.
    pub async fn get_user_assignments(&self, user_id: &str) -> KeelResult<Vec<RoleAssignment>> {
        Ok(self
            .read()?
            .assignments
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Union of permission tokens across the user's unscoped active roles.
    ///
    /// Resource-scoped grants only answer checks on their resource and are
    /// left out.
    pub async fn get_user_permissions(&self, user_id: &str) -> KeelResult<BTreeSet<String>> {
        let inner = self.read()?;
        Ok(inner
            .global_role_ids(user_id)
            .iter()
            .filter_map(|id| inner.roles.get(id))
            .flat_map(|r| r.permissions.iter().cloned())
            .collect())
    }

    pub async fn get_role(&self, role_id: &str) -> KeelResult<Option<Role>> {
        Ok(self.read()?.roles.get(role_id).cloned())
    }

    /// All roles, sorted by id.
    pub async fn list_roles(&self) -> KeelResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.read()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.role_id.cmp(&b.role_id));
        Ok(roles)
    }

    /// Register a custom role.
    ///
    /// # Errors
    ///
    /// `AccessError::RoleExists` if the id is taken.
    pub async fn create_role(&self, role: Role) -> KeelResult<()> {
        let mut inner = self.write()?;
        if inner.roles.contains_key(&role.role_id) {
            return Err(AccessError::RoleExists {
                role_id: role.role_id,
            }
            .into());
        }
        tracing::info!(role_id = %role.role_id, "role created");
        inner.roles.insert(role.role_id.clone(), role);
        Ok(())
    }

    /// Remove a custom role and deactivate every assignment of it.
    ///
    /// Returns `false` if no such role exists.
    ///
    /// # Errors
    ///
    /// `AccessError::SystemRoleImmutable` for the built-in roles.
    pub async fn delete_role(&self, role_id: &str) -> KeelResult<bool> {
        let now = self.clock.now();
        let mut inner = self.write()?;
        match inner.roles.get(role_id) {
            None => return Ok(false),
            Some(role) if role.is_system_role => {
                return Err(AccessError::SystemRoleImmutable {
                    role_id: role_id.to_string(),
                }
                .into());
            }
            Some(_) => {}
        }
        inner.roles.remove(role_id);
        for a in inner
            .assignments
            .values_mut()
            .flatten()
            .filter(|a| a.is_active && a.role_id == role_id)
        {
            a.revoke(now);
        }
        tracing::info!(role_id, "role deleted");
        Ok(true)
    }

    /// Whether `amount` more units of `quota` fit within the user's limit.
    ///
    /// The most generous limit across unscoped active roles applies; a role
    /// that sets no limit for `quota` makes it unlimited. Users holding no
    /// unscoped role are denied.
    pub async fn check_quota(&self, user_id: &str, quota: &str, amount: u64) -> KeelResult<bool> {
        let inner = self.read()?;
        Ok(match inner.quota_limit(user_id, quota) {
            QuotaLimit::NoRoles => false,
            QuotaLimit::Unlimited => true,
            QuotaLimit::Limited(limit) => {
                inner.usage(user_id, quota).saturating_add(amount) <= limit
            }
        })
    }

    /// Add `amount` to the user's usage of `quota`, returning the new total.
    ///
    /// # Errors
    ///
    /// `AccessError::QuotaExceeded` if the usage would pass the limit (or
    /// the user holds no role); usage is left unchanged.
    pub async fn record_usage(&self, user_id: &str, quota: &str, amount: u64) -> KeelResult<u64> {
        let mut inner = self.write()?;
        let current = inner.usage(user_id, quota);
        let next = current.saturating_add(amount);
        let limit = match inner.quota_limit(user_id, quota) {
            QuotaLimit::NoRoles => Some(0),
            QuotaLimit::Unlimited => None,
            QuotaLimit::Limited(limit) => Some(limit),
        };
        if let Some(limit) = limit {
            if next > limit {
                tracing::warn!(user_id, quota, limit, requested = next, "quota exceeded");
                return Err(AccessError::QuotaExceeded {
                    user_id: user_id.to_string(),
                    quota: quota.to_string(),
                    limit,
                }
                .into());
            }
        }
        inner
            .usage
            .insert((user_id.to_string(), quota.to_string()), next);
        Ok(next)
    }

    /// Reset usage counters at a period boundary, for one user or everyone.
    pub async fn reset_usage(&self, user_id: Option<&str>) -> KeelResult<()> {
        let mut inner = self.write()?;
        match user_id {
            Some(user) => inner.usage.retain(|(u, _), _| u != user),
            None => inner.usage.clear(),
        }
        Ok(())
    }
}
