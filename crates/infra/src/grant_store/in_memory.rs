use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use accord_auth::{
    ConditionRecord, DelegationRecord, DelegationStatus, GrantRef, GrantStore, OrgMembership,
    PermissionDefinition, PermissionKey, PermissionTemplate, RoleAssignment, RoleDefinition,
    RoleGraph, RoleKey, ScopeRecord, StoreError,
};
use accord_core::{ExpectedVersion, GrantId, OrgId, UserId};

use super::{GrantAdmin, GrantChange, WriteError};
use crate::feed::{Feed, Subscription};

#[derive(Debug, Default)]
struct State {
    graph: RoleGraph,
    assignments: Vec<RoleAssignment>,
    scopes: HashMap<GrantId, ScopeRecord>,
    delegations: HashMap<GrantId, DelegationRecord>,
    memberships: HashMap<(OrgId, UserId), OrgMembership>,
    conditions: Vec<ConditionRecord>,
}

/// Result of one [`InMemoryGrantStore::expire_stale`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub delegations_expired: usize,
    pub scopes_deactivated: usize,
}

/// In-memory grant store with an admin write API.
///
/// Intended for tests/dev and as the reference for persistent stores. Every
/// write publishes a [`GrantChange`] after the lock is released.
#[derive(Debug)]
pub struct InMemoryGrantStore {
    state: RwLock<State>,
    available: AtomicBool,
    changes: Feed<GrantChange>,
}

impl Default for InMemoryGrantStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
            changes: Feed::new(),
        }
    }
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: reads fail with `StoreError::Unavailable`,
    /// writes with `WriteError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn subscribe_changes(&self) -> Subscription<GrantChange> {
        self.changes.subscribe()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("grant store offline".to_string()));
        }
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, WriteError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(WriteError::Unavailable("grant store offline".to_string()));
        }
        self.state
            .write()
            .map_err(|_| WriteError::Unavailable("lock poisoned".to_string()))
    }

    // ── role catalog ────────────────────────────────────────────────────

    pub fn define_permission(&self, definition: PermissionDefinition) -> Result<(), WriteError> {
        self.write()?.graph.define_permission(definition);
        Ok(())
    }

    /// Deactivated permissions drop out of every role, so all cached role
    /// resolutions are stale.
    pub fn deactivate_permission(&self, key: &PermissionKey) -> Result<(), WriteError> {
        self.write()?.graph.deactivate_permission(key)?;
        self.changes.publish(GrantChange::All);
        Ok(())
    }

    pub fn define_template(&self, template: PermissionTemplate) -> Result<(), WriteError> {
        self.write()?.graph.define_template(template)?;
        Ok(())
    }

    pub fn define_role(&self, role: RoleDefinition) -> Result<(), WriteError> {
        let key = role.key.clone();
        self.write()?.graph.define_role(role)?;
        self.changes.publish(GrantChange::Role(key));
        Ok(())
    }

    pub fn define_role_from_templates(
        &self,
        role: RoleDefinition,
        templates: &[&str],
    ) -> Result<(), WriteError> {
        let key = role.key.clone();
        self.write()?.graph.define_role_from_templates(role, templates)?;
        self.changes.publish(GrantChange::Role(key));
        Ok(())
    }

    pub fn apply_template(&self, role: &RoleKey, template: &str) -> Result<usize, WriteError> {
        let added = self.write()?.graph.apply_template(role, template)?;
        self.changes.publish(GrantChange::Role(role.clone()));
        Ok(added)
    }

    pub fn deactivate_role(&self, role: &RoleKey) -> Result<(), WriteError> {
        self.write()?.graph.deactivate_role(role)?;
        self.changes.publish(GrantChange::Role(role.clone()));
        Ok(())
    }

    /// Snapshot of the role catalog.
    pub fn role_graph(&self) -> Result<RoleGraph, StoreError> {
        Ok(self.read()?.graph.clone())
    }

    // ── assignments ─────────────────────────────────────────────────────

    pub fn assign_role(
        &self,
        user_id: UserId,
        role: impl Into<RoleKey>,
        assigned_at: DateTime<Utc>,
    ) -> Result<(), WriteError> {
        let role = role.into();
        {
            let mut state = self.write()?;
            if state.graph.role(&role).is_none_or(|r| !r.active) {
                return Err(WriteError::Invalid(format!("unknown role '{role}'")));
            }
            if state
                .assignments
                .iter()
                .any(|a| a.user_id == user_id && a.role == role)
            {
                return Ok(());
            }
            state.assignments.push(RoleAssignment {
                user_id,
                role,
                assigned_at,
            });
        }
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    pub fn unassign_role(&self, user_id: UserId, role: &RoleKey) -> Result<(), WriteError> {
        {
            let mut state = self.write()?;
            let before = state.assignments.len();
            state
                .assignments
                .retain(|a| !(a.user_id == user_id && &a.role == role));
            if state.assignments.len() == before {
                return Err(WriteError::NotFound(format!("assignment of '{role}' to {user_id}")));
            }
        }
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    // ── scopes ──────────────────────────────────────────────────────────

    pub fn deactivate_scope(&self, id: GrantId) -> Result<(), WriteError> {
        let user_id = {
            let mut state = self.write()?;
            let scope = state
                .scopes
                .get_mut(&id)
                .ok_or_else(|| WriteError::NotFound(format!("scope {id}")))?;
            scope.active = false;
            scope.user_id
        };
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    pub fn scope(&self, id: GrantId) -> Result<Option<ScopeRecord>, StoreError> {
        Ok(self.read()?.scopes.get(&id).cloned())
    }

    // ── delegations ─────────────────────────────────────────────────────

    /// Revoke an active delegation, guarded by its version.
    pub fn revoke_delegation(
        &self,
        id: GrantId,
        expected: ExpectedVersion,
        revoked_by: UserId,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<DelegationRecord, WriteError> {
        let revoked = {
            let mut state = self.write()?;
            let delegation = state
                .delegations
                .get_mut(&id)
                .ok_or_else(|| WriteError::NotFound(format!("delegation {id}")))?;
            expected.check(delegation.version)?;
            delegation.revoke(revoked_by, reason, at)?;
            delegation.clone()
        };
        tracing::info!(delegation = %id, by = %revoked_by, "delegation revoked");
        self.changes.publish(GrantChange::User(revoked.delegatee));
        Ok(revoked)
    }

    pub fn delegation(&self, id: GrantId) -> Result<Option<DelegationRecord>, StoreError> {
        Ok(self.read()?.delegations.get(&id).cloned())
    }

    /// Maintenance pass: mark overdue delegations expired and deactivate
    /// overdue scopes. Decisions never depend on this having run.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpiryReport, WriteError> {
        let mut report = ExpiryReport::default();
        let mut touched = Vec::new();
        {
            let mut state = self.write()?;
            for delegation in state.delegations.values_mut() {
                if delegation.expire_if_due(now) {
                    report.delegations_expired += 1;
                    touched.push(delegation.delegatee);
                }
            }
            for scope in state.scopes.values_mut() {
                if scope.active && scope.expires_at.is_some_and(|exp| exp <= now) {
                    scope.active = false;
                    report.scopes_deactivated += 1;
                    touched.push(scope.user_id);
                }
            }
        }
        touched.sort();
        touched.dedup();
        for user_id in touched {
            self.changes.publish(GrantChange::User(user_id));
        }
        if report != ExpiryReport::default() {
            tracing::debug!(
                delegations = report.delegations_expired,
                scopes = report.scopes_deactivated,
                "expired stale grants"
            );
        }
        Ok(report)
    }

    // ── organizations ───────────────────────────────────────────────────

    pub fn add_membership(&self, membership: OrgMembership) -> Result<(), WriteError> {
        let user_id = membership.user_id;
        self.write()?
            .memberships
            .insert((membership.org_id, membership.user_id), membership);
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    pub fn set_membership_active(
        &self,
        org_id: OrgId,
        user_id: UserId,
        active: bool,
    ) -> Result<(), WriteError> {
        {
            let mut state = self.write()?;
            let membership = state
                .memberships
                .get_mut(&(org_id, user_id))
                .ok_or_else(|| WriteError::NotFound(format!("membership of {user_id} in {org_id}")))?;
            membership.active = active;
        }
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    /// Remove an organization's memberships and grants.
    pub fn remove_org(&self, org_id: OrgId) -> Result<(), WriteError> {
        {
            let mut state = self.write()?;
            state.memberships.retain(|(org, _), _| *org != org_id);
            state.scopes.retain(|_, s| s.org_id != Some(org_id));
        }
        self.changes.publish(GrantChange::Org(org_id));
        Ok(())
    }

    // ── conditions ──────────────────────────────────────────────────────

    pub fn attach_condition(&self, record: ConditionRecord) -> Result<(), WriteError> {
        let grant = record.grant.clone();
        self.write()?.conditions.push(record);
        self.changes.publish(GrantChange::Grant(grant));
        Ok(())
    }

    /// Deactivate every condition on a grant. Returns how many changed.
    pub fn clear_conditions(&self, grant: &GrantRef) -> Result<usize, WriteError> {
        let cleared = {
            let mut state = self.write()?;
            let mut n = 0;
            for record in state.conditions.iter_mut().filter(|c| &c.grant == grant && c.active) {
                record.active = false;
                n += 1;
            }
            n
        };
        self.changes.publish(GrantChange::Grant(grant.clone()));
        Ok(cleared)
    }
}

impl GrantAdmin for InMemoryGrantStore {
    /// Inserts a user or organization scope. Organization scopes require the
    /// membership to exist.
    fn insert_scope(&self, scope: ScopeRecord) -> Result<(), WriteError> {
        let user_id = scope.user_id;
        {
            let mut state = self.write()?;
            if let Some(org_id) = scope.org_id {
                if !state.memberships.contains_key(&(org_id, user_id)) {
                    return Err(WriteError::Invalid(format!(
                        "{user_id} is not a member of {org_id}"
                    )));
                }
            }
            if state.scopes.contains_key(&scope.id) {
                return Err(WriteError::Conflict(format!("scope {} already exists", scope.id)));
            }
            state.scopes.insert(scope.id, scope);
        }
        self.changes.publish(GrantChange::User(user_id));
        Ok(())
    }

    /// Conditions must be keyed by the delegation itself; the record and its
    /// conditions land in one write.
    fn insert_delegation(
        &self,
        delegation: DelegationRecord,
        conditions: Vec<ConditionRecord>,
    ) -> Result<(), WriteError> {
        if delegation.status != DelegationStatus::Active {
            return Err(WriteError::Invalid("only active delegations can be inserted".to_string()));
        }
        let grant = GrantRef::Delegation(delegation.id);
        if conditions.iter().any(|c| c.grant != grant) {
            return Err(WriteError::Invalid(format!(
                "conditions must be attached to {grant}"
            )));
        }
        let delegatee = delegation.delegatee;
        {
            let mut state = self.write()?;
            if state.delegations.contains_key(&delegation.id) {
                return Err(WriteError::Conflict(format!(
                    "delegation {} already exists",
                    delegation.id
                )));
            }
            state.delegations.insert(delegation.id, delegation);
            state.conditions.extend(conditions);
        }
        self.changes.publish(GrantChange::User(delegatee));
        Ok(())
    }
}

impl GrantStore for InMemoryGrantStore {
    fn load_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        Ok(self
            .read()?
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    fn load_role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, StoreError> {
        self.read()?
            .graph
            .role_permissions(role)
            .map_err(|_| StoreError::UnknownRole(role.clone()))
    }

    fn load_active_scopes(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        Ok(self
            .read()?
            .scopes
            .values()
            .filter(|s| {
                s.active && s.org_id.is_none() && s.user_id == user_id && &s.permission == permission
            })
            .cloned()
            .collect())
    }

    fn load_active_delegations(
        &self,
        delegatee: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<DelegationRecord>, StoreError> {
        Ok(self
            .read()?
            .delegations
            .values()
            .filter(|d| {
                d.status == DelegationStatus::Active
                    && d.delegatee == delegatee
                    && &d.permission == permission
            })
            .cloned()
            .collect())
    }

    fn load_org_membership(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        Ok(self.read()?.memberships.get(&(org_id, user_id)).cloned())
    }

    fn load_org_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        Ok(self
            .read()?
            .scopes
            .values()
            .filter(|s| {
                s.active
                    && s.org_id == Some(org_id)
                    && s.user_id == user_id
                    && &s.permission == permission
            })
            .cloned()
            .collect())
    }

    fn load_conditions(&self, grant: &GrantRef) -> Result<Vec<ConditionRecord>, StoreError> {
        Ok(self
            .read()?
            .conditions
            .iter()
            .filter(|c| &c.grant == grant)
            .cloned()
            .collect())
    }
}
