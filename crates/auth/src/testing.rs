//! In-memory `GrantStore` used by unit tests.

use std::collections::HashMap;

use accord_core::{OrgId, UserId};

use crate::conditions::ConditionRecord;
use crate::grants::{DelegationRecord, GrantRef, OrgMembership, RoleAssignment, ScopeRecord};
use crate::permissions::PermissionKey;
use crate::roles::RoleKey;
use crate::store::{GrantStore, StoreError};

#[derive(Default)]
pub(crate) struct FakeStore {
    pub roles: Vec<RoleAssignment>,
    pub role_permissions: HashMap<RoleKey, Vec<PermissionKey>>,
    pub scopes: Vec<ScopeRecord>,
    pub delegations: Vec<DelegationRecord>,
    pub memberships: Vec<OrgMembership>,
    pub conditions: Vec<ConditionRecord>,
    pub unavailable: bool,
}

impl FakeStore {
    fn up(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl GrantStore for FakeStore {
    fn load_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        self.up()?;
        Ok(self.roles.iter().filter(|a| a.user_id == user_id).cloned().collect())
    }

    fn load_role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, StoreError> {
        self.up()?;
        self.role_permissions
            .get(role)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRole(role.clone()))
    }

    fn load_active_scopes(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        self.up()?;
        Ok(self
            .scopes
            .iter()
            .filter(|s| s.user_id == user_id && &s.permission == permission && s.org_id.is_none())
            .cloned()
            .collect())
    }

    fn load_active_delegations(
        &self,
        delegatee: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<DelegationRecord>, StoreError> {
        self.up()?;
        Ok(self
            .delegations
            .iter()
            .filter(|d| d.delegatee == delegatee && &d.permission == permission)
            .cloned()
            .collect())
    }

    fn load_org_membership(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        self.up()?;
        Ok(self
            .memberships
            .iter()
            .find(|m| m.org_id == org_id && m.user_id == user_id)
            .cloned())
    }

    fn load_org_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        self.up()?;
        Ok(self
            .scopes
            .iter()
            .filter(|s| s.user_id == user_id && &s.permission == permission && s.org_id == Some(org_id))
            .cloned()
            .collect())
    }

    fn load_conditions(&self, grant: &GrantRef) -> Result<Vec<ConditionRecord>, StoreError> {
        self.up()?;
        Ok(self.conditions.iter().filter(|c| &c.grant == grant).cloned().collect())
    }
}
