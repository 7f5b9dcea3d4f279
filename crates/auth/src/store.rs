//! Read-only collaborator interface onto the grant stores.

use std::sync::Arc;

use thiserror::Error;

use accord_core::{OrgId, UserId};

use crate::conditions::ConditionRecord;
use crate::grants::{DelegationRecord, GrantRef, OrgMembership, RoleAssignment, ScopeRecord};
use crate::permissions::PermissionKey;
use crate::roles::RoleKey;

/// Grant store read error.
///
/// - `UnknownRole` is non-fatal: the role contributes no permissions.
/// - `Unavailable` / `Corrupted` abort the decision with outcome `error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("grant store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown role '{0}'")]
    UnknownRole(RoleKey),

    #[error("corrupted grant record: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Whether a decision must abort. Unknown roles only drop their contribution.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::UnknownRole(_))
    }
}

/// Everything the engine reads while deciding.
///
/// Implementations may return records that are expired or inactive; the
/// collector re-checks validity by value against the request time.
pub trait GrantStore: Send + Sync {
    fn load_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Fails with `UnknownRole` for unknown or deactivated roles.
    fn load_role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, StoreError>;

    fn load_active_scopes(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError>;

    fn load_active_delegations(
        &self,
        delegatee: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<DelegationRecord>, StoreError>;

    fn load_org_membership(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<Option<OrgMembership>, StoreError>;

    fn load_org_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError>;

    fn load_conditions(&self, grant: &GrantRef) -> Result<Vec<ConditionRecord>, StoreError>;
}

impl<S> GrantStore for Arc<S>
where
    S: GrantStore + ?Sized,
{
    fn load_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        (**self).load_roles_for_user(user_id)
    }

    fn load_role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, StoreError> {
        (**self).load_role_permissions(role)
    }

    fn load_active_scopes(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        (**self).load_active_scopes(user_id, permission)
    }

    fn load_active_delegations(
        &self,
        delegatee: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<DelegationRecord>, StoreError> {
        (**self).load_active_delegations(delegatee, permission)
    }

    fn load_org_membership(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        (**self).load_org_membership(org_id, user_id)
    }

    fn load_org_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        (**self).load_org_permissions(org_id, user_id, permission)
    }

    fn load_conditions(&self, grant: &GrantRef) -> Result<Vec<ConditionRecord>, StoreError> {
        (**self).load_conditions(grant)
    }
}
