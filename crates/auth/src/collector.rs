//! Grant collection: every candidate that could justify a decision for one
//! (user, permission, resource) triple.
//!
//! Read-only. Conditions are attached but not evaluated here. Validity
//! windows are re-checked by value against the request time, whatever the
//! store's status flags say.

use accord_core::UserId;

use crate::context::{RequestContext, ResourceRef};
use crate::grants::Candidate;
use crate::permissions::PermissionKey;
use crate::store::{GrantStore, StoreError};

/// Collect candidates in source order: role, scope, delegation, organization.
pub fn collect<S>(
    store: &S,
    user_id: UserId,
    permission: &PermissionKey,
    resource: Option<&ResourceRef>,
    ctx: &RequestContext,
) -> Result<Vec<Candidate>, StoreError>
where
    S: GrantStore + ?Sized,
{
    let now = ctx.now;
    let mut candidates = Vec::new();

    // 1) Role-derived: one wildcard candidate per role granting the permission.
    for assignment in store.load_roles_for_user(user_id)? {
        match store.load_role_permissions(&assignment.role) {
            Ok(perms) if perms.contains(permission) => {
                candidates.push(Candidate::from_role(&assignment));
            }
            Ok(_) => {}
            Err(err) if !err.is_fatal() => {
                tracing::debug!(error = %err, user = %user_id, "skipping unknown role");
            }
            Err(err) => return Err(err),
        }
    }

    // 2) Scoped grants.
    for scope in store.load_active_scopes(user_id, permission)? {
        if scope.user_id == user_id
            && scope.org_id.is_none()
            && &scope.permission == permission
            && scope.is_valid_at(now)
            && scope.matches_resource(resource)
        {
            candidates.push(Candidate::from_scope(&scope));
        }
    }

    // 3) Delegations.
    for delegation in store.load_active_delegations(user_id, permission)? {
        if delegation.delegatee == user_id
            && &delegation.permission == permission
            && delegation.is_valid_at(now)
            && delegation.matches_resource(resource)
        {
            candidates.push(Candidate::from_delegation(&delegation));
        }
    }

    // 4) Organization overlay, only for active members of the request's org.
    if let Some(org_id) = ctx.org_id {
        let is_member = store
            .load_org_membership(org_id, user_id)?
            .is_some_and(|m| m.active && m.org_id == org_id && m.user_id == user_id);

        if is_member {
            for scope in store.load_org_permissions(org_id, user_id, permission)? {
                if scope.user_id == user_id
                    && scope.org_id == Some(org_id)
                    && &scope.permission == permission
                    && scope.is_valid_at(now)
                    && scope.matches_resource(resource)
                {
                    candidates.push(Candidate::from_scope(&scope));
                }
            }
        }
    }

    for candidate in &mut candidates {
        candidate.conditions = store
            .load_conditions(&candidate.grant)?
            .into_iter()
            .filter(|record| record.active && record.grant == candidate.grant)
            .map(|record| record.condition)
            .collect();
    }

    Ok(candidates)
}
