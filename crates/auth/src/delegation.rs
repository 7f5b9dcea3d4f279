//! Issuing delegations.
//!
//! A delegation is a snapshot of the delegator's right at issue time. Once
//! issued it is evaluated on its own; the delegator's later loss of the
//! permission does not revoke it. Conditions the delegator is held to travel
//! with the delegation, so the delegatee never gets a less restricted right.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use thiserror::Error;

use accord_core::{GrantId, OrgId, UserId};

use crate::collector;
use crate::conditions::ConditionRecord;
use crate::context::{RequestContext, ResourceRef};
use crate::grants::{Candidate, DelegationRecord, DelegationStatus, GrantRef, GrantSource};
use crate::permissions::PermissionKey;
use crate::store::{GrantStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegationError {
    #[error("a user cannot delegate to themselves")]
    SelfDelegation,

    #[error("delegation window is empty or already over")]
    EmptyWindow,

    #[error("delegator does not hold '{0}'")]
    NotHeld(PermissionKey),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input to [`issue_delegation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewDelegation {
    pub delegator: UserId,
    pub delegatee: UserId,
    pub permission: PermissionKey,
    pub resource: Option<ResourceRef>,
    /// Org context in which the delegator's own grants are looked up.
    pub org_id: Option<OrgId>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl NewDelegation {
    pub fn new(
        delegator: UserId,
        delegatee: UserId,
        permission: impl Into<PermissionKey>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            delegator,
            delegatee,
            permission: permission.into(),
            resource: None,
            org_id: None,
            valid_from,
            valid_until,
        }
    }

    pub fn for_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn in_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }
}

/// A delegation ready to be written, with the conditions inherited from the
/// delegator's grant (keyed by the delegation's own [`GrantRef`]).
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedDelegation {
    pub record: DelegationRecord,
    pub conditions: Vec<ConditionRecord>,
}

impl IssuedDelegation {
    pub fn into_parts(self) -> (DelegationRecord, Vec<ConditionRecord>) {
        (self.record, self.conditions)
    }
}

/// Build an active delegation record, or explain why it cannot be issued.
///
/// The delegator must hold the permission at `now` through a role, scope or
/// organization grant; delegated rights cannot be passed on.
///
/// Unconditional grants are preferred as the basis: if the delegator holds
/// any, the delegation carries no conditions and `valid_until` is clamped to
/// the latest expiry among them. Otherwise the delegation copies the
/// conditions of the longest-lived conditional grant and its expiry.
pub fn issue_delegation<S>(
    store: &S,
    request: NewDelegation,
    now: DateTime<Utc>,
) -> Result<IssuedDelegation, DelegationError>
where
    S: GrantStore + ?Sized,
{
    if request.delegator == request.delegatee {
        return Err(DelegationError::SelfDelegation);
    }
    if request.valid_until <= request.valid_from || request.valid_until <= now {
        return Err(DelegationError::EmptyWindow);
    }

    let mut ctx = RequestContext::at(now);
    ctx.org_id = request.org_id;

    let held: Vec<_> = collector::collect(
        store,
        request.delegator,
        &request.permission,
        request.resource.as_ref(),
        &ctx,
    )?
    .into_iter()
    .filter(|c| c.source != GrantSource::Delegation)
    .collect();

    if held.is_empty() {
        return Err(DelegationError::NotHeld(request.permission));
    }

    let unconditional: Vec<&Candidate> = held.iter().filter(|c| c.conditions.is_empty()).collect();
    let basis: Vec<&Candidate> = if unconditional.is_empty() {
        held.iter().max_by(|a, b| by_expiry(a, b)).into_iter().collect()
    } else {
        unconditional
    };

    // `None` when any basis grant never expires.
    let latest_expiry = basis
        .iter()
        .map(|c| c.valid_until)
        .try_fold(None::<DateTime<Utc>>, |acc, until| {
            until.map(|u| Some(acc.map_or(u, |a| a.max(u))))
        })
        .flatten();

    let valid_until = match latest_expiry {
        Some(limit) if limit < request.valid_until => {
            tracing::debug!(
                delegator = %request.delegator,
                permission = %request.permission,
                %limit,
                "clamping delegation to delegator's own expiry"
            );
            limit
        }
        _ => request.valid_until,
    };
    if valid_until <= request.valid_from {
        return Err(DelegationError::EmptyWindow);
    }

    let (resource_type, resource_id) = match request.resource {
        Some(r) => (Some(r.resource_type), Some(r.resource_id)),
        None => (None, None),
    };

    let id = GrantId::new();
    let conditions = basis
        .iter()
        .flat_map(|c| c.conditions.iter())
        .map(|condition| ConditionRecord::new(GrantRef::Delegation(id), condition.clone()))
        .collect();

    let record = DelegationRecord {
        id,
        delegator: request.delegator,
        delegatee: request.delegatee,
        permission: request.permission,
        resource_type,
        resource_id,
        valid_from: request.valid_from,
        valid_until,
        status: DelegationStatus::Active,
        revocation: None,
        granted_at: now,
        version: 0,
    };
    Ok(IssuedDelegation { record, conditions })
}

/// Permanent grants sort last; ties go to the smaller grant ref.
fn by_expiry(a: &Candidate, b: &Candidate) -> Ordering {
    let by_until = match (a.valid_until, b.valid_until) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    };
    by_until.then_with(|| b.grant.cmp(&a.grant))
}
