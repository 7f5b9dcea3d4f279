//! Grant records as read from the stores, and the `Candidate` shape the
//! collector builds from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use accord_core::{DomainError, DomainResult, GrantId, OrgId, RequestId, UserId};

use crate::conditions::Condition;
use crate::context::ResourceRef;
use crate::permissions::PermissionKey;
use crate::roles::RoleKey;

/// Which source of authority produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Role,
    Scope,
    Delegation,
    Organization,
}

impl GrantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantSource::Role => "role",
            GrantSource::Scope => "scope",
            GrantSource::Delegation => "delegation",
            GrantSource::Organization => "organization",
        }
    }
}

impl core::fmt::Display for GrantSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the record behind a grant; conditions are attached by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum GrantRef {
    Role(RoleKey),
    Scope(GrantId),
    Delegation(GrantId),
    Organization { org_id: OrgId, grant_id: GrantId },
}

impl core::fmt::Display for GrantRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GrantRef::Role(role) => write!(f, "role:{role}"),
            GrantRef::Scope(id) => write!(f, "scope:{id}"),
            GrantRef::Delegation(id) => write!(f, "delegation:{id}"),
            GrantRef::Organization { org_id, grant_id } => write!(f, "org:{org_id}/{grant_id}"),
        }
    }
}

/// Links a user to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role: RoleKey,
    pub assigned_at: DateTime<Utc>,
}

/// How a scope came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request_id", rename_all = "snake_case")]
pub enum ScopeOrigin {
    Manual,
    ApprovedRequest(RequestId),
}

/// A grant of one permission to one user, optionally narrowed to a resource.
///
/// The same shape is used for organization-scoped grants (`org_id` set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub id: GrantId,
    pub user_id: UserId,
    pub org_id: Option<OrgId>,
    pub permission: PermissionKey,
    pub resource_type: Option<String>,
    /// Absent means every resource of `resource_type`.
    pub resource_id: Option<String>,
    /// Free-form constraints, checked by the caller once a scope matches.
    pub constraints: Option<JsonValue>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<UserId>,
    pub origin: ScopeOrigin,
}

impl ScopeRecord {
    pub fn new(user_id: UserId, permission: impl Into<PermissionKey>, granted_at: DateTime<Utc>) -> Self {
        Self {
            id: GrantId::new(),
            user_id,
            org_id: None,
            permission: permission.into(),
            resource_type: None,
            resource_id: None,
            constraints: None,
            expires_at: None,
            active: true,
            granted_at,
            granted_by: None,
            origin: ScopeOrigin::Manual,
        }
    }

    pub fn in_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_resource(mut self, resource: &ResourceRef) -> Self {
        self.resource_type = Some(resource.resource_type.clone());
        self.resource_id = Some(resource.resource_id.clone());
        self
    }

    pub fn with_constraints(mut self, constraints: JsonValue) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn granted_by(mut self, user_id: UserId) -> Self {
        self.granted_by = Some(user_id);
        self
    }

    /// Expiry is checked by value: a past `expires_at` is invalid even while
    /// `active` is still set.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|exp| now < exp)
    }

    pub fn matches_resource(&self, resource: Option<&ResourceRef>) -> bool {
        resource_matches(self.resource_type.as_deref(), self.resource_id.as_deref(), resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Active,
    Revoked,
    Expired,
}

/// Who revoked a delegation, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_by: UserId,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// Time-boxed transfer of one permission from a delegator to a delegatee,
/// valid within `[valid_from, valid_until)`.
///
/// A snapshot: the delegator's continued possession is not re-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub id: GrantId,
    pub delegator: UserId,
    pub delegatee: UserId,
    pub permission: PermissionKey,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: DelegationStatus,
    pub revocation: Option<Revocation>,
    pub granted_at: DateTime<Utc>,
    /// Bumped on every status change (optimistic concurrency).
    pub version: u64,
}

impl DelegationRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == DelegationStatus::Active && self.valid_from <= now && now < self.valid_until
    }

    pub fn matches_resource(&self, resource: Option<&ResourceRef>) -> bool {
        resource_matches(self.resource_type.as_deref(), self.resource_id.as_deref(), resource)
    }

    pub fn revoke(&mut self, revoked_by: UserId, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DelegationStatus::Active {
            return Err(DomainError::invalid_transition(format!(
                "delegation {} is not active ({:?})",
                self.id, self.status
            )));
        }
        self.status = DelegationStatus::Revoked;
        self.revocation = Some(Revocation {
            revoked_by,
            reason: reason.into(),
            revoked_at: at,
        });
        self.version += 1;
        Ok(())
    }

    /// Flip an overdue active delegation to `Expired`. Returns whether it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == DelegationStatus::Active && self.valid_until <= now {
            self.status = DelegationStatus::Expired;
            self.version += 1;
            true
        } else {
            false
        }
    }
}

/// A user's membership in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

/// A grant under consideration for one decision, before condition evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub grant: GrantRef,
    pub source: GrantSource,
    /// `None` = wildcard.
    pub resource_type: Option<String>,
    /// `None` = wildcard.
    pub resource_id: Option<String>,
    pub constraints: Option<JsonValue>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub granted_at: DateTime<Utc>,
    pub conditions: Vec<Condition>,
}

impl Candidate {
    pub fn from_role(assignment: &RoleAssignment) -> Self {
        Self {
            grant: GrantRef::Role(assignment.role.clone()),
            source: GrantSource::Role,
            resource_type: None,
            resource_id: None,
            constraints: None,
            valid_from: None,
            valid_until: None,
            granted_at: assignment.assigned_at,
            conditions: Vec::new(),
        }
    }

    pub fn from_scope(scope: &ScopeRecord) -> Self {
        let (grant, source) = match scope.org_id {
            Some(org_id) => (
                GrantRef::Organization {
                    org_id,
                    grant_id: scope.id,
                },
                GrantSource::Organization,
            ),
            None => (GrantRef::Scope(scope.id), GrantSource::Scope),
        };
        Self {
            grant,
            source,
            resource_type: scope.resource_type.clone(),
            resource_id: scope.resource_id.clone(),
            constraints: scope.constraints.clone(),
            valid_from: None,
            valid_until: scope.expires_at,
            granted_at: scope.granted_at,
            conditions: Vec::new(),
        }
    }

    pub fn from_delegation(delegation: &DelegationRecord) -> Self {
        Self {
            grant: GrantRef::Delegation(delegation.id),
            source: GrantSource::Delegation,
            resource_type: delegation.resource_type.clone(),
            resource_id: delegation.resource_id.clone(),
            constraints: None,
            valid_from: Some(delegation.valid_from),
            valid_until: Some(delegation.valid_until),
            granted_at: delegation.granted_at,
            conditions: Vec::new(),
        }
    }

    pub fn is_resource_specific(&self) -> bool {
        self.resource_id.is_some()
    }
}

/// A record without `resource_type` applies to any resource (or none); with
/// one, it requires a resource of that type, and `resource_id` narrows it to
/// exactly that resource.
fn resource_matches(
    resource_type: Option<&str>,
    resource_id: Option<&str>,
    resource: Option<&ResourceRef>,
) -> bool {
    if let Some(expected) = resource_type {
        match resource {
            Some(r) if r.resource_type == expected => {}
            _ => return false,
        }
    }
    match resource_id {
        None => true,
        Some(id) => resource.is_some_and(|r| r.resource_id == id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn delegation(now: DateTime<Utc>) -> DelegationRecord {
        DelegationRecord {
            id: GrantId::new(),
            delegator: UserId::new(),
            delegatee: UserId::new(),
            permission: PermissionKey::new("orders:approve"),
            resource_type: None,
            resource_id: None,
            valid_from: now - Duration::hours(1),
            valid_until: now + Duration::hours(1),
            status: DelegationStatus::Active,
            revocation: None,
            granted_at: now - Duration::hours(1),
            version: 1,
        }
    }

    #[test]
    fn scope_past_expiry_is_invalid_even_if_active() {
        let t = now();
        let scope = ScopeRecord::new(UserId::new(), "qc:inspect", t - Duration::days(2))
            .expiring_at(t - Duration::seconds(1));
        assert!(scope.active);
        assert!(!scope.is_valid_at(t));
    }

    #[test]
    fn scope_expiring_exactly_now_is_invalid() {
        let t = now();
        let scope = ScopeRecord::new(UserId::new(), "qc:inspect", t).expiring_at(t);
        assert!(!scope.is_valid_at(t));
    }

    #[test]
    fn delegation_window_is_half_open() {
        let t = now();
        let d = delegation(t);
        assert!(d.is_valid_at(d.valid_from));
        assert!(!d.is_valid_at(d.valid_until));
        assert!(!d.is_valid_at(d.valid_from - Duration::seconds(1)));
    }

    #[test]
    fn revoke_records_actor_and_bumps_version() {
        let t = now();
        let mut d = delegation(t);
        let admin = UserId::new();
        d.revoke(admin, "left the team", t).unwrap();

        assert_eq!(d.status, DelegationStatus::Revoked);
        assert_eq!(d.version, 2);
        let rev = d.revocation.as_ref().unwrap();
        assert_eq!(rev.revoked_by, admin);
        assert_eq!(rev.reason, "left the team");
        assert!(!d.is_valid_at(t));

        assert!(d.revoke(admin, "again", t).is_err());
    }

    #[test]
    fn expire_if_due_only_touches_overdue_active_records() {
        let t = now();
        let mut d = delegation(t);
        assert!(!d.expire_if_due(t));
        assert!(d.expire_if_due(t + Duration::hours(2)));
        assert_eq!(d.status, DelegationStatus::Expired);
        assert!(!d.expire_if_due(t + Duration::hours(3)));
    }

    #[test]
    fn resource_matching_rules() {
        let order = ResourceRef::new("order", "o-1");
        let other = ResourceRef::new("order", "o-2");
        let invoice = ResourceRef::new("invoice", "i-1");
        let user = UserId::new();
        let t = now();

        let global = ScopeRecord::new(user, "orders:view", t);
        assert!(global.matches_resource(None));
        assert!(global.matches_resource(Some(&order)));

        let typed = ScopeRecord::new(user, "orders:view", t).with_resource_type("order");
        assert!(typed.matches_resource(Some(&order)));
        assert!(typed.matches_resource(Some(&other)));
        assert!(!typed.matches_resource(Some(&invoice)));
        assert!(!typed.matches_resource(None));

        let specific = ScopeRecord::new(user, "orders:view", t).with_resource(&order);
        assert!(specific.matches_resource(Some(&order)));
        assert!(!specific.matches_resource(Some(&other)));
    }

    #[test]
    fn org_scope_becomes_organization_candidate() {
        let org = OrgId::new();
        let scope = ScopeRecord::new(UserId::new(), "finance:view", now()).in_org(org);
        let candidate = Candidate::from_scope(&scope);
        assert_eq!(candidate.source, GrantSource::Organization);
        assert_eq!(
            candidate.grant,
            GrantRef::Organization {
                org_id: org,
                grant_id: scope.id
            }
        );
    }

    #[test]
    fn grant_ref_display_is_stable() {
        assert_eq!(GrantRef::Role(RoleKey::new("editor")).to_string(), "role:editor");
    }
}
