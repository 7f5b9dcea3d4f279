//! Permission requests and their approval.
//!
//! An approved request turns into an ordinary `ScopeRecord`; the engine never
//! reads the request itself.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use accord_core::{DomainError, DomainResult, GrantId, OrgId, RequestId, UserId};

use crate::context::ResourceRef;
use crate::grants::{ScopeOrigin, ScopeRecord};
use crate::permissions::PermissionKey;
use crate::roles::RoleKey;

/// Longest duration a request may ask for (one year).
pub const MAX_REQUEST_DURATION_HOURS: u32 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Cancelled,
}

/// Who resolved a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "by", rename_all = "snake_case")]
pub enum Approver {
    User(UserId),
    AutoRule(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub approver: Approver,
    pub note: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: RequestId,
    pub requester: UserId,
    pub permission: PermissionKey,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub org_id: Option<OrgId>,
    /// `None` asks for a permanent grant.
    pub duration_hours: Option<u32>,
    pub justification: String,
    pub status: RequestStatus,
    pub resolution: Option<Resolution>,
    pub requested_at: DateTime<Utc>,
    /// Scope created on approval.
    pub granted_scope: Option<GrantId>,
}

impl PermissionRequest {
    pub fn new(
        requester: UserId,
        permission: impl Into<PermissionKey>,
        duration_hours: Option<u32>,
        justification: impl Into<String>,
        requested_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        match duration_hours {
            Some(0) => return Err(DomainError::validation("duration must be positive")),
            Some(h) if h > MAX_REQUEST_DURATION_HOURS => {
                return Err(DomainError::validation(format!(
                    "duration may not exceed {MAX_REQUEST_DURATION_HOURS} hours"
                )));
            }
            _ => {}
        }

        let justification = justification.into();
        if justification.trim().is_empty() {
            return Err(DomainError::validation("justification is required"));
        }

        Ok(Self {
            id: RequestId::new(),
            requester,
            permission: permission.into(),
            resource_type: None,
            resource_id: None,
            org_id: None,
            duration_hours,
            justification,
            status: RequestStatus::Pending,
            resolution: None,
            requested_at,
            granted_scope: None,
        })
    }

    pub fn for_resource(mut self, resource: &ResourceRef) -> Self {
        self.resource_type = Some(resource.resource_type.clone());
        self.resource_id = Some(resource.resource_id.clone());
        self
    }

    pub fn for_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = None;
        self
    }

    pub fn in_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Human approval. Returns the scope to persist.
    pub fn approve(
        &mut self,
        approver: UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<ScopeRecord> {
        self.ensure_pending("approved")?;
        if approver == self.requester {
            return Err(DomainError::not_permitted("requester cannot approve their own request"));
        }

        let scope = self.materialize(at).granted_by(approver);
        self.resolve(RequestStatus::Approved, Approver::User(approver), note, at);
        self.granted_scope = Some(scope.id);
        Ok(scope)
    }

    /// Approval by a matching rule. The caller is responsible for the match.
    pub fn auto_approve(&mut self, rule: &AutoApprovalRule, at: DateTime<Utc>) -> DomainResult<ScopeRecord> {
        self.ensure_pending("approved")?;

        let scope = self.materialize(at);
        self.resolve(
            RequestStatus::Approved,
            Approver::AutoRule(rule.name.clone()),
            None,
            at,
        );
        self.granted_scope = Some(scope.id);
        Ok(scope)
    }

    pub fn deny(&mut self, approver: UserId, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("denied")?;
        if approver == self.requester {
            return Err(DomainError::not_permitted("requester cannot deny their own request"));
        }
        self.resolve(RequestStatus::Denied, Approver::User(approver), Some(reason.into()), at);
        Ok(())
    }

    /// Only the requester may cancel.
    pub fn cancel(&mut self, by: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("cancelled")?;
        if by != self.requester {
            return Err(DomainError::not_permitted("only the requester can cancel a request"));
        }
        self.resolve(RequestStatus::Cancelled, Approver::User(by), None, at);
        Ok(())
    }

    fn ensure_pending(&self, verb: &str) -> DomainResult<()> {
        if self.status != RequestStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "only pending requests can be {verb} (request is {:?})",
                self.status
            )));
        }
        Ok(())
    }

    fn resolve(&mut self, status: RequestStatus, approver: Approver, note: Option<String>, at: DateTime<Utc>) {
        self.status = status;
        self.resolution = Some(Resolution {
            approver,
            note,
            resolved_at: at,
        });
    }

    fn materialize(&self, at: DateTime<Utc>) -> ScopeRecord {
        let mut scope = ScopeRecord::new(self.requester, self.permission.clone(), at);
        scope.org_id = self.org_id;
        scope.resource_type = self.resource_type.clone();
        scope.resource_id = self.resource_id.clone();
        scope.expires_at = self
            .duration_hours
            .map(|h| at + Duration::hours(i64::from(h)));
        scope.origin = ScopeOrigin::ApprovedRequest(self.id);
        scope
    }
}

/// Rule under which requests are approved without a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApprovalRule {
    pub name: String,
    /// Exact permission key, or `category:*`.
    pub permission: String,
    /// Empty matches any (or no) resource type.
    #[serde(default)]
    pub resource_types: Vec<String>,
    pub max_duration_hours: Option<u32>,
    #[serde(default)]
    pub allow_permanent: bool,
    /// Empty matches any requester.
    #[serde(default)]
    pub requester_roles: Vec<RoleKey>,
    pub active: bool,
}

impl AutoApprovalRule {
    pub fn new(name: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permission: permission.into(),
            resource_types: Vec::new(),
            max_duration_hours: None,
            allow_permanent: false,
            requester_roles: Vec::new(),
            active: true,
        }
    }

    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_duration_hours(mut self, hours: u32) -> Self {
        self.max_duration_hours = Some(hours);
        self
    }

    pub fn allowing_permanent(mut self) -> Self {
        self.allow_permanent = true;
        self
    }

    pub fn for_roles<I>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = RoleKey>,
    {
        self.requester_roles = roles.into_iter().collect();
        self
    }

    pub fn matches(&self, request: &PermissionRequest, requester_roles: &[RoleKey]) -> bool {
        if !self.active || !request.is_pending() {
            return false;
        }

        let permission_ok = match self.permission.strip_suffix(":*") {
            Some(category) => request.permission.category() == category,
            None => request.permission.as_str() == self.permission,
        };
        if !permission_ok {
            return false;
        }

        if !self.resource_types.is_empty() {
            match &request.resource_type {
                Some(t) if self.resource_types.contains(t) => {}
                _ => return false,
            }
        }

        let duration_ok = match (request.duration_hours, self.max_duration_hours) {
            (None, _) => self.allow_permanent,
            (Some(_), None) => true,
            (Some(requested), Some(max)) => requested <= max,
        };
        if !duration_ok {
            return false;
        }

        self.requester_roles.is_empty()
            || self
                .requester_roles
                .iter()
                .any(|role| requester_roles.contains(role))
    }
}

/// First active rule that matches, in the given order.
pub fn find_auto_approval<'a>(
    rules: &'a [AutoApprovalRule],
    request: &PermissionRequest,
    requester_roles: &[RoleKey],
) -> Option<&'a AutoApprovalRule> {
    rules.iter().find(|rule| rule.matches(request, requester_roles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    fn request(hours: Option<u32>) -> PermissionRequest {
        PermissionRequest::new(UserId::new(), "reports:export", hours, "quarter close", t0()).unwrap()
    }

    #[test]
    fn new_validates_duration_and_justification() {
        let user = UserId::new();
        assert!(matches!(
            PermissionRequest::new(user, "reports:export", Some(0), "x", t0()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            PermissionRequest::new(user, "reports:export", Some(MAX_REQUEST_DURATION_HOURS + 1), "x", t0()),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            PermissionRequest::new(user, "reports:export", Some(8), "   ", t0()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn approval_materializes_time_boxed_scope() {
        let mut req = request(Some(48)).for_resource(&ResourceRef::new("report", "q1"));
        let approver = UserId::new();
        let at = t0() + Duration::hours(1);

        let scope = req.approve(approver, Some("ok".into()), at).unwrap();

        assert_eq!(req.status, RequestStatus::Approved);
        assert_eq!(req.granted_scope, Some(scope.id));
        assert_eq!(scope.user_id, req.requester);
        assert_eq!(scope.expires_at, Some(at + Duration::hours(48)));
        assert_eq!(scope.resource_id.as_deref(), Some("q1"));
        assert_eq!(scope.granted_by, Some(approver));
        assert_eq!(scope.origin, ScopeOrigin::ApprovedRequest(req.id));
        assert!(scope.active);
    }

    #[test]
    fn permanent_request_yields_scope_without_expiry() {
        let mut req = request(None);
        let scope = req.approve(UserId::new(), None, t0()).unwrap();
        assert_eq!(scope.expires_at, None);
    }

    #[test]
    fn requester_cannot_approve_own_request() {
        let mut req = request(Some(8));
        let requester = req.requester;
        assert!(matches!(
            req.approve(requester, None, t0()),
            Err(DomainError::NotPermitted(_))
        ));
        assert!(req.is_pending());
    }

    #[test]
    fn transitions_only_from_pending() {
        let mut req = request(Some(8));
        req.deny(UserId::new(), "not needed", t0()).unwrap();

        assert!(matches!(
            req.approve(UserId::new(), None, t0()),
            Err(DomainError::InvalidTransition(_))
        ));
        let requester = req.requester;
        assert!(req.cancel(requester, t0()).is_err());
        assert_eq!(req.status, RequestStatus::Denied);
    }

    #[test]
    fn only_requester_cancels() {
        let mut req = request(Some(8));
        assert!(matches!(
            req.cancel(UserId::new(), t0()),
            Err(DomainError::NotPermitted(_))
        ));
        let requester = req.requester;
        req.cancel(requester, t0()).unwrap();
        assert_eq!(req.status, RequestStatus::Cancelled);
    }

    #[test]
    fn rule_matches_category_wildcard_and_duration() {
        let rule = AutoApprovalRule::new("short reports", "reports:*").with_max_duration_hours(24);

        assert!(rule.matches(&request(Some(8)), &[]));
        assert!(!rule.matches(&request(Some(72)), &[]));
        assert!(!rule.matches(&request(None), &[]));

        let other = PermissionRequest::new(UserId::new(), "payroll:run", Some(1), "x", t0()).unwrap();
        assert!(!rule.matches(&other, &[]));
    }

    #[test]
    fn rule_requires_roles_and_resource_types_when_listed() {
        let rule = AutoApprovalRule::new("analysts", "reports:export")
            .with_resource_types(["report"])
            .for_roles([RoleKey::new("analyst")])
            .allowing_permanent();
        let req = request(None).for_resource_type("report");

        assert!(rule.matches(&req, &[RoleKey::new("analyst")]));
        assert!(!rule.matches(&req, &[RoleKey::new("viewer")]));
        assert!(!rule.matches(&request(None), &[RoleKey::new("analyst")]));
    }

    #[test]
    fn auto_approval_records_rule_name() {
        let rules = vec![
            AutoApprovalRule {
                active: false,
                ..AutoApprovalRule::new("disabled", "reports:*")
            },
            AutoApprovalRule::new("reports", "reports:export"),
        ];
        let mut req = request(Some(4));

        let rule = find_auto_approval(&rules, &req, &[]).unwrap();
        let scope = req.auto_approve(rule, t0()).unwrap();

        assert_eq!(rule.name, "reports");
        assert_eq!(
            req.resolution.as_ref().map(|r| &r.approver),
            Some(&Approver::AutoRule("reports".into()))
        );
        assert_eq!(scope.granted_by, None);
    }
}
