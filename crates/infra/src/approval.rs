//! Approval desk: stores permission requests and writes approved scopes.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use accord_auth::{
    find_auto_approval, AutoApprovalRule, GrantStore, PermissionRequest, RoleKey, ScopeRecord,
    StoreError,
};
use accord_core::{DomainError, RequestId, UserId};

use crate::grant_store::{GrantAdmin, WriteError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("permission request {0} not found")]
    NotFound(RequestId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("approval desk unavailable: {0}")]
    Unavailable(String),
}

/// Front door for permission requests.
///
/// A request's status only changes once its scope (if any) is stored, so a
/// failed write leaves the request pending.
pub struct ApprovalDesk<S> {
    store: S,
    requests: RwLock<HashMap<RequestId, PermissionRequest>>,
    rules: RwLock<Vec<AutoApprovalRule>>,
}

impl<S> ApprovalDesk<S>
where
    S: GrantAdmin + GrantStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            requests: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rules are tried in insertion order.
    pub fn add_rule(&self, rule: AutoApprovalRule) -> Result<(), ApprovalError> {
        self.rules
            .write()
            .map_err(|_| ApprovalError::Unavailable("lock poisoned".to_string()))?
            .push(rule);
        Ok(())
    }

    /// Store a new request, approving it on the spot if a rule matches.
    ///
    /// If the approved scope cannot be written the request is still stored,
    /// pending, and the write error is returned.
    pub fn submit(&self, mut request: PermissionRequest, now: DateTime<Utc>) -> Result<PermissionRequest, ApprovalError> {
        if !request.is_pending() {
            return Err(DomainError::invalid_transition("only pending requests can be submitted").into());
        }

        let roles: Vec<RoleKey> = self
            .store
            .load_roles_for_user(request.requester)?
            .into_iter()
            .map(|a| a.role)
            .collect();

        let rule = {
            let rules = self
                .rules
                .read()
                .map_err(|_| ApprovalError::Unavailable("lock poisoned".to_string()))?;
            find_auto_approval(&rules, &request, &roles).cloned()
        };

        if let Some(rule) = rule {
            let mut approved = request.clone();
            let scope = approved.auto_approve(&rule, now)?;
            match self.store.insert_scope(scope) {
                Ok(()) => {
                    tracing::info!(request = %request.id, rule = %rule.name, "permission request auto-approved");
                    request = approved;
                }
                Err(err) => {
                    tracing::warn!(request = %request.id, rule = %rule.name, error = %err, "auto-approval write failed; request left pending");
                    self.requests_mut()?.insert(request.id, request);
                    return Err(err.into());
                }
            }
        }

        self.requests_mut()?.insert(request.id, request.clone());
        Ok(request)
    }

    pub fn approve(
        &self,
        id: RequestId,
        approver: UserId,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ScopeRecord, ApprovalError> {
        self.transition(id, |request| {
            let scope = request.approve(approver, note, at)?;
            self.store.insert_scope(scope.clone())?;
            Ok(scope)
        })
    }

    pub fn deny(
        &self,
        id: RequestId,
        approver: UserId,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        self.transition(id, |request| Ok(request.deny(approver, reason, at)?))
    }

    pub fn cancel(&self, id: RequestId, by: UserId, at: DateTime<Utc>) -> Result<(), ApprovalError> {
        self.transition(id, |request| Ok(request.cancel(by, at)?))
    }

    pub fn get(&self, id: RequestId) -> Result<Option<PermissionRequest>, ApprovalError> {
        Ok(self.requests()?.get(&id).cloned())
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Result<Vec<PermissionRequest>, ApprovalError> {
        let mut pending: Vec<_> = self
            .requests()?
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.requested_at, r.id));
        Ok(pending)
    }

    /// Apply `f` to a copy and commit the copy only if `f` succeeds.
    fn transition<T>(
        &self,
        id: RequestId,
        f: impl FnOnce(&mut PermissionRequest) -> Result<T, ApprovalError>,
    ) -> Result<T, ApprovalError> {
        let mut requests = self.requests_mut()?;
        let current = requests.get(&id).ok_or(ApprovalError::NotFound(id))?;
        let mut next = current.clone();
        let out = f(&mut next)?;
        tracing::info!(request = %id, status = ?next.status, "permission request resolved");
        requests.insert(id, next);
        Ok(out)
    }

    fn requests(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RequestId, PermissionRequest>>, ApprovalError> {
        self.requests
            .read()
            .map_err(|_| ApprovalError::Unavailable("lock poisoned".to_string()))
    }

    fn requests_mut(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RequestId, PermissionRequest>>, ApprovalError> {
        self.requests
            .write()
            .map_err(|_| ApprovalError::Unavailable("lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use accord_auth::{
        PermissionDefinition, PermissionEngine, PermissionKey, RequestContext, RequestStatus,
        RoleDefinition, ScopeOrigin,
    };
    use chrono::{Duration, TimeZone};

    use accord_core::OrgId;

    use crate::decision_log::InMemoryDecisionLog;
    use crate::grant_store::InMemoryGrantStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn desk() -> ApprovalDesk<Arc<InMemoryGrantStore>> {
        let store = Arc::new(InMemoryGrantStore::new());
        store
            .define_permission(PermissionDefinition::new("reports:export"))
            .unwrap();
        store
            .define_role(RoleDefinition::new("analyst", 5).with_permission("reports:export"))
            .unwrap();
        ApprovalDesk::new(store)
    }

    #[test]
    fn approved_request_grants_through_the_engine() {
        let desk = desk();
        let (requester, approver) = (UserId::new(), UserId::new());
        let request =
            PermissionRequest::new(requester, "reports:export", Some(24), "audit", t0()).unwrap();
        let id = desk.submit(request, t0()).unwrap().id;

        let engine = PermissionEngine::new(desk.store().clone(), InMemoryDecisionLog::new());
        let perm = PermissionKey::new("reports:export");
        assert!(!engine.decide(requester, &perm, None, &RequestContext::at(t0())).is_granted());

        let scope = desk.approve(id, approver, None, t0()).unwrap();
        assert_eq!(scope.origin, ScopeOrigin::ApprovedRequest(id));

        let within = engine.decide(requester, &perm, None, &RequestContext::at(t0() + Duration::hours(23)));
        let after = engine.decide(requester, &perm, None, &RequestContext::at(t0() + Duration::hours(24)));
        assert!(within.is_granted());
        assert!(!after.is_granted());
        assert_eq!(desk.get(id).unwrap().unwrap().status, RequestStatus::Approved);
    }

    #[test]
    fn matching_rule_auto_approves_on_submit() {
        let desk = desk();
        desk.add_rule(
            AutoApprovalRule::new("analysts export", "reports:*")
                .with_max_duration_hours(8)
                .for_roles([RoleKey::new("analyst")]),
        )
        .unwrap();
        let analyst = UserId::new();
        desk.store().assign_role(analyst, "analyst", t0()).unwrap();

        let short = desk
            .submit(PermissionRequest::new(analyst, "reports:export", Some(4), "x", t0()).unwrap(), t0())
            .unwrap();
        let long = desk
            .submit(PermissionRequest::new(analyst, "reports:export", Some(48), "x", t0()).unwrap(), t0())
            .unwrap();

        assert_eq!(short.status, RequestStatus::Approved);
        assert!(short.granted_scope.is_some());
        assert_eq!(long.status, RequestStatus::Pending);
        assert_eq!(desk.pending().unwrap().len(), 1);
    }

    #[test]
    fn failed_scope_write_leaves_request_pending() {
        let desk = desk();
        let request =
            PermissionRequest::new(UserId::new(), "reports:export", Some(1), "x", t0()).unwrap();
        let id = desk.submit(request, t0()).unwrap().id;

        desk.store().set_available(false);
        let err = desk.approve(id, UserId::new(), None, t0()).unwrap_err();
        desk.store().set_available(true);

        assert!(matches!(err, ApprovalError::Write(WriteError::Unavailable(_))));
        assert!(desk.get(id).unwrap().unwrap().is_pending());
    }

    #[test]
    fn failed_auto_approval_keeps_request_pending() {
        let desk = desk();
        desk.add_rule(AutoApprovalRule::new("exports", "reports:export")).unwrap();
        let outsider = UserId::new();
        let request = PermissionRequest::new(outsider, "reports:export", Some(2), "x", t0())
            .unwrap()
            .in_org(OrgId::new());
        let id = request.id;

        // Not a member of the org, so the scope write is refused.
        let err = desk.submit(request, t0()).unwrap_err();

        assert!(matches!(err, ApprovalError::Write(WriteError::Invalid(_))));
        let stored = desk.get(id).unwrap().unwrap();
        assert!(stored.is_pending());
        assert!(stored.granted_scope.is_none());
        assert_eq!(desk.pending().unwrap().len(), 1);
    }

    #[test]
    fn deny_and_cancel() {
        let desk = desk();
        let requester = UserId::new();
        let a = desk
            .submit(PermissionRequest::new(requester, "reports:export", None, "x", t0()).unwrap(), t0())
            .unwrap()
            .id;
        let b = desk
            .submit(PermissionRequest::new(requester, "reports:export", None, "y", t0()).unwrap(), t0())
            .unwrap()
            .id;

        desk.deny(a, UserId::new(), "no", t0()).unwrap();
        desk.cancel(b, requester, t0()).unwrap();

        assert_eq!(desk.get(a).unwrap().unwrap().status, RequestStatus::Denied);
        assert_eq!(desk.get(b).unwrap().unwrap().status, RequestStatus::Cancelled);
        assert!(matches!(
            desk.approve(a, UserId::new(), None, t0()),
            Err(ApprovalError::Domain(DomainError::InvalidTransition(_)))
        ));
        assert!(matches!(
            desk.cancel(RequestId::new(), requester, t0()),
            Err(ApprovalError::NotFound(_))
        ));
    }
}
