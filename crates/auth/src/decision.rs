//! Decision outcome and the audit record written for every decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use accord_core::{DecisionId, OrgId, UserId};

use crate::context::{RequestContext, ResourceRef};
use crate::grants::{Candidate, GrantRef, GrantSource};
use crate::permissions::PermissionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Granted,
    Denied,
    /// The engine could not evaluate the inputs. Callers must not treat this
    /// as `Granted`.
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Granted => "granted",
            Outcome::Denied => "denied",
            Outcome::Error => "error",
        }
    }
}

/// Non-sensitive reason classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    MatchingGrant,
    NoMatchingGrant,
    StoreUnavailable,
    InternalError,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::MatchingGrant => "matching_grant",
            DecisionReason::NoMatchingGrant => "no_matching_grant",
            DecisionReason::StoreUnavailable => "store_unavailable",
            DecisionReason::InternalError => "internal_error",
        }
    }
}

impl core::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one `decide` call.
///
/// `grant` names the winning grant for audit; it never influences whether
/// access was granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub grant_source: Option<GrantSource>,
    pub grant: Option<GrantRef>,
    pub reason: DecisionReason,
}

impl Decision {
    pub fn granted(winner: &Candidate) -> Self {
        Self {
            outcome: Outcome::Granted,
            grant_source: Some(winner.source),
            grant: Some(winner.grant.clone()),
            reason: DecisionReason::MatchingGrant,
        }
    }

    pub fn denied() -> Self {
        Self {
            outcome: Outcome::Denied,
            grant_source: None,
            grant: None,
            reason: DecisionReason::NoMatchingGrant,
        }
    }

    pub fn error(reason: DecisionReason) -> Self {
        Self {
            outcome: Outcome::Error,
            grant_source: None,
            grant: None,
            reason,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == Outcome::Granted
    }
}

/// Immutable audit record of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: DecisionId,
    pub user_id: UserId,
    pub permission: PermissionKey,
    pub resource: Option<ResourceRef>,
    pub outcome: Outcome,
    pub grant_source: Option<GrantSource>,
    pub grant: Option<GrantRef>,
    pub reason: DecisionReason,
    pub candidates_considered: usize,
    pub candidates_passing: usize,
    pub ip: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<String>,
    pub corporate_device: bool,
    pub org_id: Option<OrgId>,
    /// Request time the decision was evaluated at.
    pub evaluated_at: DateTime<Utc>,
    pub logged_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn new(
        user_id: UserId,
        permission: &PermissionKey,
        resource: Option<&ResourceRef>,
        ctx: &RequestContext,
        decision: &Decision,
        candidates_considered: usize,
        candidates_passing: usize,
    ) -> Self {
        Self {
            id: DecisionId::new(),
            user_id,
            permission: permission.clone(),
            resource: resource.cloned(),
            outcome: decision.outcome,
            grant_source: decision.grant_source,
            grant: decision.grant.clone(),
            reason: decision.reason,
            candidates_considered,
            candidates_passing,
            ip: ctx.ip.clone(),
            device_type: ctx.device_type.clone(),
            os: ctx.os.clone(),
            corporate_device: ctx.corporate_device,
            org_id: ctx.org_id,
            evaluated_at: ctx.now,
            logged_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_and_reason_wire_names() {
        assert_eq!(serde_json::to_value(Outcome::Granted).unwrap(), "granted");
        assert_eq!(
            serde_json::to_value(DecisionReason::NoMatchingGrant).unwrap(),
            DecisionReason::NoMatchingGrant.as_str()
        );
    }

    #[test]
    fn log_entry_copies_context_fields() {
        let user = UserId::new();
        let org = OrgId::new();
        let ctx = RequestContext::at(Utc::now())
            .with_ip("10.0.0.1")
            .with_device("laptop", "linux")
            .with_org(org);
        let entry = DecisionLogEntry::new(
            user,
            &PermissionKey::new("orders:view"),
            None,
            &ctx,
            &Decision::denied(),
            2,
            0,
        );

        assert_eq!(entry.user_id, user);
        assert_eq!(entry.outcome, Outcome::Denied);
        assert_eq!(entry.reason, DecisionReason::NoMatchingGrant);
        assert_eq!(entry.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.org_id, Some(org));
        assert_eq!(entry.evaluated_at, ctx.now);
        assert_eq!(entry.candidates_considered, 2);
    }

    #[test]
    fn log_entry_round_trips_through_json() {
        let ctx = RequestContext::at(Utc::now());
        let entry = DecisionLogEntry::new(
            UserId::new(),
            &PermissionKey::new("orders:view"),
            Some(&ResourceRef::new("order", "o-1")),
            &ctx,
            &Decision::error(DecisionReason::StoreUnavailable),
            0,
            0,
        );
        let line = serde_json::to_string(&entry).unwrap();
        let back: DecisionLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }
}
