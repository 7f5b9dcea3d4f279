//! `PermissionEngine`: collect, evaluate, resolve, log.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use accord_core::UserId;
use accord_observability::DecisionMetrics;

use crate::collector;
use crate::context::{RequestContext, ResourceRef};
use crate::decision::{Decision, DecisionLogEntry, DecisionReason, Outcome};
use crate::error::AuthzError;
use crate::evaluator::{self, ConditionVerdict};
use crate::grants::Candidate;
use crate::log::DecisionLogSink;
use crate::permissions::PermissionKey;
use crate::precedence;
use crate::store::{GrantStore, StoreError};

/// One candidate as seen by `explain`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateTrace {
    pub candidate: Candidate,
    pub verdicts: Vec<ConditionVerdict>,
    pub passed: bool,
}

/// Everything that went into a decision. Not logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTrace {
    pub candidates: Vec<CandidateTrace>,
    pub decision: Decision,
}

/// The decision engine.
///
/// Stateless apart from its collaborators; `decide` is safe to call from any
/// number of threads at once.
pub struct PermissionEngine<S, L> {
    store: S,
    log: L,
    metrics: Arc<DecisionMetrics>,
}

impl<S, L> PermissionEngine<S, L>
where
    S: GrantStore,
    L: DecisionLogSink,
{
    pub fn new(store: S, log: L) -> Self {
        Self {
            store,
            log,
            metrics: Arc::new(DecisionMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DecisionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn metrics(&self) -> &Arc<DecisionMetrics> {
        &self.metrics
    }

    /// Decide whether `user_id` may exercise `permission` on `resource`.
    ///
    /// Never fails: store errors become `Outcome::Error`, and a failed log
    /// write is reported through metrics and `tracing` only.
    #[instrument(skip_all, fields(user = %user_id, permission = %permission))]
    pub fn decide(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
        resource: Option<&ResourceRef>,
        ctx: &RequestContext,
    ) -> Decision {
        let (decision, considered, passing) =
            match collector::collect(&self.store, user_id, permission, resource, ctx) {
                Ok(candidates) => {
                    let evaluated: Vec<bool> = candidates
                        .iter()
                        .map(|c| evaluator::passes(c, ctx))
                        .collect();
                    let passing = evaluated.iter().filter(|ok| **ok).count();
                    (precedence::resolve(&candidates, &evaluated), candidates.len(), passing)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "grant store read failed");
                    (Decision::error(classify(&err)), 0, 0)
                }
            };

        match decision.outcome {
            Outcome::Granted => self.metrics.record_granted(),
            Outcome::Denied => self.metrics.record_denied(),
            Outcome::Error => self.metrics.record_error(),
        }

        tracing::debug!(
            outcome = decision.outcome.as_str(),
            source = decision.grant_source.map(|s| s.as_str()),
            considered,
            passing,
            "decision"
        );

        let entry =
            DecisionLogEntry::new(user_id, permission, resource, ctx, &decision, considered, passing);
        if let Err(err) = self.log.emit(entry) {
            self.metrics.record_log_failure();
            tracing::error!(error = %err, "failed to write decision log entry");
        }

        decision
    }

    /// `decide` with `?` semantics.
    pub fn check(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
        resource: Option<&ResourceRef>,
        ctx: &RequestContext,
    ) -> Result<(), AuthzError> {
        let decision = self.decide(user_id, permission, resource, ctx);
        match decision.outcome {
            Outcome::Granted => Ok(()),
            Outcome::Denied => Err(AuthzError::Forbidden(permission.clone())),
            Outcome::Error => Err(AuthzError::EvaluationFailed(decision.reason)),
        }
    }

    /// Same pipeline as `decide`, keeping every candidate and condition
    /// verdict. Writes no log entry and touches no metrics.
    pub fn explain(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
        resource: Option<&ResourceRef>,
        ctx: &RequestContext,
    ) -> Result<DecisionTrace, StoreError> {
        let candidates = collector::collect(&self.store, user_id, permission, resource, ctx)?;

        let traces: Vec<CandidateTrace> = candidates
            .into_iter()
            .map(|candidate| {
                let verdicts = evaluator::verdicts(&candidate.conditions, ctx);
                let passed = verdicts.iter().all(ConditionVerdict::passed);
                CandidateTrace {
                    candidate,
                    verdicts,
                    passed,
                }
            })
            .collect();

        let (candidates, evaluated): (Vec<Candidate>, Vec<bool>) = traces
            .iter()
            .map(|t| (t.candidate.clone(), t.passed))
            .unzip();
        let decision = precedence::resolve(&candidates, &evaluated);

        Ok(DecisionTrace {
            candidates: traces,
            decision,
        })
    }

    /// Role-derived permissions of a user, ignoring scopes and conditions.
    pub fn permissions_for_user(&self, user_id: UserId) -> Result<BTreeSet<PermissionKey>, StoreError> {
        let mut out = BTreeSet::new();
        for assignment in self.store.load_roles_for_user(user_id)? {
            match self.store.load_role_permissions(&assignment.role) {
                Ok(perms) => out.extend(perms),
                Err(StoreError::UnknownRole(role)) => {
                    tracing::debug!(role = %role, "skipping unknown role");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

fn classify(err: &StoreError) -> DecisionReason {
    match err {
        StoreError::Unavailable(_) => DecisionReason::StoreUnavailable,
        StoreError::UnknownRole(_) | StoreError::Corrupted(_) => DecisionReason::InternalError,
    }
}
