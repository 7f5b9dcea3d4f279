//! `accord-auth`: the permission resolution engine.
//!
//! Pure decision logic over read-only collaborator traits (`GrantStore`,
//! `DecisionLogSink`). Storage, caching and log transport live in
//! `accord-infra`.
//!
//! A decision runs four stages: collect candidates, evaluate their
//! conditions, resolve precedence, log.

pub mod approval;
pub mod collector;
pub mod conditions;
pub mod context;
pub mod decision;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod grants;
pub mod log;
pub mod permissions;
pub mod precedence;
pub mod roles;
pub mod store;

#[cfg(test)]
mod testing;

pub use approval::{
    find_auto_approval, Approver, AutoApprovalRule, PermissionRequest, RequestStatus, Resolution,
};
pub use conditions::{
    Condition, ConditionRecord, DeviceRule, IpRangeRule, LocationRule, TimeWindow,
};
pub use context::{GeoLocation, LatLng, RequestContext, ResourceRef};
pub use decision::{Decision, DecisionLogEntry, DecisionReason, Outcome};
pub use delegation::{issue_delegation, DelegationError, IssuedDelegation, NewDelegation};
pub use engine::{CandidateTrace, DecisionTrace, PermissionEngine};
pub use error::AuthzError;
pub use evaluator::{ConditionFailure, ConditionVerdict};
pub use grants::{
    Candidate, DelegationRecord, DelegationStatus, GrantRef, GrantSource, OrgMembership,
    Revocation, RoleAssignment, ScopeOrigin, ScopeRecord,
};
pub use log::{DecisionLogSink, LogWriteError, NullDecisionLog};
pub use permissions::{PermissionDefinition, PermissionKey};
pub use roles::{PermissionTemplate, RoleDefinition, RoleGraph, RoleGraphError, RoleKey};
pub use store::{GrantStore, StoreError};
