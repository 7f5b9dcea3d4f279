//! Grant storage: change notifications, write errors, and the in-memory store.

mod in_memory;

use std::sync::Arc;

use thiserror::Error;

use accord_auth::{ConditionRecord, DelegationRecord, GrantRef, RoleGraphError, RoleKey, ScopeRecord};
use accord_core::{DomainError, OrgId, UserId};

pub use in_memory::{ExpiryReport, InMemoryGrantStore};

/// What a write touched. Published on the store's change feed so caches can
/// drop affected entries right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantChange {
    User(UserId),
    Role(RoleKey),
    Org(OrgId),
    Grant(GrantRef),
    All,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("grant store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid write: {0}")]
    Invalid(String),
}

impl From<RoleGraphError> for WriteError {
    fn from(err: RoleGraphError) -> Self {
        WriteError::Invalid(err.to_string())
    }
}

impl From<DomainError> for WriteError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Conflict(msg) | DomainError::InvalidTransition(msg) => {
                WriteError::Conflict(msg)
            }
            other => WriteError::Invalid(other.to_string()),
        }
    }
}

/// Write side used by producers of grants (approval desk, delegation issuing).
pub trait GrantAdmin: Send + Sync {
    fn insert_scope(&self, scope: ScopeRecord) -> Result<(), WriteError>;

    /// Inserts a delegation together with the conditions it inherited from
    /// the delegator's grant.
    fn insert_delegation(
        &self,
        delegation: DelegationRecord,
        conditions: Vec<ConditionRecord>,
    ) -> Result<(), WriteError>;
}

impl<A> GrantAdmin for Arc<A>
where
    A: GrantAdmin + ?Sized,
{
    fn insert_scope(&self, scope: ScopeRecord) -> Result<(), WriteError> {
        (**self).insert_scope(scope)
    }

    fn insert_delegation(
        &self,
        delegation: DelegationRecord,
        conditions: Vec<ConditionRecord>,
    ) -> Result<(), WriteError> {
        (**self).insert_delegation(delegation, conditions)
    }
}
