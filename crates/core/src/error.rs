//! Errors raised by grant records and request workflows.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A rejected change to a grant, delegation or permission request.
///
/// Store outages and log failures have their own error types; this one only
/// covers outcomes decided by the records themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, e.g. a zero-hour request or an empty justification.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record is not in a state that allows the change (a resolved
    /// request, a delegation that is no longer active).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Stale version on an optimistic write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The actor may not act on this record, e.g. a requester approving
    /// their own request.
    #[error("not permitted: {0}")]
    NotPermitted(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_permitted(msg: impl Into<String>) -> Self {
        Self::NotPermitted(msg.into())
    }
}
