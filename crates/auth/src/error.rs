use thiserror::Error;

use crate::decision::DecisionReason;
use crate::permissions::PermissionKey;

/// Error form of a non-granted decision, for callers that want `?`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(PermissionKey),

    /// The engine could not evaluate the request. Callers should deny and retry.
    #[error("authorization could not be evaluated: {0}")]
    EvaluationFailed(DecisionReason),
}
