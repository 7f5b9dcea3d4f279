//! Decision log collaborator interface.

use std::sync::Arc;

use thiserror::Error;

use crate::decision::DecisionLogEntry;

/// Failure to persist a decision log entry.
///
/// Never changes the decision returned to the caller.
#[derive(Debug, Error)]
pub enum LogWriteError {
    #[error("decision log buffer is full")]
    BufferFull,

    #[error("decision log is closed")]
    Closed,

    #[error("decision log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decision log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("decision log storage error: {0}")]
    Storage(String),
}

/// Append-only sink consumed by the audit/analytics pipeline.
///
/// `emit` must not block on slow storage; buffered implementations flush
/// asynchronously but keep per-user order.
pub trait DecisionLogSink: Send + Sync {
    fn emit(&self, entry: DecisionLogEntry) -> Result<(), LogWriteError>;

    /// Push buffered entries to storage.
    fn flush(&self) -> Result<(), LogWriteError> {
        Ok(())
    }
}

impl<L> DecisionLogSink for Arc<L>
where
    L: DecisionLogSink + ?Sized,
{
    fn emit(&self, entry: DecisionLogEntry) -> Result<(), LogWriteError> {
        (**self).emit(entry)
    }

    fn flush(&self) -> Result<(), LogWriteError> {
        (**self).flush()
    }
}

/// Sink that drops every entry. Useful for `explain`-only tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecisionLog;

impl DecisionLogSink for NullDecisionLog {
    fn emit(&self, _entry: DecisionLogEntry) -> Result<(), LogWriteError> {
        Ok(())
    }
}
