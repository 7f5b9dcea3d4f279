//! Decision log sinks.

mod buffered;
mod in_memory;
mod json_lines;

use std::time::Duration;

pub use buffered::{BufferStats, BufferedDecisionLog, BufferedLogHandle, LogFailure};
pub use in_memory::InMemoryDecisionLog;
pub use json_lines::JsonLinesDecisionLog;

/// Settings for [`BufferedDecisionLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionLogConfig {
    /// Entries that may wait for the worker before `emit` reports `BufferFull`.
    pub buffer_capacity: usize,
    /// How long the worker waits for more entries before flushing.
    pub flush_interval: Duration,
    /// Entries written per flush at most.
    pub batch_size: usize,
}

impl Default for DecisionLogConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            flush_interval: Duration::from_millis(100),
            batch_size: 256,
        }
    }
}

impl DecisionLogConfig {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use accord_auth::{Decision, DecisionLogEntry, RequestContext};
    use accord_core::UserId;
    use chrono::Utc;

    pub fn entry(user_id: UserId, permission: &'static str) -> DecisionLogEntry {
        DecisionLogEntry::new(
            user_id,
            &permission.into(),
            None,
            &RequestContext::at(Utc::now()),
            &Decision::denied(),
            0,
            0,
        )
    }
}
