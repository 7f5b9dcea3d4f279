//! Lock-free counters for the decision hot path.
//!
//! Counters are process-local; exporting them is left to the embedding
//! service.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by every `decide` call and by log sinks.
#[derive(Debug, Default)]
pub struct DecisionMetrics {
    granted: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
    log_failures: AtomicU64,
}

/// Point-in-time copy of [`DecisionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub granted: u64,
    pub denied: u64,
    pub errors: u64,
    pub log_failures: u64,
}

impl MetricsSnapshot {
    pub fn decisions(&self) -> u64 {
        self.granted + self.denied + self.errors
    }
}

impl DecisionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_granted(&self) {
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_failure(&self) {
        self.log_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
        }
    }
}
