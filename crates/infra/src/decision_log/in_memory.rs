use std::sync::RwLock;

use accord_auth::{DecisionLogEntry, DecisionLogSink, LogWriteError};
use accord_core::UserId;

/// Append-only in-memory decision log, queryable per user for audit replay.
#[derive(Debug, Default)]
pub struct InMemoryDecisionLog {
    entries: RwLock<Vec<DecisionLogEntry>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DecisionLogEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries for one user, in the order they were written.
    pub fn for_user(&self, user_id: UserId) -> Vec<DecisionLogEntry> {
        self.entries
            .read()
            .map(|e| e.iter().filter(|x| x.user_id == user_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DecisionLogSink for InMemoryDecisionLog {
    fn emit(&self, entry: DecisionLogEntry) -> Result<(), LogWriteError> {
        self.entries
            .write()
            .map_err(|_| LogWriteError::Storage("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_log::test_support::entry;

    #[test]
    fn keeps_per_user_order() {
        let log = InMemoryDecisionLog::new();
        let (a, b) = (UserId::new(), UserId::new());

        log.emit(entry(a, "orders:view")).unwrap();
        log.emit(entry(b, "orders:view")).unwrap();
        log.emit(entry(a, "orders:approve")).unwrap();

        let for_a: Vec<_> = log
            .for_user(a)
            .into_iter()
            .map(|e| e.permission.as_str().to_string())
            .collect();
        assert_eq!(for_a, vec!["orders:view", "orders:approve"]);
        assert_eq!(log.len(), 3);
    }
}
