//! `accord-infra`: collaborators for the permission engine (grant storage,
//! caching, decision log sinks, the approval desk and configuration).

pub mod approval;
pub mod cache;
pub mod config;
pub mod decision_log;
pub mod feed;
pub mod grant_store;


pub use approval::{ApprovalDesk, ApprovalError};
pub use cache::{CacheConfig, CacheStats, CachedGrantStore, MAX_CACHE_STALENESS};
pub use config::{ConfigError, EngineConfig};
pub use decision_log::{
    BufferStats, BufferedDecisionLog, BufferedLogHandle, DecisionLogConfig, InMemoryDecisionLog,
    JsonLinesDecisionLog, LogFailure,
};
pub use feed::{Feed, Subscription};
pub use grant_store::{ExpiryReport, GrantAdmin, GrantChange, InMemoryGrantStore, WriteError};
