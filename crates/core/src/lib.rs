//! `accord-core`: identifiers, errors and concurrency primitives shared by
//! the permission engine and its collaborators.
//!
//! This crate contains **pure** primitives (no storage, no clocks, no IO).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{DecisionId, GrantId, OrgId, RequestId, UserId};
pub use version::ExpectedVersion;
