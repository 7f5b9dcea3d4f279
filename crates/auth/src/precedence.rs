//! Precedence resolution.
//!
//! Any single passing candidate grants access; there is no deny primitive.
//! Specificity only picks which grant the decision cites:
//!
//! 1. resource-specific beats wildcard
//! 2. scope / delegation / organization beats role-derived
//! 3. latest `granted_at` wins, then the smallest grant reference

use std::cmp::Ordering;

use crate::decision::Decision;
use crate::grants::{Candidate, GrantSource};

/// Decide from candidates and their evaluation results (index-aligned).
///
/// Candidates without a matching `evaluated` entry count as not passing.
pub fn resolve(candidates: &[Candidate], evaluated: &[bool]) -> Decision {
    candidates
        .iter()
        .zip(evaluated)
        .filter(|(_, passed)| **passed)
        .map(|(candidate, _)| candidate)
        .max_by(|a, b| precedence(a, b))
        .map(Decision::granted)
        .unwrap_or_else(Decision::denied)
}

fn precedence(a: &Candidate, b: &Candidate) -> Ordering {
    a.is_resource_specific()
        .cmp(&b.is_resource_specific())
        .then_with(|| is_explicit(a).cmp(&is_explicit(b)))
        .then_with(|| a.granted_at.cmp(&b.granted_at))
        .then_with(|| b.grant.cmp(&a.grant))
}

fn is_explicit(candidate: &Candidate) -> bool {
    candidate.source != GrantSource::Role
}
