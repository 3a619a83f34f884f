//! Drift detection engine.
//!
//! This module provides:
//! - Structured diffs between desired and live state trees
//! - Rule-based classification with custom evaluators
//! - Action decisions from severity and environment policy

mod diff;
mod evaluator;
mod policy;

pub use diff::DiffEngine;
pub use evaluator::{NamespaceEscalator, TierEvaluator};
pub use policy::{
    ANY_NAMESPACE, EnvironmentPolicy, PolicyEngine, PolicyRule, PolicySet, RuleScope, RuleSet,
};
