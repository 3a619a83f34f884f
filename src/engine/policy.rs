//! Policy engine: classification of diff entries and action decisions.
//!
//! Each entry is classified with a fixed precedence:
//!
//! 1. A matching in-scope ignore rule drops the entry.
//! 2. Matching in-scope info, warning and critical rules are collected.
//! 3. Registered evaluators run in registration order. An ignore verdict
//!    drops the entry unless a critical rule matched in step 2.
//! 4. The entry tier is the highest collected tier, or warning when nothing
//!    matched. The cited rule is the most specific rule of that tier; the
//!    earliest declared rule wins between equally specific ones.
//!
//! The report severity is the highest entry tier, and the action follows
//! from the severity and the environment policy.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::report::{
    DiffEntry, DriftReport, EntryClassification, Fingerprinter, RemediationAction,
    ResourceIdentity, Severity, Tier,
};
use crate::tree::{GlobSet, PathGlob, Specificity};

use super::evaluator::{NamespaceEscalator, TierEvaluator};

/// Namespace wildcard accepted in `auto_remediate.namespaces`.
pub const ANY_NAMESPACE: &str = "*";

/// Optional environment and namespace filter of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleScope {
    /// Environment the rule applies to; all when absent.
    pub environment: Option<String>,
    /// Namespace the rule applies to; all when absent.
    pub namespace: Option<String>,
}

/// A declarative classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Path glob matched against qualified diff paths.
    pub pattern: PathGlob,
    /// Tier assigned on match.
    pub tier: Tier,
    /// Scope filter.
    pub scope: RuleScope,
}

/// Rules in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PolicyRule>,
}

/// Auto-remediation eligibility for one environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPolicy {
    /// Environment name.
    pub environment: String,
    /// Namespaces eligible for auto-remediation; `*` means any.
    pub auto_remediate_namespaces: BTreeSet<String>,
    /// Resource id globs eligible for auto-remediation.
    pub auto_remediate_resources: GlobSet,
}

/// Compiled policy: rules, environment policies and built-in evaluators.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    /// Classification rules.
    pub rules: RuleSet,
    /// Environment policies keyed by environment name.
    pub environments: BTreeMap<String, EnvironmentPolicy>,
    /// Namespace and environment escalation.
    pub escalator: NamespaceEscalator,
}

/// Classifies diff entries and decides actions.
#[derive(Clone, Default)]
pub struct PolicyEngine {
    evaluators: Vec<Arc<dyn TierEvaluator>>,
    fingerprinter: Arc<Fingerprinter>,
}

/// Where a collected tier came from.
#[derive(Clone, Copy)]
enum Source<'a> {
    Rule(&'a PolicyRule),
    Evaluator(&'a str),
}

impl RuleScope {
    /// Returns true if the scope covers the environment and namespace.
    ///
    /// A namespaced rule never applies to an un-namespaced resource.
    #[must_use]
    pub fn applies(&self, environment: &str, namespace: Option<&str>) -> bool {
        let env_ok = self
            .environment
            .as_deref()
            .is_none_or(|env| env == environment);
        let ns_ok = match self.namespace.as_deref() {
            None => true,
            Some(scoped) => namespace == Some(scoped),
        };
        env_ok && ns_ok
    }
}

impl PolicyRule {
    /// Creates an unscoped rule.
    #[must_use]
    pub fn new(pattern: PathGlob, tier: Tier) -> Self {
        Self {
            pattern,
            tier,
            scope: RuleScope::default(),
        }
    }

    /// Restricts the rule to an environment.
    #[must_use]
    pub fn in_environment(mut self, environment: impl Into<String>) -> Self {
        self.scope.environment = Some(environment.into());
        self
    }

    /// Restricts the rule to a namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.scope.namespace = Some(namespace.into());
        self
    }

    /// Returns true if the rule is in scope and matches the path.
    #[must_use]
    pub fn matches(&self, path: &str, environment: &str, namespace: Option<&str>) -> bool {
        self.scope.applies(environment, namespace) && self.pattern.matches(path)
    }

    /// Returns the glob specificity.
    #[must_use]
    pub const fn specificity(&self) -> Specificity {
        self.pattern.specificity()
    }
}

impl RuleSet {
    /// Creates a rule set from rules in declaration order.
    #[must_use]
    pub const fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Iterates over rules in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, PolicyRule> {
        self.rules.iter()
    }

    /// Returns the number of rules.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the in-scope ignore globs, used to prune trees before diffing.
    #[must_use]
    pub fn ignore_globs(&self, environment: &str, namespace: Option<&str>) -> GlobSet {
        self.rules
            .iter()
            .filter(|r| r.tier == Tier::Ignore && r.scope.applies(environment, namespace))
            .map(|r| r.pattern.clone())
            .collect()
    }
}

impl EnvironmentPolicy {
    /// Creates a policy with no auto-remediation.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            auto_remediate_namespaces: BTreeSet::new(),
            auto_remediate_resources: GlobSet::default(),
        }
    }

    /// Sets the eligible namespaces.
    #[must_use]
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_remediate_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the eligible resource globs.
    #[must_use]
    pub fn with_resources(mut self, resources: GlobSet) -> Self {
        self.auto_remediate_resources = resources;
        self
    }

    /// Returns true if the resource may be remediated automatically.
    ///
    /// The resource id must match a resource glob. Namespaced resources must
    /// also be in an eligible namespace; cloud resources skip that check.
    #[must_use]
    pub fn allows_auto_remediation(&self, resource: &ResourceIdentity) -> bool {
        if !self
            .auto_remediate_resources
            .matches(&resource.resource_id())
        {
            return false;
        }

        resource.namespace().is_none_or(|ns| {
            self.auto_remediate_namespaces.contains(ANY_NAMESPACE)
                || self.auto_remediate_namespaces.contains(ns)
        })
    }
}

impl PolicySet {
    /// Returns the policy for an environment, or one with no auto-remediation.
    #[must_use]
    pub fn environment(&self, environment: &str) -> EnvironmentPolicy {
        self.environments
            .get(environment)
            .cloned()
            .unwrap_or_else(|| EnvironmentPolicy::new(environment))
    }

    /// Builds a policy engine with the built-in evaluators registered.
    #[must_use]
    pub fn engine(&self) -> PolicyEngine {
        let engine = PolicyEngine::new();
        if self.escalator.is_empty() {
            engine
        } else {
            engine.with_evaluator(Arc::new(self.escalator.clone()))
        }
    }
}

impl PolicyEngine {
    /// Creates an engine with no custom evaluators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator after the ones already registered.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn TierEvaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    /// Returns the names of registered evaluators in order.
    #[must_use]
    pub fn evaluator_names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    /// Classifies a single entry; `None` when it is dropped.
    #[must_use]
    pub fn classify_entry(
        &self,
        entry: &DiffEntry,
        resource: &ResourceIdentity,
        environment: &str,
        rules: &RuleSet,
    ) -> Option<EntryClassification> {
        let path = entry.path.to_string();
        let glob_key = entry.path.glob_key();
        let namespace = resource.namespace();

        let matched: Vec<&PolicyRule> = rules
            .iter()
            .filter(|r| r.matches(&glob_key, environment, namespace))
            .collect();

        if matched.iter().any(|r| r.tier == Tier::Ignore) {
            return None;
        }

        let critical_rule = matched.iter().any(|r| r.tier == Tier::Critical);
        let mut collected: Vec<(Tier, Source<'_>)> = matched
            .iter()
            .map(|r| (r.tier, Source::Rule(r)))
            .collect();

        for evaluator in &self.evaluators {
            match evaluator.evaluate(entry, resource, environment) {
                Some(Tier::Ignore) if !critical_rule => return None,
                Some(Tier::Ignore) | None => {}
                Some(tier) => collected.push((tier, Source::Evaluator(evaluator.name()))),
            }
        }

        let Some(tier) = collected.iter().map(|(t, _)| *t).max() else {
            return Some(EntryClassification {
                path,
                severity: Severity::Warning,
                rule: None,
                evaluator: None,
            });
        };

        let cited = Self::cite(&collected, tier);
        Some(EntryClassification {
            path,
            severity: tier.severity().unwrap_or(Severity::Warning),
            rule: match cited {
                Some(Source::Rule(rule)) => Some(rule.pattern.pattern().to_string()),
                _ => None,
            },
            evaluator: match cited {
                Some(Source::Evaluator(name)) => Some(name.to_string()),
                _ => None,
            },
        })
    }

    /// Picks the source cited for a tier: the most specific rule, the
    /// earliest declared among equals, else the first evaluator.
    fn cite<'a>(collected: &[(Tier, Source<'a>)], tier: Tier) -> Option<Source<'a>> {
        let mut best: Option<&'a PolicyRule> = None;
        for (t, source) in collected {
            if *t != tier {
                continue;
            }
            if let Source::Rule(rule) = *source {
                if best.is_none_or(|b| rule.specificity() > b.specificity()) {
                    best = Some(rule);
                }
            }
        }

        best.map(Source::Rule).or_else(|| {
            collected
                .iter()
                .find(|(t, s)| *t == tier && matches!(s, Source::Evaluator(_)))
                .map(|(_, s)| *s)
        })
    }

    /// Classifies a resource's diff entries into a report.
    ///
    /// Returns `None` when there are no entries or every entry was dropped.
    #[must_use]
    pub fn classify(
        &self,
        diffs: Vec<DiffEntry>,
        resource: &ResourceIdentity,
        env_policy: &EnvironmentPolicy,
        rules: &RuleSet,
        detected_at: DateTime<Utc>,
    ) -> Option<DriftReport> {
        let environment = env_policy.environment.as_str();

        let (retained, classifications): (Vec<DiffEntry>, Vec<EntryClassification>) = diffs
            .into_iter()
            .filter_map(|entry| {
                self.classify_entry(&entry, resource, environment, rules)
                    .map(|c| (entry, c))
            })
            .unzip();

        let severity = classifications.iter().map(|c| c.severity).max()?;
        let action = Self::decide_action(severity, env_policy, resource);
        let id = self
            .fingerprinter
            .fingerprint(&resource.qualified_id(), &retained);

        Some(DriftReport::new(
            id,
            resource.clone(),
            environment.to_string(),
            detected_at,
            retained,
            classifications,
            severity,
            action,
        ))
    }

    /// Decides the action for a report severity.
    ///
    /// Critical drift always goes to approval, in every environment.
    #[must_use]
    pub fn decide_action(
        severity: Severity,
        env_policy: &EnvironmentPolicy,
        resource: &ResourceIdentity,
    ) -> RemediationAction {
        match severity {
            Severity::Critical => RemediationAction::OpenApproval,
            Severity::Warning if env_policy.allows_auto_remediation(resource) => {
                RemediationAction::AutoRemediate
            }
            Severity::Warning | Severity::Info => RemediationAction::Alert,
        }
    }
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("evaluators", &self.evaluator_names())
            .finish()
    }
}
