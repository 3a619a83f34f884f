//! Custom tier evaluators.
//!
//! Evaluators extend declarative rules with code. They run after rule
//! matching, in registration order, and can only add a tier to an entry or
//! ask for it to be dropped.

use std::collections::BTreeSet;

use crate::report::{DiffEntry, ResourceIdentity, Tier};

/// A registered classification strategy.
pub trait TierEvaluator: Send + Sync {
    /// Stable name, cited in classifications.
    fn name(&self) -> &str;

    /// Returns a tier for the entry, or `None` to abstain.
    ///
    /// A verdict of [`Tier::Ignore`] drops the entry unless a critical rule
    /// matched it.
    fn evaluate(&self, entry: &DiffEntry, resource: &ResourceIdentity, environment: &str)
    -> Option<Tier>;
}

/// Escalates any drift in listed namespaces or environments to critical.
#[derive(Debug, Clone, Default)]
pub struct NamespaceEscalator {
    namespaces: BTreeSet<String>,
    environments: BTreeSet<String>,
}

impl NamespaceEscalator {
    /// Creates an escalator for the given namespaces and environments.
    #[must_use]
    pub fn new<N, E>(namespaces: N, environments: E) -> Self
    where
        N: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            namespaces: namespaces.into_iter().collect(),
            environments: environments.into_iter().collect(),
        }
    }

    /// Returns true if the escalator has nothing to match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.environments.is_empty()
    }
}

impl TierEvaluator for NamespaceEscalator {
    fn name(&self) -> &str {
        "namespace_escalator"
    }

    fn evaluate(
        &self,
        _entry: &DiffEntry,
        resource: &ResourceIdentity,
        environment: &str,
    ) -> Option<Tier> {
        let in_namespace = resource
            .namespace()
            .is_some_and(|ns| self.namespaces.contains(ns));

        (in_namespace || self.environments.contains(environment)).then_some(Tier::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::DiffKind;
    use crate::tree::DiffPath;

    fn entry() -> DiffEntry {
        DiffEntry {
            path: DiffPath::root("k8s_deployment").child("replicas"),
            kind: DiffKind::Changed,
            desired_value: None,
            live_value: None,
            resource_type: String::from("k8s_deployment"),
        }
    }

    #[test]
    fn test_escalates_listed_namespace() {
        let escalator = NamespaceEscalator::new(vec![String::from("payments")], Vec::new());
        let in_ns = ResourceIdentity::new("k8s_deployment", "api").with_namespace("payments");
        let other = ResourceIdentity::new("k8s_deployment", "api").with_namespace("web");

        assert_eq!(escalator.evaluate(&entry(), &in_ns, "dev"), Some(Tier::Critical));
        assert_eq!(escalator.evaluate(&entry(), &other, "dev"), None);
    }

    #[test]
    fn test_escalates_listed_environment() {
        let escalator = NamespaceEscalator::new(Vec::new(), vec![String::from("prod")]);
        let resource = ResourceIdentity::new("aws_instance", "web");

        assert_eq!(escalator.evaluate(&entry(), &resource, "prod"), Some(Tier::Critical));
        assert_eq!(escalator.evaluate(&entry(), &resource, "dev"), None);
        assert!(!escalator.is_empty());
    }
}
