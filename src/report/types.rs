//! Drift report types.
//!
//! These types describe what was found for a resource in one detection
//! cycle: the diff entries, how each was classified and the decided action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tree::{DiffPath, StateValue};

/// Which API family a resource belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceUniverse {
    /// Terraform-managed cloud resource.
    Cloud,
    /// Helm-managed Kubernetes workload.
    Kubernetes,
}

/// Identity of a managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    /// Resource type (e.g. `aws_security_group`, `k8s_deployment`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Kubernetes namespace, absent for cloud resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resource universe.
    pub universe: ResourceUniverse,
}

/// Kind of difference found at a path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present only in live state.
    Added,
    /// Present only in desired state.
    Removed,
    /// Present in both with different values.
    Changed,
}

/// A single difference between desired and live state.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// Path of the difference.
    pub path: DiffPath,
    /// Kind of difference.
    pub kind: DiffKind,
    /// Desired value, absent for `Added`.
    pub desired_value: Option<StateValue>,
    /// Live value, absent for `Removed`.
    pub live_value: Option<StateValue>,
    /// Type of the resource the entry belongs to.
    pub resource_type: String,
}

/// Classification tier of a rule or diff entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Drop the entry.
    Ignore,
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Critical.
    Critical,
}

/// Severity of a retained entry or report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Critical.
    Critical,
}

/// Action decided for a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    /// Apply the desired state automatically.
    AutoRemediate,
    /// Open a change request for human approval.
    OpenApproval,
    /// Raise an alert only.
    Alert,
    /// Take no action.
    Ignore,
}

/// How a retained entry was classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryClassification {
    /// Path of the classified entry.
    pub path: String,
    /// Assigned severity.
    pub severity: Severity,
    /// Pattern of the cited rule, if a rule decided the tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Name of the evaluator, if a custom evaluator decided the tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
}

/// An immutable drift report for one resource and detection cycle.
///
/// Reports are only built by the policy engine and always carry at least
/// one diff entry. Corrections are new reports.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    id: String,
    resource: ResourceIdentity,
    environment: String,
    timestamp: DateTime<Utc>,
    diffs: Vec<DiffEntry>,
    classifications: Vec<EntryClassification>,
    severity: Severity,
    decided_action: RemediationAction,
}

/// Serialized shape of a diff entry inside a report.
#[derive(Debug, Serialize)]
pub struct DiffEntryJson<'a> {
    /// Dotted path.
    pub path: String,
    /// Kind of difference.
    pub kind: DiffKind,
    /// Desired value or null.
    pub desired_value: Option<&'a StateValue>,
    /// Live value or null.
    pub live_value: Option<&'a StateValue>,
}

/// Serialized shape of a report, as written to report sinks.
#[derive(Debug, Serialize)]
pub struct ReportJson<'a> {
    /// Fingerprint.
    pub id: &'a str,
    /// Resource identifier.
    pub resource_id: String,
    /// Environment name.
    pub environment: &'a str,
    /// Detection timestamp.
    pub timestamp: DateTime<Utc>,
    /// Report severity.
    pub severity: Severity,
    /// Decided action.
    pub decided_action: RemediationAction,
    /// Ordered diff entries.
    pub diffs: Vec<DiffEntryJson<'a>>,
}

impl ResourceUniverse {
    /// Infers the universe from a resource type prefix.
    #[must_use]
    pub fn infer(resource_type: &str) -> Self {
        if resource_type.starts_with("k8s_") || resource_type.starts_with("helm_") {
            Self::Kubernetes
        } else {
            Self::Cloud
        }
    }
}

impl ResourceIdentity {
    /// Creates a resource identity, inferring the universe from the type.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        Self {
            universe: ResourceUniverse::infer(&resource_type),
            resource_type,
            name: name.into(),
            namespace: None,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the universe explicitly.
    #[must_use]
    pub const fn with_universe(mut self, universe: ResourceUniverse) -> Self {
        self.universe = universe;
        self
    }

    /// Returns the `<type>.<name>` identifier matched by resource globs
    /// and used for snapshot file names.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Returns the identifier unique across namespaces:
    /// `<namespace>/<type>.<name>`, or `<type>.<name>` without a namespace.
    ///
    /// Fingerprints, remediation records and audit events key on this.
    #[must_use]
    pub fn qualified_id(&self) -> String {
        self.to_string()
    }

    /// Returns the namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}.{}", self.resource_type, self.name),
            None => write!(f, "{}.{}", self.resource_type, self.name),
        }
    }
}

impl fmt::Display for ResourceUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Changed => write!(f, "changed"),
        }
    }
}

impl Tier {
    /// Maps a retained tier to a severity; `Ignore` has none.
    #[must_use]
    pub const fn severity(self) -> Option<Severity> {
        match self {
            Self::Ignore => None,
            Self::Info => Some(Severity::Info),
            Self::Warning => Some(Severity::Warning),
            Self::Critical => Some(Severity::Critical),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Returns the stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RemediationAction {
    /// Returns the stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoRemediate => "auto_remediate",
            Self::OpenApproval => "open_approval",
            Self::Alert => "alert",
            Self::Ignore => "ignore",
        }
    }

    /// Returns true if this action is dispatched to an executor.
    #[must_use]
    pub const fn is_dispatched(self) -> bool {
        !matches!(self, Self::Ignore)
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DriftReport {
    #[allow(clippy::too_many_arguments)]
    pub(crate) const fn new(
        id: String,
        resource: ResourceIdentity,
        environment: String,
        timestamp: DateTime<Utc>,
        diffs: Vec<DiffEntry>,
        classifications: Vec<EntryClassification>,
        severity: Severity,
        decided_action: RemediationAction,
    ) -> Self {
        Self {
            id,
            resource,
            environment,
            timestamp,
            diffs,
            classifications,
            severity,
            decided_action,
        }
    }

    /// Returns the fingerprint.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the resource.
    #[must_use]
    pub const fn resource(&self) -> &ResourceIdentity {
        &self.resource
    }

    /// Returns the namespace-qualified resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> String {
        self.resource.qualified_id()
    }

    /// Returns the environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the detection timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the retained diff entries in path order.
    #[must_use]
    pub fn diffs(&self) -> &[DiffEntry] {
        &self.diffs
    }

    /// Returns the per-entry classifications, parallel to [`Self::diffs`].
    #[must_use]
    pub fn classifications(&self) -> &[EntryClassification] {
        &self.classifications
    }

    /// Returns the report severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the decided action.
    #[must_use]
    pub const fn decided_action(&self) -> RemediationAction {
        self.decided_action
    }

    /// Returns the serializable view of this report.
    #[must_use]
    pub fn to_json_view(&self) -> ReportJson<'_> {
        ReportJson::from(self)
    }
}

impl<'a> From<&'a DriftReport> for ReportJson<'a> {
    fn from(report: &'a DriftReport) -> Self {
        Self {
            id: &report.id,
            resource_id: report.resource.qualified_id(),
            environment: &report.environment,
            timestamp: report.timestamp,
            severity: report.severity,
            decided_action: report.decided_action,
            diffs: report
                .diffs
                .iter()
                .map(|d| DiffEntryJson {
                    path: d.path.to_string(),
                    kind: d.kind,
                    desired_value: d.desired_value.as_ref(),
                    live_value: d.live_value.as_ref(),
                })
                .collect(),
        }
    }
}

impl Serialize for DriftReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json_view().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_universe_inference() {
        assert_eq!(
            ResourceIdentity::new("k8s_deployment", "app").universe,
            ResourceUniverse::Kubernetes
        );
        assert_eq!(
            ResourceIdentity::new("helm_release", "ingress").universe,
            ResourceUniverse::Kubernetes
        );
        assert_eq!(
            ResourceIdentity::new("aws_security_group", "web").universe,
            ResourceUniverse::Cloud
        );
    }

    #[test]
    fn test_resource_display() {
        let pod = ResourceIdentity::new("k8s_pod", "api").with_namespace("payments");
        assert_eq!(pod.resource_id(), "k8s_pod.api");
        assert_eq!(pod.qualified_id(), "payments/k8s_pod.api");
        assert_eq!(pod.to_string(), "payments/k8s_pod.api");

        let sg = ResourceIdentity::new("aws_security_group", "web");
        assert_eq!(sg.qualified_id(), sg.resource_id());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Tier::Critical > Tier::Warning);
        assert_eq!(Tier::Ignore.severity(), None);
    }

    #[test]
    fn test_report_json_shape() {
        let report = DriftReport::new(
            String::from("abc"),
            ResourceIdentity::new("k8s_deployment", "app"),
            String::from("dev"),
            DateTime::<Utc>::UNIX_EPOCH,
            vec![DiffEntry {
                path: DiffPath::root("k8s_deployment").child("replicas"),
                kind: DiffKind::Changed,
                desired_value: Some(StateValue::from(3)),
                live_value: Some(StateValue::from(5)),
                resource_type: String::from("k8s_deployment"),
            }],
            vec![],
            Severity::Warning,
            RemediationAction::AutoRemediate,
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "abc",
                "resource_id": "k8s_deployment.app",
                "environment": "dev",
                "timestamp": "1970-01-01T00:00:00Z",
                "severity": "warning",
                "decided_action": "auto_remediate",
                "diffs": [{
                    "path": "k8s_deployment.replicas",
                    "kind": "changed",
                    "desired_value": 3,
                    "live_value": 5
                }]
            })
        );
    }
}
