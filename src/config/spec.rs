//! Configuration specification types for DriftGuard.
//!
//! This module defines the structs that map to the `driftguard.yaml` file:
//! environment policies, drift rules, coordinator and detection settings,
//! the resource inventory and report sinks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::{
    EnvironmentPolicy, NamespaceEscalator, PolicyRule, PolicySet, RuleSet,
};
use crate::error::PolicyConfigError;
use crate::report::{ResourceIdentity, ResourceUniverse, Tier};
use crate::tree::{GlobSet, PathGlob};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DriftGuardConfig {
    /// Project-level configuration.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Per-environment auto-remediation policies.
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    /// Drift classification rules.
    #[serde(default)]
    pub drift_rules: DriftRulesConfig,
    /// Remediation coordinator settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Detection run settings.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Resources to check.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Report sink.
    #[serde(default)]
    pub reports: ReportsConfig,
    /// Remediation record persistence.
    #[serde(default)]
    pub records: RecordsConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name, used in logs.
    #[serde(default = "default_project_name")]
    pub name: String,
    /// Environment this deployment of DriftGuard checks.
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Auto-remediation policy of one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Environment name.
    pub environment: String,
    /// Auto-remediation eligibility.
    #[serde(default)]
    pub auto_remediate: AutoRemediateConfig,
}

/// Auto-remediation eligibility lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AutoRemediateConfig {
    /// Eligible namespaces; `*` means any.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Eligible resource id globs.
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Drift classification rules, grouped by tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DriftRulesConfig {
    /// Paths whose drift is dropped.
    #[serde(default)]
    pub ignore: Vec<RuleConfig>,
    /// Paths whose drift is informational.
    #[serde(default)]
    pub info: Vec<RuleConfig>,
    /// Paths whose drift is a warning.
    #[serde(default)]
    pub warning: Vec<RuleConfig>,
    /// Paths whose drift is critical.
    #[serde(default)]
    pub critical: Vec<RuleConfig>,
    /// Namespaces in which any drift is critical.
    #[serde(default)]
    pub escalate_namespaces: Vec<String>,
    /// Environments in which any drift is critical.
    #[serde(default)]
    pub escalate_environments: Vec<String>,
}

/// A rule: a bare glob or a glob with a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RuleConfig {
    /// Unscoped glob.
    Pattern(String),
    /// Scoped glob.
    Scoped {
        /// Path glob.
        pattern: String,
        /// Environment filter.
        #[serde(default)]
        environment: Option<String>,
        /// Namespace filter.
        #[serde(default)]
        namespace: Option<String>,
    },
}

/// Remediation coordinator settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Seconds during which a succeeded fingerprint is not acted on again.
    #[serde(default = "default_suppression_window")]
    pub suppression_window_secs: u64,
    /// Seconds after which an in-progress record is considered stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Per-dispatch executor timeout in seconds.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

/// Detection run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Per-call collector timeout in seconds.
    #[serde(default = "default_collection_timeout")]
    pub collection_timeout_secs: u64,
    /// Maximum resources processed concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Globs of scalar arrays whose order is significant.
    #[serde(default)]
    pub ordered_paths: Vec<String>,
    /// Directory of desired/live snapshot files.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

/// A resource to check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Resource type (e.g. `aws_security_group`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Kubernetes namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Resource universe; inferred from the type when absent.
    #[serde(default)]
    pub universe: Option<ResourceUniverse>,
}

/// Report sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportsConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: ReportBackend,
    /// Directory for the local backend.
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Report backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportBackend {
    /// Local JSON-lines files.
    #[default]
    Local,
    /// AWS S3 objects.
    S3,
}

/// Remediation record persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordsConfig {
    /// Directory holding the record table and its lock.
    #[serde(default = "default_records_path")]
    pub path: String,
}

fn default_project_name() -> String {
    String::from("driftguard")
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_suppression_window() -> u64 {
    3600
}

const fn default_stale_after() -> u64 {
    1800
}

const fn default_dispatch_timeout() -> u64 {
    120
}

const fn default_collection_timeout() -> u64 {
    60
}

const fn default_max_concurrency() -> usize {
    8
}

fn default_snapshot_dir() -> String {
    String::from("snapshots")
}

fn default_records_path() -> String {
    String::from(".driftguard")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            environment: default_environment(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: default_suppression_window(),
            stale_after_secs: default_stale_after(),
            dispatch_timeout_secs: default_dispatch_timeout(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            collection_timeout_secs: default_collection_timeout(),
            max_concurrency: default_max_concurrency(),
            ordered_paths: Vec::new(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            backend: ReportBackend::Local,
            path: None,
            bucket: None,
            prefix: None,
            region: None,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            path: default_records_path(),
        }
    }
}

impl RuleConfig {
    /// Returns the glob pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Pattern(pattern) | Self::Scoped { pattern, .. } => pattern,
        }
    }

    /// Compiles the rule for a tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the glob is invalid.
    pub fn compile(&self, tier: Tier) -> Result<PolicyRule, PolicyConfigError> {
        let rule = PolicyRule::new(PathGlob::new(self.pattern())?, tier);
        Ok(match self {
            Self::Pattern(_) => rule,
            Self::Scoped {
                environment,
                namespace,
                ..
            } => {
                let rule = match environment {
                    Some(env) => rule.in_environment(env.clone()),
                    None => rule,
                };
                match namespace {
                    Some(ns) => rule.in_namespace(ns.clone()),
                    None => rule,
                }
            }
        })
    }
}

impl CoordinatorConfig {
    /// Returns the suppression window.
    #[must_use]
    pub const fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    /// Returns the stale threshold.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Returns the dispatch timeout.
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

impl DetectionConfig {
    /// Returns the collection timeout.
    #[must_use]
    pub const fn collection_timeout(&self) -> Duration {
        Duration::from_secs(self.collection_timeout_secs)
    }

    /// Compiles the order-sensitive path globs.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob is invalid.
    pub fn ordered_globs(&self) -> Result<GlobSet, PolicyConfigError> {
        GlobSet::from_patterns(&self.ordered_paths)
    }
}

impl ResourceConfig {
    /// Converts to a resource identity.
    #[must_use]
    pub fn identity(&self) -> ResourceIdentity {
        let identity = ResourceIdentity::new(&self.resource_type, &self.name);
        let identity = match &self.namespace {
            Some(ns) => identity.with_namespace(ns.clone()),
            None => identity,
        };
        match self.universe {
            Some(universe) => identity.with_universe(universe),
            None => identity,
        }
    }
}

impl DriftGuardConfig {
    /// Returns the identities of all configured resources.
    #[must_use]
    pub fn resource_identities(&self) -> Vec<ResourceIdentity> {
        self.resources.iter().map(ResourceConfig::identity).collect()
    }

    /// Finds a configured resource by `<namespace>/<type>.<name>` or
    /// `<type>.<name>` id.
    ///
    /// The unqualified form returns the first declared match.
    #[must_use]
    pub fn find_resource(&self, resource_id: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| {
            let identity = r.identity();
            identity.qualified_id() == resource_id || identity.resource_id() == resource_id
        })
    }

    /// Compiles the rules and environment policies.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid glob or a duplicated environment.
    pub fn compile(&self) -> Result<PolicySet, PolicyConfigError> {
        let tiers = [
            (Tier::Ignore, &self.drift_rules.ignore),
            (Tier::Info, &self.drift_rules.info),
            (Tier::Warning, &self.drift_rules.warning),
            (Tier::Critical, &self.drift_rules.critical),
        ];

        let mut rules = Vec::new();
        for (tier, configs) in tiers {
            for config in configs {
                rules.push(config.compile(tier)?);
            }
        }

        let mut environments = BTreeMap::new();
        for env in &self.environments {
            let policy = EnvironmentPolicy::new(&env.environment)
                .with_namespaces(env.auto_remediate.namespaces.iter().cloned())
                .with_resources(GlobSet::from_patterns(&env.auto_remediate.resources)?);

            if environments.insert(env.environment.clone(), policy).is_some() {
                return Err(PolicyConfigError::DuplicateEnvironment {
                    environment: env.environment.clone(),
                });
            }
        }

        Ok(PolicySet {
            rules: RuleSet::new(rules),
            environments,
            escalator: NamespaceEscalator::new(
                self.drift_rules.escalate_namespaces.iter().cloned(),
                self.drift_rules.escalate_environments.iter().cloned(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriftGuardConfig::default();
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.coordinator.suppression_window(), Duration::from_secs(3600));
        assert_eq!(config.coordinator.stale_after(), Duration::from_secs(1800));
        assert_eq!(config.coordinator.dispatch_timeout(), Duration::from_secs(120));
        assert_eq!(config.detection.max_concurrency, 8);
        assert_eq!(config.reports.backend, ReportBackend::Local);
    }

    #[test]
    fn test_rule_config_forms() {
        let yaml = r#"
- "aws_security_group.ingress"
- pattern: "k8s_deployment.spec.replicas"
  environment: prod
"#;
        let rules: Vec<RuleConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0], RuleConfig::Pattern(String::from("aws_security_group.ingress")));

        let compiled = rules[1].compile(Tier::Critical).unwrap();
        assert_eq!(compiled.scope.environment.as_deref(), Some("prod"));
        assert_eq!(compiled.scope.namespace, None);
    }

    #[test]
    fn test_compile_rejects_duplicate_environment() {
        let config = DriftGuardConfig {
            environments: vec![
                EnvironmentConfig {
                    environment: String::from("dev"),
                    auto_remediate: AutoRemediateConfig::default(),
                },
                EnvironmentConfig {
                    environment: String::from("dev"),
                    auto_remediate: AutoRemediateConfig::default(),
                },
            ],
            ..DriftGuardConfig::default()
        };

        assert!(matches!(
            config.compile(),
            Err(PolicyConfigError::DuplicateEnvironment { .. })
        ));
    }

    #[test]
    fn test_resource_identity_inference() {
        let resource = ResourceConfig {
            resource_type: String::from("k8s_deployment"),
            name: String::from("api"),
            namespace: Some(String::from("payments")),
            universe: None,
        };
        let identity = resource.identity();
        assert_eq!(identity.universe, ResourceUniverse::Kubernetes);
        assert_eq!(identity.namespace(), Some("payments"));
    }

    #[test]
    fn test_find_resource_by_qualified_id() {
        let config = DriftGuardConfig {
            resources: vec![
                ResourceConfig {
                    resource_type: String::from("k8s_deployment"),
                    name: String::from("app"),
                    namespace: Some(String::from("web")),
                    universe: None,
                },
                ResourceConfig {
                    resource_type: String::from("k8s_deployment"),
                    name: String::from("app"),
                    namespace: Some(String::from("db")),
                    universe: None,
                },
            ],
            ..DriftGuardConfig::default()
        };

        let db = config.find_resource("db/k8s_deployment.app").unwrap();
        assert_eq!(db.namespace.as_deref(), Some("db"));

        let first = config.find_resource("k8s_deployment.app").unwrap();
        assert_eq!(first.namespace.as_deref(), Some("web"));

        assert!(config.find_resource("k8s_deployment.other").is_none());
    }
}
