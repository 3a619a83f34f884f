//! Configuration validation for policy documents.
//!
//! The validator collects every problem it finds instead of stopping at the
//! first one, so `driftguard validate` can print them all. Errors are fatal
//! at startup; warnings are printed and otherwise ignored.

use crate::error::{PolicyConfigError, Result};
use std::collections::HashSet;
use tracing::debug;

use crate::tree::PathGlob;

use super::spec::{
    DriftGuardConfig, DriftRulesConfig, EnvironmentConfig, ReportBackend, ReportsConfig,
    ResourceConfig,
};

/// Validator for DriftGuard configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration, returning the first error if any.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &DriftGuardConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(PolicyConfigError::validation(first_error.message.clone(), first_error.field.clone()).into())
        }
    }

    /// Collects all errors and warnings without failing.
    #[must_use]
    pub fn check(&self, config: &DriftGuardConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.project.environment.trim().is_empty() {
            result.push_error("project.environment", "Environment cannot be empty");
        }

        Self::validate_environments(&config.environments, &config.project.environment, &mut result);
        Self::validate_rules(&config.drift_rules, &mut result);
        Self::validate_durations(config, &mut result);
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_reports(&config.reports, &mut result);

        for (i, pattern) in config.detection.ordered_paths.iter().enumerate() {
            Self::validate_glob(pattern, &format!("detection.ordered_paths[{i}]"), &mut result);
        }

        result
    }

    /// Validates environment policies.
    fn validate_environments(
        environments: &[EnvironmentConfig],
        active: &str,
        result: &mut ValidationResult,
    ) {
        let mut seen = HashSet::new();

        for (i, env) in environments.iter().enumerate() {
            let prefix = format!("environments[{i}]");

            if env.environment.trim().is_empty() {
                result.push_error(format!("{prefix}.environment"), "Environment name cannot be empty");
            } else if !seen.insert(env.environment.as_str()) {
                result.push_error(
                    format!("{prefix}.environment"),
                    format!("Duplicate environment policy: {}", env.environment),
                );
            }

            for (j, pattern) in env.auto_remediate.resources.iter().enumerate() {
                Self::validate_glob(pattern, &format!("{prefix}.auto_remediate.resources[{j}]"), result);
            }

            if !env.auto_remediate.namespaces.is_empty() && env.auto_remediate.resources.is_empty() {
                result.warnings.push(format!(
                    "{prefix}.auto_remediate: namespaces are listed but no resources, nothing will be auto-remediated"
                ));
            }
        }

        if !environments.is_empty() && !seen.contains(active) {
            result.warnings.push(format!(
                "project.environment: No policy for environment '{active}', auto-remediation is disabled"
            ));
        }
    }

    /// Validates rule globs and cross-tier conflicts.
    fn validate_rules(rules: &DriftRulesConfig, result: &mut ValidationResult) {
        let tiers = [
            ("ignore", &rules.ignore),
            ("info", &rules.info),
            ("warning", &rules.warning),
            ("critical", &rules.critical),
        ];

        for (tier, configs) in tiers {
            for (i, rule) in configs.iter().enumerate() {
                Self::validate_glob(rule.pattern(), &format!("drift_rules.{tier}[{i}]"), result);
            }
        }

        let critical: HashSet<&str> = rules.critical.iter().map(|r| r.pattern()).collect();
        for rule in &rules.ignore {
            if critical.contains(rule.pattern()) {
                result.warnings.push(format!(
                    "drift_rules.ignore: '{}' is also critical; the ignore rule takes precedence",
                    rule.pattern()
                ));
            }
        }
    }

    /// Validates timeouts and limits.
    fn validate_durations(config: &DriftGuardConfig, result: &mut ValidationResult) {
        let coordinator = &config.coordinator;

        if coordinator.dispatch_timeout_secs == 0 {
            result.push_error("coordinator.dispatch_timeout_secs", "Dispatch timeout must be at least 1 second");
        }
        if coordinator.stale_after_secs == 0 {
            result.push_error("coordinator.stale_after_secs", "Stale threshold must be at least 1 second");
        } else if coordinator.stale_after_secs <= coordinator.dispatch_timeout_secs {
            result.warnings.push(String::from(
                "coordinator.stale_after_secs: Stale threshold should exceed the dispatch timeout",
            ));
        }
        if coordinator.suppression_window_secs == 0 {
            result.warnings.push(String::from(
                "coordinator.suppression_window_secs: A zero window re-dispatches succeeded drift on every run",
            ));
        }

        if config.detection.collection_timeout_secs == 0 {
            result.push_error("detection.collection_timeout_secs", "Collection timeout must be at least 1 second");
        }
        if config.detection.max_concurrency == 0 {
            result.push_error("detection.max_concurrency", "Concurrency must be at least 1");
        }
    }

    /// Validates the resource inventory.
    fn validate_resources(resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
            return;
        }

        let mut seen = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if resource.resource_type.is_empty() || resource.resource_type.contains('.') {
                result.push_error(
                    format!("{prefix}.type"),
                    format!("Resource type '{}' must be non-empty and contain no dots", resource.resource_type),
                );
            }
            if resource.name.is_empty() {
                result.push_error(format!("{prefix}.name"), "Resource name cannot be empty");
            }

            let id = resource.identity().qualified_id();
            if !seen.insert(id.clone()) {
                result.push_error(format!("{prefix}.name"), format!("Duplicate resource: {id}"));
            }

            if resource.namespace.as_deref().is_some_and(str::is_empty) {
                result.push_error(format!("{prefix}.namespace"), "Namespace cannot be empty when set");
            }
        }
    }

    /// Validates the report sink.
    fn validate_reports(reports: &ReportsConfig, result: &mut ValidationResult) {
        match reports.backend {
            ReportBackend::S3 => {
                if reports.bucket.as_ref().is_none_or(String::is_empty) {
                    result.push_error("reports.bucket", "S3 bucket name is required when using S3 backend");
                }
            }
            ReportBackend::Local => {
                // Local backend is always valid
            }
        }
    }

    /// Validates a single glob.
    fn validate_glob(pattern: &str, field: &str, result: &mut ValidationResult) {
        if let Err(e) = PathGlob::new(pattern) {
            result.push_error(field, e.to_string());
        }
    }
}

impl ValidationResult {
    fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
