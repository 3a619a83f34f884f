//! Configuration parser for loading policy files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{PolicyConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{DriftGuardConfig, ReportBackend};

/// Environment variable overriding `project.environment`.
pub const ENV_ENVIRONMENT: &str = "DRIFTGUARD_ENVIRONMENT";

/// Environment variable overriding `detection.snapshot_dir`.
pub const ENV_SNAPSHOT_DIR: &str = "DRIFTGUARD_SNAPSHOT_DIR";

/// Environment variable overriding `reports.bucket` (and selecting S3).
pub const ENV_REPORT_BUCKET: &str = "DRIFTGUARD_REPORT_BUCKET";

/// Environment variable overriding `reports.prefix`.
pub const ENV_REPORT_PREFIX: &str = "DRIFTGUARD_REPORT_PREFIX";

/// Configuration parser for loading DriftGuard configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DriftGuardConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(PolicyConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| PolicyConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DriftGuardConfig> {
        debug!("Parsing YAML configuration");

        let config: DriftGuardConfig =
            serde_yaml::from_str(content).map_err(|e| PolicyConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })?;

        debug!(
            "Parsed configuration for project {} ({} resources)",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DriftGuardConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides from a variable lookup.
    ///
    /// Setting a report bucket switches the report backend to S3.
    pub fn apply_overrides<F>(config: &mut DriftGuardConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup(ENV_ENVIRONMENT) {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(dir) = lookup(ENV_SNAPSHOT_DIR) {
            debug!("Overriding detection.snapshot_dir from environment");
            config.detection.snapshot_dir = dir;
        }

        if let Some(bucket) = lookup(ENV_REPORT_BUCKET) {
            debug!("Overriding reports.bucket from environment");
            config.reports.backend = ReportBackend::S3;
            config.reports.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup(ENV_REPORT_PREFIX) {
            debug!("Overriding reports.prefix from environment");
            config.reports.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| PolicyConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "driftguard.yaml",
    "driftguard.yml",
    "policies.yaml",
    "policies.yml",
];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(PolicyConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
project:
  name: platform
  environment: prod

environments:
  - environment: dev
    auto_remediate:
      namespaces: ["*"]
      resources: ["*"]
  - environment: staging
    auto_remediate:
      namespaces: [web, workers]
      resources: ["k8s_deployment.*"]

drift_rules:
  ignore:
    - "*.last_modified"
    - "*.provider_*"
    - "k8s_pod.status.hostIP"
  critical:
    - "aws_security_group.ingress"
    - "aws_iam_role.assume_role_policy"
    - pattern: "k8s_deployment.spec.replicas"
      environment: prod
  escalate_namespaces: [payments]

coordinator:
  suppression_window_secs: 7200

detection:
  max_concurrency: 4
  ordered_paths: ["*.command", "*.args"]

resources:
  - type: aws_security_group
    name: web
  - type: k8s_deployment
    name: api
    namespace: web

reports:
  backend: s3
  bucket: audit-bucket
"#;

    #[test]
    fn test_parse_minimal_config() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml("resources: []\n", None).unwrap();
        assert_eq!(config.project.environment, "dev");
        assert!(config.environments.is_empty());
        assert_eq!(config.coordinator.suppression_window_secs, 3600);
    }

    #[test]
    fn test_parse_full_config() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(FULL_CONFIG, None).unwrap();

        assert_eq!(config.project.environment, "prod");
        assert_eq!(config.environments.len(), 2);
        assert_eq!(config.drift_rules.ignore.len(), 3);
        assert_eq!(config.drift_rules.critical.len(), 3);
        assert_eq!(config.coordinator.suppression_window_secs, 7200);
        assert_eq!(config.coordinator.stale_after_secs, 1800);
        assert_eq!(config.detection.max_concurrency, 4);
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.reports.backend, ReportBackend::S3);

        let policy = config.compile().unwrap();
        assert_eq!(policy.rules.len(), 6);
        assert_eq!(policy.environments.len(), 2);
        assert_eq!(policy.engine().evaluator_names(), vec!["namespace_escalator"]);
    }

    #[test]
    fn test_parse_error_reports_location() {
        let parser = ConfigParser::new();
        let err = parser
            .parse_yaml("environments: {", Some(Path::new("bad.yaml")))
            .unwrap_err();
        assert_eq!(err.kind(), "policy_config");
    }

    #[test]
    fn test_overrides() {
        let mut config = DriftGuardConfig::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_ENVIRONMENT, "staging"),
            (ENV_REPORT_BUCKET, "drift-audit"),
        ]);

        ConfigParser::apply_overrides(&mut config, |name| {
            vars.get(name).map(|v| (*v).to_string())
        });

        assert_eq!(config.project.environment, "staging");
        assert_eq!(config.reports.backend, ReportBackend::S3);
        assert_eq!(config.reports.bucket.as_deref(), Some("drift-audit"));
        assert_eq!(config.detection.snapshot_dir, "snapshots");
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(temp.path().join("driftguard.yaml"), "resources: []\n").unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("driftguard.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let parser = ConfigParser::new();
        let err = parser.load_file("/nonexistent/driftguard.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
