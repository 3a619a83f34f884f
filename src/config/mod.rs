//! Configuration module for DriftGuard.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `driftguard.yaml`
//! - Environment variable overrides
//! - Validation of configuration values
//! - Compiling rules and environment policies

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_ENVIRONMENT, ENV_REPORT_BUCKET, ENV_REPORT_PREFIX,
    ENV_SNAPSHOT_DIR, find_config_file,
};
pub use spec::{
    AutoRemediateConfig, CoordinatorConfig, DetectionConfig, DriftGuardConfig,
    DriftRulesConfig, EnvironmentConfig, ProjectConfig, RecordsConfig, ReportBackend,
    ReportsConfig, ResourceConfig, RuleConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
