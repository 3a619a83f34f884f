//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DriftGuard - infrastructure drift detection and remediation decisions.
#[derive(Parser, Debug)]
#[command(name = "driftguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the policy configuration file.
    #[arg(short, long, global = true, env = "DRIFTGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the policy configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Diff two snapshot files for one resource and print the classified report.
    Check {
        /// Resource identifier (`<type>.<name>`).
        resource: String,

        /// Desired state snapshot (JSON or YAML).
        #[arg(long)]
        desired: PathBuf,

        /// Live state snapshot (JSON or YAML).
        #[arg(long)]
        live: PathBuf,

        /// Kubernetes namespace of the resource.
        #[arg(short, long)]
        namespace: Option<String>,

        /// Environment to evaluate (defaults to `project.environment`).
        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Run a full detection cycle over the configured resources.
    Run {
        /// Environment to evaluate (defaults to `project.environment`).
        #[arg(short, long)]
        environment: Option<String>,

        /// Only check these resource identifiers.
        #[arg(short, long = "resource")]
        resources: Vec<String>,
    },

    /// Show the remediation record table.
    Records,

    /// Force stale in-progress remediations to failed.
    Sweep,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_command() {
        let cli = Cli::try_parse_from([
            "driftguard",
            "--output",
            "json",
            "check",
            "k8s_deployment.api",
            "--desired",
            "desired.json",
            "--live",
            "live.yaml",
            "-n",
            "web",
        ])
        .unwrap();

        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::Check {
                resource,
                namespace,
                environment,
                ..
            } => {
                assert_eq!(resource, "k8s_deployment.api");
                assert_eq!(namespace.as_deref(), Some("web"));
                assert!(environment.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_with_resource_filter() {
        let cli = Cli::try_parse_from([
            "driftguard",
            "run",
            "-e",
            "prod",
            "-r",
            "aws_instance.web",
            "-r",
            "aws_instance.db",
            "--log-json",
        ])
        .unwrap();

        assert!(cli.log_json);
        match cli.command {
            Commands::Run {
                environment,
                resources,
            } => {
                assert_eq!(environment.as_deref(), Some("prod"));
                assert_eq!(resources, vec!["aws_instance.web", "aws_instance.db"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
