//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DriftGuardConfig, ValidationResult};
use crate::detector::{ResourceStatus, RunSummary};
use crate::metrics::MetricsSnapshot;
use crate::remediation::{RemediationRecord, RemediationStatus};
use crate::report::{DriftReport, RemediationAction, ResourceIdentity, Severity};
use crate::tree::StateValue;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Diff entry row for table display.
#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Desired")]
    desired: String,
    #[tabled(rename = "Live")]
    live: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Rule")]
    rule: String,
}

/// Resource result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Remediation record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Suppressed")]
    suppressed: u32,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DriftGuardConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ValidationJson {
                valid: result.is_valid(),
                errors: result
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect(),
                warnings: &result.warnings,
                environments: config.environments.len(),
                resources: config.resources.len(),
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let rules = &config.drift_rules;
                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "   Project: {}", config.project.name);
                let _ = writeln!(output, "   Environment: {}", config.project.environment);
                let _ = writeln!(output, "   Environments: {}", config.environments.len());
                let _ = writeln!(
                    output,
                    "   Rules: {} ignore, {} info, {} warning, {} critical",
                    rules.ignore.len(),
                    rules.info.len(),
                    rules.warning.len(),
                    rules.critical.len()
                );
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                output
            }
        }
    }

    /// Formats the result of checking one resource.
    #[must_use]
    pub fn format_report(&self, resource: &ResourceIdentity, report: Option<&DriftReport>) -> String {
        match (self.format, report) {
            (OutputFormat::Json, Some(report)) => {
                serde_json::to_string_pretty(&report.to_json_view()).unwrap_or_default()
            }
            (OutputFormat::Json, None) => serde_json::to_string_pretty(&serde_json::json!({
                "resource_id": resource.qualified_id(),
                "drift": false,
            }))
            .unwrap_or_default(),
            (OutputFormat::Text, None) => {
                format!("{} No drift detected for {resource}.\n", "✓".green())
            }
            (OutputFormat::Text, Some(report)) => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &DriftReport) -> String {
        let mut output = format!(
            "{} Drift detected for {} in {}\n",
            "⚠".yellow(),
            report.resource(),
            report.environment()
        );
        let _ = writeln!(output, "   Fingerprint: {}", Self::truncate(report.id(), 16));
        let _ = writeln!(output, "   Severity: {}", Self::format_severity(report.severity()));
        let _ = write!(
            output,
            "   Action: {}\n\n",
            Self::format_action(report.decided_action())
        );

        let rows: Vec<DiffRow> = report
            .diffs()
            .iter()
            .zip(report.classifications())
            .map(|(entry, class)| DiffRow {
                path: entry.path.to_string(),
                kind: entry.kind.to_string(),
                desired: Self::format_value(entry.desired_value.as_ref()),
                live: Self::format_value(entry.live_value.as_ref()),
                severity: Self::format_severity(class.severity),
                rule: class
                    .rule
                    .clone()
                    .or_else(|| class.evaluator.as_ref().map(|e| format!("evaluator:{e}")))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats a detection run summary with its metrics.
    #[must_use]
    pub fn format_summary(&self, summary: &RunSummary, metrics: &MetricsSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&SummaryJson { summary, metrics })
                .unwrap_or_default(),
            OutputFormat::Text => Self::format_summary_text(summary, metrics),
        }
    }

    /// Formats a run summary as text.
    fn format_summary_text(summary: &RunSummary, metrics: &MetricsSnapshot) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nDetection run {} ({})\n\n",
            Self::truncate(&summary.run_id, 8),
            summary.environment
        );

        if !summary.swept.is_empty() {
            let _ = writeln!(
                output,
                "{} Swept {} stale remediation(s)\n",
                "⚠".yellow(),
                summary.swept.len()
            );
        }

        if summary.results.is_empty() {
            output.push_str("   No resources configured.\n");
            return output;
        }

        let rows: Vec<ResultRow> = summary
            .results
            .iter()
            .map(|r| {
                let (status, severity, action, outcome) = match &r.status {
                    ResourceStatus::Clean => (
                        "clean".green().to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        "-".to_string(),
                    ),
                    ResourceStatus::Drifted {
                        severity,
                        action,
                        entries,
                        outcome,
                        ..
                    } => (
                        format!("drifted ({entries})").yellow().to_string(),
                        Self::format_severity(*severity),
                        Self::format_action(*action),
                        outcome.to_string(),
                    ),
                    ResourceStatus::Failed {
                        error_kind,
                        message,
                    } => (
                        "failed".red().to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        Self::truncate(&format!("{error_kind}: {message}"), 40),
                    ),
                    ResourceStatus::Cancelled => (
                        "cancelled".dimmed().to_string(),
                        "-".to_string(),
                        "-".to_string(),
                        "-".to_string(),
                    ),
                };

                ResultRow {
                    resource: r.resource_id.clone(),
                    status,
                    severity,
                    action,
                    outcome,
                }
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let highest = summary
            .highest_severity()
            .map_or_else(|| "none".green().to_string(), Self::format_severity);

        let _ = write!(
            output,
            "\nRun: {} clean, {} drifted, {} failed, {} cancelled (highest severity: {highest})\n",
            summary.clean().to_string().green(),
            summary.drifted().to_string().yellow(),
            summary.failed().to_string().red(),
            summary.cancelled()
        );

        if !metrics.remediation_outcomes.is_empty() {
            output.push_str("\nRemediation outcomes:\n");
            for (outcome, count) in &metrics.remediation_outcomes {
                let _ = writeln!(output, "   {outcome}: {count}");
            }
        }

        if !metrics.errors_by_kind.is_empty() {
            output.push_str("\nErrors:\n");
            for (kind, count) in &metrics.errors_by_kind {
                let _ = writeln!(output, "   {kind}: {count}");
            }
        }

        output
    }

    /// Formats the remediation record table.
    #[must_use]
    pub fn format_records(&self, records: &[RemediationRecord]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
            OutputFormat::Text => {
                if records.is_empty() {
                    return "   No remediation records.\n".to_string();
                }

                let rows: Vec<RecordRow> = records
                    .iter()
                    .map(|r| RecordRow {
                        fingerprint: Self::truncate(&r.fingerprint, 12),
                        resource: r.resource_id.clone(),
                        status: Self::format_status(r.status),
                        attempts: r.attempt_count,
                        suppressed: r.suppressed_count,
                        last_seen: r.last_seen.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the fingerprints swept to failed.
    #[must_use]
    pub fn format_swept(&self, swept: &[String]) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&serde_json::json!({ "swept": swept }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => {
                if swept.is_empty() {
                    return format!("{} No stale remediations.\n", "✓".green());
                }
                let mut output = format!(
                    "{} Marked {} stale remediation(s) as failed:\n",
                    "⚠".yellow(),
                    swept.len()
                );
                for fingerprint in swept {
                    let _ = writeln!(output, "   - {fingerprint}");
                }
                output
            }
        }
    }

    /// Formats a severity with color.
    fn format_severity(severity: Severity) -> String {
        match severity {
            Severity::Info => "info".dimmed().to_string(),
            Severity::Warning => "warning".yellow().to_string(),
            Severity::Critical => "critical".red().to_string(),
        }
    }

    /// Formats a remediation action with color.
    fn format_action(action: RemediationAction) -> String {
        match action {
            RemediationAction::Ignore => "ignore".dimmed().to_string(),
            RemediationAction::Alert => "alert".yellow().to_string(),
            RemediationAction::AutoRemediate => "auto_remediate".green().to_string(),
            RemediationAction::OpenApproval => "open_approval".red().to_string(),
        }
    }

    /// Formats a record status with color.
    fn format_status(status: RemediationStatus) -> String {
        match status {
            RemediationStatus::Succeeded => status.as_str().green().to_string(),
            RemediationStatus::Failed => status.as_str().red().to_string(),
            RemediationStatus::InProgress => status.as_str().yellow().to_string(),
            RemediationStatus::Pending | RemediationStatus::Suppressed => {
                status.as_str().dimmed().to_string()
            }
        }
    }

    /// Formats an optional value for a table cell.
    fn format_value(value: Option<&StateValue>) -> String {
        value.map_or_else(|| "-".to_string(), |v| Self::truncate(&v.to_string(), 30))
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    errors: Vec<String>,
    warnings: &'a [String],
    environments: usize,
    resources: usize,
}

#[derive(Serialize)]
struct SummaryJson<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    metrics: &'a MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ResourceResult;
    use crate::remediation::RemediationOutcome;
    use chrono::Utc;

    fn summary() -> RunSummary {
        RunSummary {
            run_id: "3f2a9c1e-0000-0000-0000-000000000000".to_string(),
            environment: "prod".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            swept: Vec::new(),
            results: vec![
                ResourceResult {
                    resource_id: "aws_instance.web".to_string(),
                    status: ResourceStatus::Clean,
                },
                ResourceResult {
                    resource_id: "aws_security_group.edge".to_string(),
                    status: ResourceStatus::Drifted {
                        report_id: "abc".to_string(),
                        severity: Severity::Critical,
                        action: RemediationAction::OpenApproval,
                        entries: 2,
                        outcome: RemediationOutcome::Succeeded,
                    },
                },
            ],
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("0123456789abcdef", 8), "01234...");
    }

    #[test]
    fn test_summary_json_is_flat() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_summary(&summary(), &MetricsSnapshot::default());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["environment"], "prod");
        assert_eq!(value["results"].as_array().unwrap().len(), 2);
        assert_eq!(value["results"][1]["status"]["drifted"]["severity"], "critical");
        assert!(value["metrics"].is_object());
    }

    #[test]
    fn test_summary_text_lists_resources() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_summary(&summary(), &MetricsSnapshot::default());

        assert!(output.contains("aws_instance.web"));
        assert!(output.contains("aws_security_group.edge"));
        assert!(output.contains("prod"));
    }

    #[test]
    fn test_no_drift_report() {
        let resource = ResourceIdentity::new("aws_instance", "web");
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&resource, None);
        assert!(text.contains("No drift detected"));

        let json = OutputFormatter::new(OutputFormat::Json).format_report(&resource, None);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["drift"], false);
        assert_eq!(value["resource_id"], "aws_instance.web");
    }
}
