//! Remediation executors.
//!
//! The executor is the seam to whatever actually fixes drift: a GitOps
//! bot, an approval queue, a pager. The coordinator only sees this trait.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::RemediationDispatchError;
use crate::report::{DriftReport, RemediationAction};

/// Result reported by an executor for a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The action was carried out.
    Succeeded,
    /// The action was attempted and failed.
    Failed(String),
}

/// Carries out remediation actions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemediationExecutor: Send + Sync {
    /// Executes `action` for `report`.
    ///
    /// An `Err` means the executor could not be reached at all; a reachable
    /// executor that tried and failed returns `ExecutionResult::Failed`.
    async fn execute(
        &self,
        action: RemediationAction,
        report: &DriftReport,
    ) -> Result<ExecutionResult, RemediationDispatchError>;
}

/// Dry-run executor that logs the intended action and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

impl LoggingExecutor {
    /// Creates a logging executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemediationExecutor for LoggingExecutor {
    async fn execute(
        &self,
        action: RemediationAction,
        report: &DriftReport,
    ) -> Result<ExecutionResult, RemediationDispatchError> {
        let paths: Vec<String> = report.diffs().iter().map(|d| d.path.to_string()).collect();

        match action {
            RemediationAction::OpenApproval => warn!(
                resource = %report.resource(),
                severity = %report.severity(),
                "[dry-run] Would open approval for {} drifted paths: {}",
                paths.len(),
                paths.join(", ")
            ),
            _ => info!(
                resource = %report.resource(),
                severity = %report.severity(),
                "[dry-run] Would {action} {} drifted paths: {}",
                paths.len(),
                paths.join(", ")
            ),
        }

        Ok(ExecutionResult::Succeeded)
    }
}
