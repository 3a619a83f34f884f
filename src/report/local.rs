//! Local file-based report store.
//!
//! Reports and audit events are appended as JSON lines to two files in a
//! report directory. Existing lines are never rewritten.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DriftGuardError, Result, StoreError};

use super::audit::AuditEvent;
use super::store::ReportStore;
use super::types::DriftReport;

/// Default report directory name.
pub const REPORT_DIR: &str = ".driftguard/reports";

/// Report file name.
const REPORTS_FILE: &str = "reports.jsonl";

/// Audit event file name.
const EVENTS_FILE: &str = "events.jsonl";

/// Local JSON-lines report store.
#[derive(Debug)]
pub struct LocalReportStore {
    /// Base directory for report files.
    base_dir: PathBuf,
    /// Serializes appends from concurrent tasks.
    write_lock: Mutex<()>,
}

impl LocalReportStore {
    /// Creates a store writing into `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the report file path.
    #[must_use]
    pub fn reports_path(&self) -> PathBuf {
        self.base_dir.join(REPORTS_FILE)
    }

    /// Returns the audit event file path.
    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.base_dir.join(EVENTS_FILE)
    }

    /// Ensures the report directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating report directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StoreError::write_failed("local", format!("Failed to create report directory: {e}")))?;
        }
        Ok(())
    }

    /// Appends one JSON line to `path`.
    async fn append<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize record: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StoreError::write_failed("local", format!("Failed to open {}: {e}", path.display())))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::write_failed("local", format!("Failed to append to {}: {e}", path.display())))?;

        file.sync_all()
            .await
            .map_err(|e| StoreError::write_failed("local", format!("Failed to sync {}: {e}", path.display())))?;

        Ok(())
    }

    /// Reads back all lines of a JSON-lines file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not valid JSON.
    pub async fn read_lines(path: &Path) -> Result<Vec<serde_json::Value>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| StoreError::Corrupted {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    DriftGuardError::from(StoreError::Corrupted {
                        message: format!("Invalid line in {}: {e}", path.display()),
                    })
                })
            })
            .collect()
    }
}

#[async_trait]
impl ReportStore for LocalReportStore {
    async fn put_report(&self, report: &DriftReport) -> Result<()> {
        debug!("Appending report {} to {}", report.id(), self.reports_path().display());
        self.append(&self.reports_path(), report).await
    }

    async fn put_event(&self, event: &AuditEvent) -> Result<()> {
        self.append(&self.events_path(), event).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::audit::AuditEventKind;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalReportStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalReportStore::with_base_dir(temp_dir.path().join("reports"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_events_are_appended() {
        let (store, _temp) = create_test_store();

        store
            .put_event(&AuditEvent::new(AuditEventKind::Dispatched, "aws_instance.web"))
            .await
            .expect("Failed to write event");
        store
            .put_event(&AuditEvent::new(AuditEventKind::Succeeded, "aws_instance.web"))
            .await
            .expect("Failed to write event");

        let lines = LocalReportStore::read_lines(&store.events_path())
            .await
            .expect("Failed to read events");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "dispatched");
        assert_eq!(lines[1]["kind"], "succeeded");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (store, _temp) = create_test_store();
        let lines = LocalReportStore::read_lines(&store.reports_path())
            .await
            .expect("Read should not fail");
        assert!(lines.is_empty());
        assert_eq!(store.backend_type(), "local");
    }
}
