//! Report store trait definition.
//!
//! This module defines the common interface for report sinks. Reports and
//! audit events are append-only: stores never update or delete them.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

use super::audit::AuditEvent;
use super::types::DriftReport;

/// Trait for report sinks.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Appends a drift report.
    async fn put_report(&self, report: &DriftReport) -> Result<()>;

    /// Appends an audit event.
    async fn put_event(&self, event: &AuditEvent) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// In-memory report store, for embedders that consume reports directly and for tests.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<DriftReport>>,
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryReportStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all stored reports in insertion order.
    #[must_use]
    pub fn reports(&self) -> Vec<DriftReport> {
        self.reports.lock().clone()
    }

    /// Returns a copy of all stored events in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn put_report(&self, report: &DriftReport) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }

    async fn put_event(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
