//! Drift reports and report sinks.
//!
//! This module provides:
//! - Report, diff entry and classification types
//! - Drift fingerprinting
//! - Structured audit events
//! - Report stores (memory, local JSON lines, S3)

mod audit;
mod fingerprint;
mod local;
mod s3;
mod store;
mod types;

pub use audit::{AuditEvent, AuditEventKind};
pub use fingerprint::Fingerprinter;
pub use local::{LocalReportStore, REPORT_DIR};
pub use s3::S3ReportStore;
pub use store::{MemoryReportStore, ReportStore};
pub use types::{
    DiffEntry, DiffEntryJson, DiffKind, DriftReport, EntryClassification, RemediationAction,
    ReportJson, ResourceIdentity, ResourceUniverse, Severity, Tier,
};
