//! Structured audit events.
//!
//! Every per-resource error and every remediation decision produces one
//! event, written to the report store next to the reports themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an audit event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Desired or live state could not be collected.
    CollectionFailed,
    /// A state tree was malformed.
    StateTreeInvalid,
    /// A report could not be persisted.
    ReportStoreFailed,
    /// A remediation action was dispatched to the executor.
    Dispatched,
    /// The executor reported success.
    Succeeded,
    /// The executor failed or timed out.
    Failed,
    /// A repeated sighting triggered no action.
    Suppressed,
    /// Another remediation for the same resource is in flight.
    Deferred,
    /// The decided action was `ignore`; nothing was dispatched.
    Recorded,
    /// The dispatch was abandoned on shutdown.
    Abandoned,
    /// A stale in-progress record was forced to failed.
    StaleSwept,
}

/// A single audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: AuditEventKind,
    /// Resource identifier.
    pub resource_id: String,
    /// Drift fingerprint, when the event concerns a report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Decided action, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Short error kind, for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    /// Creates an event for a resource.
    #[must_use]
    pub fn new(kind: AuditEventKind, resource_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            resource_id: resource_id.into(),
            fingerprint: None,
            action: None,
            error_kind: None,
            message: None,
        }
    }

    /// Attaches a fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Attaches the decided action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attaches an error kind and message.
    #[must_use]
    pub fn with_error(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self.message = Some(message.into());
        self
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
