//! Remediation records.
//!
//! One record exists per drift fingerprint. Within a cycle a record only
//! moves forward (`Pending → InProgress → Succeeded | Failed`); a new cycle
//! starts from `Failed`, or from `Succeeded` once the suppression window
//! has elapsed, and resets the status to `Pending`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{DriftGuardError, Result};
use crate::report::RemediationAction;

/// Current version of the persisted record format.
pub const RECORDS_VERSION: &str = "1";

/// Status of a remediation record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    /// Seen, not yet dispatched.
    Pending,
    /// Dispatched to the executor, awaiting the result.
    InProgress,
    /// The executor reported success.
    Succeeded,
    /// The executor failed, timed out, or the attempt went stale.
    Failed,
    /// A sighting that triggered no action.
    ///
    /// Part of the persisted status vocabulary so tables from other writers
    /// load. The coordinator never stores it: a suppressed sighting leaves the
    /// record in its cycle status and bumps `suppressed_count`.
    Suppressed,
}

/// Remediation state of one drift fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemediationRecord {
    /// Drift fingerprint.
    pub fingerprint: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Current status.
    pub status: RemediationStatus,
    /// Number of dispatches so far.
    pub attempt_count: u32,
    /// First sighting.
    pub first_seen: DateTime<Utc>,
    /// Latest sighting.
    pub last_seen: DateTime<Utc>,
    /// When the current attempt was dispatched.
    #[serde(default)]
    pub in_progress_since: Option<DateTime<Utc>>,
    /// When the last attempt finished.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Action of the last attempt.
    #[serde(default)]
    pub last_action: Option<RemediationAction>,
    /// Failure reason of the last attempt.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Sightings suppressed so far.
    #[serde(default)]
    pub suppressed_count: u32,
}

/// Persisted record table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTable {
    /// Format version.
    pub version: String,
    /// When the table was last written.
    pub updated_at: DateTime<Utc>,
    /// Records, ordered by fingerprint.
    pub records: Vec<RemediationRecord>,
}

impl RemediationStatus {
    /// Returns true if `next` is a legal forward move within a cycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Suppressed)
                | (Self::InProgress, Self::Succeeded | Self::Failed)
        )
    }

    /// Returns true if the current cycle has finished.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns the stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

impl RemediationRecord {
    /// Creates a pending record for a first sighting.
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, resource_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            resource_id: resource_id.into(),
            status: RemediationStatus::Pending,
            attempt_count: 0,
            first_seen: now,
            last_seen: now,
            in_progress_since: None,
            completed_at: None,
            last_action: None,
            last_error: None,
            suppressed_count: 0,
        }
    }

    fn transition(&mut self, next: RemediationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DriftGuardError::internal(format!(
                "Illegal remediation transition {} -> {next} for {}",
                self.status, self.fingerprint
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Marks the record dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error unless the record is pending.
    pub fn start_attempt(&mut self, action: RemediationAction, now: DateTime<Utc>) -> Result<()> {
        self.transition(RemediationStatus::InProgress)?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.in_progress_since = Some(now);
        self.completed_at = None;
        self.last_action = Some(action);
        self.last_error = None;
        Ok(())
    }

    /// Marks the current attempt succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error unless the record is in progress.
    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RemediationStatus::Succeeded)?;
        self.in_progress_since = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Marks the current attempt failed.
    ///
    /// # Errors
    ///
    /// Returns an error unless the record is in progress.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(RemediationStatus::Failed)?;
        self.in_progress_since = None;
        self.completed_at = Some(now);
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Starts a new cycle from a finished one.
    ///
    /// # Errors
    ///
    /// Returns an error unless the current cycle has finished.
    pub fn begin_cycle(&mut self) -> Result<()> {
        if !self.status.is_finished() {
            return Err(DriftGuardError::internal(format!(
                "Cannot start a new cycle for {} while {}",
                self.fingerprint, self.status
            )));
        }
        self.status = RemediationStatus::Pending;
        Ok(())
    }

    /// Counts a suppressed sighting.
    pub const fn note_suppressed(&mut self) {
        self.suppressed_count = self.suppressed_count.saturating_add(1);
    }

    /// Returns true if the record succeeded less than `window` ago.
    #[must_use]
    pub fn within_suppression_window(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == RemediationStatus::Succeeded
            && self
                .completed_at
                .is_some_and(|done| now < done + chrono_duration(window))
    }

    /// Returns true if the record has been in progress for at least `stale_after`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == RemediationStatus::InProgress
            && self
                .in_progress_since
                .is_some_and(|since| now >= since + chrono_duration(stale_after))
    }
}

impl RecordTable {
    /// Creates a table from records, ordered by fingerprint.
    #[must_use]
    pub fn new(mut records: Vec<RemediationRecord>) -> Self {
        records.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Self {
            version: String::from(RECORDS_VERSION),
            updated_at: Utc::now(),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_forward_transitions_only() {
        use RemediationStatus::{Failed, InProgress, Pending, Succeeded, Suppressed};

        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Suppressed));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Succeeded.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Succeeded));
    }

    #[test]
    fn test_persisted_suppressed_status_loads() {
        let status: RemediationStatus = serde_json::from_str("\"suppressed\"").unwrap();
        assert_eq!(status, RemediationStatus::Suppressed);
        assert_eq!(status.as_str(), "suppressed");
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut record = RemediationRecord::new("fp", "aws_instance.web", at(0));
        record.start_attempt(RemediationAction::Alert, at(1)).unwrap();
        assert_eq!(record.status, RemediationStatus::InProgress);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.in_progress_since, Some(at(1)));

        record.fail("executor down", at(2)).unwrap();
        assert_eq!(record.status, RemediationStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("executor down"));

        record.begin_cycle().unwrap();
        record.start_attempt(RemediationAction::Alert, at(3)).unwrap();
        record.succeed(at(4)).unwrap();
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.completed_at, Some(at(4)));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut record = RemediationRecord::new("fp", "aws_instance.web", at(0));
        assert!(record.succeed(at(1)).is_err());
        assert!(record.begin_cycle().is_err());

        record.start_attempt(RemediationAction::Alert, at(1)).unwrap();
        assert!(record.start_attempt(RemediationAction::Alert, at(2)).is_err());
    }

    #[test]
    fn test_suppression_window() {
        let mut record = RemediationRecord::new("fp", "aws_instance.web", at(0));
        record.start_attempt(RemediationAction::AutoRemediate, at(0)).unwrap();
        record.succeed(at(10)).unwrap();

        let window = Duration::from_secs(60);
        assert!(record.within_suppression_window(at(30), window));
        assert!(!record.within_suppression_window(at(70), window));
    }

    #[test]
    fn test_staleness() {
        let mut record = RemediationRecord::new("fp", "aws_instance.web", at(0));
        let stale_after = Duration::from_secs(100);
        assert!(!record.is_stale(at(1000), stale_after));

        record.start_attempt(RemediationAction::OpenApproval, at(0)).unwrap();
        assert!(!record.is_stale(at(99), stale_after));
        assert!(record.is_stale(at(100), stale_after));
    }

    #[test]
    fn test_record_serialization() {
        let record = RemediationRecord::new("fp", "aws_instance.web", at(0));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "pending");

        let back: RemediationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
