//! In-process detection metrics.
//!
//! Counters are plain maps behind a `parking_lot` mutex; nothing is
//! exported over the network. `snapshot()` produces a serializable copy
//! that the CLI prints after a run.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::report::DriftReport;

/// Upper bounds (milliseconds) of the detection-duration histogram buckets.
pub const DURATION_BUCKETS_MS: &[u64] = &[10, 50, 100, 250, 500, 1_000, 5_000, 30_000];

/// Detection metrics registry.
#[derive(Debug, Default)]
pub struct DriftMetrics {
    inner: Mutex<MetricsSnapshot>,
}

/// Serializable copy of all counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Resources checked.
    pub resources_checked: u64,
    /// Retained drift entries by severity.
    pub drift_entries_by_severity: BTreeMap<String, u64>,
    /// Retained drift entries by resource type.
    pub drift_entries_by_resource_type: BTreeMap<String, u64>,
    /// Reports by decided action.
    pub reports_by_action: BTreeMap<String, u64>,
    /// Remediation outcomes.
    pub remediation_outcomes: BTreeMap<String, u64>,
    /// Errors by kind.
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Detection duration histogram, keyed by bucket upper bound
    /// (`le_<ms>`, with `le_inf` for the overflow bucket).
    pub detection_duration_ms: BTreeMap<String, u64>,
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_default() += 1;
}

fn bucket_label(elapsed: Duration) -> String {
    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    DURATION_BUCKETS_MS
        .iter()
        .find(|bound| ms <= **bound)
        .map_or_else(|| String::from("le_inf"), |bound| format!("le_{bound}"))
}

impl DriftMetrics {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one checked resource and its detection duration.
    pub fn record_resource_checked(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.resources_checked += 1;
        bump(&mut inner.detection_duration_ms, &bucket_label(elapsed));
    }

    /// Counts a report and its retained entries.
    pub fn record_report(&self, report: &DriftReport) {
        let mut inner = self.inner.lock();
        bump(&mut inner.reports_by_action, report.decided_action().as_str());
        for classification in report.classifications() {
            bump(
                &mut inner.drift_entries_by_severity,
                classification.severity.as_str(),
            );
            bump(
                &mut inner.drift_entries_by_resource_type,
                &report.resource().resource_type,
            );
        }
    }

    /// Counts a remediation outcome.
    pub fn record_outcome(&self, outcome: &str) {
        bump(&mut self.inner.lock().remediation_outcomes, outcome);
    }

    /// Counts an error.
    pub fn record_error(&self, kind: &str) {
        bump(&mut self.inner.lock().errors_by_kind, kind);
    }

    /// Returns a copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }
}

impl MetricsSnapshot {
    /// Returns the count for `key` in `map`, zero when absent.
    #[must_use]
    pub fn count(map: &BTreeMap<String, u64>, key: &str) -> u64 {
        map.get(key).copied().unwrap_or_default()
    }
}
