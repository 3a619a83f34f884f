//! Remediation coordination.
//!
//! The coordinator owns the record table. Decisions are taken under a
//! single lock that is never held across an executor or store call, so
//! concurrent sightings of one fingerprint serialize on the table while
//! dispatches for different resources run in parallel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{DriftGuardError, RemediationDispatchError, Result};
use crate::metrics::DriftMetrics;
use crate::report::{AuditEvent, AuditEventKind, DriftReport, ReportStore};

use super::executor::{ExecutionResult, RemediationExecutor};
use super::record::{RemediationRecord, RemediationStatus};

/// Timing settings for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// How long a succeeded fingerprint suppresses new dispatches.
    pub suppression_window: Duration,
    /// Age after which an in-progress record is swept to failed.
    pub stale_after: Duration,
    /// Timeout for a single executor call.
    pub dispatch_timeout: Duration,
}

impl From<&CoordinatorConfig> for CoordinatorSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            suppression_window: config.suppression_window(),
            stale_after: config.stale_after(),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

/// What happened to one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// Dispatched and the executor succeeded.
    Succeeded,
    /// Dispatched and failed, with the reason.
    Failed(String),
    /// Same drift already in progress or recently fixed; nothing dispatched.
    Suppressed,
    /// Another fingerprint of the same resource is in progress.
    Deferred {
        /// Fingerprint of the in-flight remediation.
        blocking: String,
    },
    /// The decided action needs no dispatch.
    Recorded,
    /// Shutdown arrived while the executor call was in flight.
    Abandoned,
}

impl RemediationOutcome {
    /// Returns the stable snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Suppressed => "suppressed",
            Self::Deferred { .. } => "deferred",
            Self::Recorded => "recorded",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RemediationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Deferred { blocking } => write!(f, "deferred behind {blocking}"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

enum Decision {
    Suppressed,
    Deferred(String),
    Recorded,
    Dispatch { attempt: u32 },
}

/// Coordinates remediation dispatch for drift reports.
pub struct RemediationCoordinator {
    records: Mutex<BTreeMap<String, RemediationRecord>>,
    executor: Arc<dyn RemediationExecutor>,
    store: Arc<dyn ReportStore>,
    metrics: Arc<DriftMetrics>,
    settings: CoordinatorSettings,
}

/// Resolves once `shutdown` is set. Never resolves if the sender is gone.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

impl RemediationCoordinator {
    /// Creates a coordinator with an empty record table.
    #[must_use]
    pub fn new(
        executor: Arc<dyn RemediationExecutor>,
        store: Arc<dyn ReportStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            executor,
            store,
            metrics: Arc::new(DriftMetrics::new()),
            settings,
        }
    }

    /// Shares a metrics registry with the caller.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<DriftMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Seeds the table with previously persisted records.
    #[must_use]
    pub fn with_records(mut self, records: impl IntoIterator<Item = RemediationRecord>) -> Self {
        let table = self.records.get_mut();
        for record in records {
            table.insert(record.fingerprint.clone(), record);
        }
        self
    }

    /// Returns the timing settings.
    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Returns the metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<DriftMetrics> {
        &self.metrics
    }

    /// Returns a copy of all records, ordered by fingerprint.
    pub async fn records(&self) -> Vec<RemediationRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Returns a copy of the record for `fingerprint`.
    pub async fn record(&self, fingerprint: &str) -> Option<RemediationRecord> {
        self.records.lock().await.get(fingerprint).cloned()
    }

    /// Persists `report`, then dispatches, suppresses or defers it.
    ///
    /// Never fails: dispatch and store errors are recorded, audited and
    /// counted instead.
    pub async fn process(
        &self,
        report: &DriftReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RemediationOutcome {
        let resource_id = report.resource_id();

        if let Err(e) = self.store.put_report(report).await {
            warn!(resource = %resource_id, "Failed to persist drift report {}: {e}", report.id());
            self.metrics.record_error(e.kind());
            self.audit(
                AuditEvent::new(AuditEventKind::ReportStoreFailed, &resource_id)
                    .with_fingerprint(report.id())
                    .with_error(e.kind(), e.to_string()),
            )
            .await;
        }

        let outcome = match self.decide(report, Utc::now()).await {
            Ok(Decision::Dispatch { attempt }) => self.dispatch(report, attempt, shutdown).await,
            Ok(Decision::Suppressed) => {
                debug!(resource = %resource_id, "Suppressed repeated drift {}", report.id());
                self.audit(Self::event(AuditEventKind::Suppressed, report)).await;
                RemediationOutcome::Suppressed
            }
            Ok(Decision::Deferred(blocking)) => {
                info!(
                    resource = %resource_id,
                    "Deferring {}: remediation {blocking} still in progress",
                    report.id()
                );
                self.audit(
                    Self::event(AuditEventKind::Deferred, report)
                        .with_message(format!("blocked by {blocking}")),
                )
                .await;
                RemediationOutcome::Deferred { blocking }
            }
            Ok(Decision::Recorded) => {
                self.audit(Self::event(AuditEventKind::Recorded, report)).await;
                RemediationOutcome::Recorded
            }
            Err(e) => {
                error!(resource = %resource_id, "Cannot coordinate {}: {e}", report.id());
                self.metrics.record_error(e.kind());
                self.audit(
                    Self::event(AuditEventKind::Failed, report)
                        .with_error(e.kind(), e.to_string()),
                )
                .await;
                RemediationOutcome::Failed(e.to_string())
            }
        };

        self.metrics.record_outcome(outcome.as_str());
        outcome
    }

    /// Forces records in progress for at least `stale_after` to failed.
    ///
    /// Returns the swept fingerprints.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let swept: Vec<(String, String, String)> = {
            let mut records = self.records.lock().await;
            records
                .values_mut()
                .filter(|record| record.is_stale(now, self.settings.stale_after))
                .filter_map(|record| {
                    let since = record.in_progress_since?;
                    let reason = RemediationDispatchError::Stale {
                        since: since.to_rfc3339(),
                    }
                    .to_string();
                    record.fail(reason.clone(), now).ok()?;
                    Some((record.fingerprint.clone(), record.resource_id.clone(), reason))
                })
                .collect()
        };

        for (fingerprint, resource_id, reason) in &swept {
            warn!(resource = %resource_id, "Swept stale remediation {fingerprint}: {reason}");
            self.metrics.record_outcome("stale_swept");
            self.audit(
                AuditEvent::new(AuditEventKind::StaleSwept, resource_id)
                    .with_fingerprint(fingerprint)
                    .with_message(reason.clone()),
            )
            .await;
        }

        swept.into_iter().map(|(fingerprint, _, _)| fingerprint).collect()
    }

    async fn decide(&self, report: &DriftReport, now: DateTime<Utc>) -> Result<Decision> {
        let resource_id = report.resource_id();
        let mut records = self.records.lock().await;

        let blocking = records
            .values()
            .find(|r| {
                r.resource_id == resource_id
                    && r.fingerprint != report.id()
                    && r.status == RemediationStatus::InProgress
            })
            .map(|r| r.fingerprint.clone());

        let record = records
            .entry(report.id().to_string())
            .or_insert_with(|| RemediationRecord::new(report.id(), &resource_id, now));
        record.last_seen = now;

        if record.status == RemediationStatus::InProgress
            || record.within_suppression_window(now, self.settings.suppression_window)
        {
            record.note_suppressed();
            return Ok(Decision::Suppressed);
        }

        if record.status.is_finished() {
            record.begin_cycle()?;
        }

        if let Some(blocking) = blocking {
            return Ok(Decision::Deferred(blocking));
        }

        let action = report.decided_action();
        if !action.is_dispatched() {
            return Ok(Decision::Recorded);
        }

        record.start_attempt(action, now)?;
        Ok(Decision::Dispatch {
            attempt: record.attempt_count,
        })
    }

    async fn dispatch(
        &self,
        report: &DriftReport,
        attempt: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RemediationOutcome {
        let action = report.decided_action();
        let resource_id = report.resource_id();

        info!(
            resource = %resource_id,
            severity = %report.severity(),
            "Dispatching {action} for drift {} (attempt {attempt})",
            report.id()
        );
        self.audit(Self::event(AuditEventKind::Dispatched, report)).await;

        let timeout = self.settings.dispatch_timeout;
        let call = tokio::time::timeout(timeout, self.executor.execute(action, report));

        let result = tokio::select! {
            biased;
            () = shutdown_signalled(shutdown) => None,
            result = call => Some(result),
        };

        let Some(result) = result else {
            warn!(resource = %resource_id, "Shutdown requested, abandoning remediation {}", report.id());
            self.audit(Self::event(AuditEventKind::Abandoned, report)).await;
            return RemediationOutcome::Abandoned;
        };

        let failure = match result {
            Ok(Ok(ExecutionResult::Succeeded)) => None,
            Ok(Ok(ExecutionResult::Failed(reason))) => Some(RemediationDispatchError::Rejected {
                action: action.to_string(),
                reason,
            }),
            Ok(Err(e)) => Some(e),
            Err(_) => Some(RemediationDispatchError::TimedOut {
                timeout_secs: timeout.as_secs(),
            }),
        };

        self.complete(report.id(), attempt, failure.as_ref()).await;

        match failure {
            None => {
                info!(resource = %resource_id, "Remediation {} succeeded", report.id());
                self.audit(Self::event(AuditEventKind::Succeeded, report)).await;
                RemediationOutcome::Succeeded
            }
            Some(e) => {
                let err = DriftGuardError::from(e);
                error!(resource = %resource_id, "Remediation {} failed: {err}", report.id());
                self.metrics.record_error(err.kind());
                self.audit(
                    Self::event(AuditEventKind::Failed, report)
                        .with_error(err.kind(), err.to_string()),
                )
                .await;
                RemediationOutcome::Failed(err.to_string())
            }
        }
    }

    async fn complete(
        &self,
        fingerprint: &str,
        attempt: u32,
        failure: Option<&RemediationDispatchError>,
    ) {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let Some(record) = records.get_mut(fingerprint) else {
            return;
        };
        if record.status != RemediationStatus::InProgress || record.attempt_count != attempt {
            debug!("Ignoring late completion of {fingerprint} attempt {attempt}");
            return;
        }

        let result = match failure {
            None => record.succeed(now),
            Some(e) => record.fail(e.to_string(), now),
        };
        if let Err(e) = result {
            error!("{e}");
        }
    }

    fn event(kind: AuditEventKind, report: &DriftReport) -> AuditEvent {
        AuditEvent::new(kind, report.resource_id())
            .with_fingerprint(report.id())
            .with_action(report.decided_action().as_str())
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.store.put_event(&event).await {
            warn!(kind = ?event.kind, "Failed to write audit event: {e}");
            self.metrics.record_error(e.kind());
        }
    }
}

impl fmt::Debug for RemediationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemediationCoordinator")
            .field("settings", &self.settings)
            .field("store", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::remediation::executor::MockRemediationExecutor;
    use crate::report::{MemoryReportStore, RemediationAction, ResourceIdentity, Severity};
    use async_trait::async_trait;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn report(fingerprint: &str, name: &str, action: RemediationAction) -> DriftReport {
        DriftReport::new(
            fingerprint.to_string(),
            ResourceIdentity::new("aws_instance", name),
            String::from("dev"),
            Utc::now(),
            Vec::new(),
            Vec::new(),
            Severity::Warning,
            action,
        )
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            suppression_window: Duration::from_secs(3600),
            stale_after: Duration::from_secs(1800),
            dispatch_timeout: Duration::from_secs(5),
        }
    }

    fn succeeding(times: usize) -> MockRemediationExecutor {
        let mut executor = MockRemediationExecutor::new();
        executor
            .expect_execute()
            .times(times)
            .returning(|_, _| Ok(ExecutionResult::Succeeded));
        executor
    }

    /// Executor that sleeps before succeeding and counts calls.
    #[derive(Debug, Default)]
    struct SlowExecutor {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemediationExecutor for SlowExecutor {
        async fn execute(
            &self,
            _: RemediationAction,
            _: &DriftReport,
        ) -> std::result::Result<ExecutionResult, RemediationDispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ExecutionResult::Succeeded)
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl ReportStore for BrokenStore {
        async fn put_report(&self, _: &DriftReport) -> Result<()> {
            Err(StoreError::write_failed("broken", "disk full").into())
        }

        async fn put_event(&self, _: &AuditEvent) -> Result<()> {
            Err(StoreError::write_failed("broken", "disk full").into())
        }

        fn backend_type(&self) -> &'static str {
            "broken"
        }
    }

    fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_repeated_sightings_dispatch_once() {
        let store = Arc::new(MemoryReportStore::new());
        let coordinator =
            RemediationCoordinator::new(Arc::new(succeeding(1)), store.clone(), settings());
        let (_tx, mut rx) = channel();
        let drift = report("fp-1", "web", RemediationAction::AutoRemediate);

        assert_eq!(coordinator.process(&drift, &mut rx).await, RemediationOutcome::Succeeded);
        for _ in 0..4 {
            assert_eq!(coordinator.process(&drift, &mut rx).await, RemediationOutcome::Suppressed);
        }

        let record = coordinator.record("fp-1").await.unwrap();
        assert_eq!(record.status, RemediationStatus::Succeeded);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.suppressed_count, 4);

        // Every sighting is persisted, suppressed ones included.
        assert_eq!(store.reports().len(), 5);
        let kinds: Vec<AuditEventKind> = store.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds[..2], [AuditEventKind::Dispatched, AuditEventKind::Succeeded]);
        assert_eq!(kinds.len(), 6);
    }

    #[tokio::test]
    async fn test_failed_remediation_is_retried() {
        let mut executor = MockRemediationExecutor::new();
        let mut seq = Sequence::new();
        executor
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ExecutionResult::Failed(String::from("merge conflict"))));
        executor
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ExecutionResult::Succeeded));

        let store = Arc::new(MemoryReportStore::new());
        let coordinator = RemediationCoordinator::new(Arc::new(executor), store, settings());
        let (_tx, mut rx) = channel();
        let drift = report("fp-1", "web", RemediationAction::OpenApproval);

        let first = coordinator.process(&drift, &mut rx).await;
        assert!(matches!(&first, RemediationOutcome::Failed(reason) if reason.contains("merge conflict")));
        assert_eq!(
            coordinator.record("fp-1").await.unwrap().status,
            RemediationStatus::Failed
        );

        assert_eq!(coordinator.process(&drift, &mut rx).await, RemediationOutcome::Succeeded);
        assert_eq!(coordinator.record("fp-1").await.unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_success_outside_window_starts_new_cycle() {
        let mut no_window = settings();
        no_window.suppression_window = Duration::ZERO;

        let coordinator = RemediationCoordinator::new(
            Arc::new(succeeding(2)),
            Arc::new(MemoryReportStore::new()),
            no_window,
        );
        let (_tx, mut rx) = channel();
        let drift = report("fp-1", "web", RemediationAction::Alert);

        assert_eq!(coordinator.process(&drift, &mut rx).await, RemediationOutcome::Succeeded);
        assert_eq!(coordinator.process(&drift, &mut rx).await, RemediationOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_ignore_action_is_recorded_without_dispatch() {
        let mut executor = MockRemediationExecutor::new();
        executor.expect_execute().never();

        let coordinator = RemediationCoordinator::new(
            Arc::new(executor),
            Arc::new(MemoryReportStore::new()),
            settings(),
        );
        let (_tx, mut rx) = channel();

        let outcome = coordinator
            .process(&report("fp-1", "web", RemediationAction::Ignore), &mut rx)
            .await;
        assert_eq!(outcome, RemediationOutcome::Recorded);
        assert_eq!(
            coordinator.record("fp-1").await.unwrap().status,
            RemediationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_second_fingerprint_for_busy_resource_is_deferred() {
        let mut executor = MockRemediationExecutor::new();
        executor.expect_execute().never();

        let mut in_flight = RemediationRecord::new("fp-old", "aws_instance.web", Utc::now());
        in_flight.start_attempt(RemediationAction::Alert, Utc::now()).unwrap();

        let coordinator = RemediationCoordinator::new(
            Arc::new(executor),
            Arc::new(MemoryReportStore::new()),
            settings(),
        )
        .with_records([in_flight]);
        let (_tx, mut rx) = channel();

        let outcome = coordinator
            .process(&report("fp-new", "web", RemediationAction::Alert), &mut rx)
            .await;
        assert_eq!(
            outcome,
            RemediationOutcome::Deferred {
                blocking: String::from("fp-old")
            }
        );
        assert_eq!(
            coordinator.record("fp-new").await.unwrap().status,
            RemediationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_dispatch_timeout_marks_failed() {
        let executor = Arc::new(SlowExecutor {
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
        });
        let mut quick = settings();
        quick.dispatch_timeout = Duration::from_millis(20);

        let coordinator =
            RemediationCoordinator::new(executor, Arc::new(MemoryReportStore::new()), quick);
        let (_tx, mut rx) = channel();

        let outcome = coordinator
            .process(&report("fp-1", "web", RemediationAction::Alert), &mut rx)
            .await;
        assert!(matches!(&outcome, RemediationOutcome::Failed(reason) if reason.contains("timed out")));

        let record = coordinator.record("fp-1").await.unwrap();
        assert_eq!(record.status, RemediationStatus::Failed);
        assert!(record.last_error.unwrap().contains("timed out"));
        let errors = coordinator.metrics().snapshot().errors_by_kind;
        assert_eq!(errors.get("remediation_dispatch"), Some(&1));
    }

    #[tokio::test]
    async fn test_shutdown_abandons_and_sweep_recovers() {
        let executor = Arc::new(SlowExecutor {
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryReportStore::new());
        let coordinator = RemediationCoordinator::new(executor, store.clone(), settings());
        let (tx, mut rx) = channel();
        tx.send(true).unwrap();

        let outcome = coordinator
            .process(&report("fp-1", "web", RemediationAction::Alert), &mut rx)
            .await;
        assert_eq!(outcome, RemediationOutcome::Abandoned);

        let record = coordinator.record("fp-1").await.unwrap();
        assert_eq!(record.status, RemediationStatus::InProgress);

        let since = record.in_progress_since.unwrap();
        assert!(coordinator.sweep_stale(since).await.is_empty());

        let later = since + chrono::Duration::seconds(1800);
        assert_eq!(coordinator.sweep_stale(later).await, vec![String::from("fp-1")]);

        let record = coordinator.record("fp-1").await.unwrap();
        assert_eq!(record.status, RemediationStatus::Failed);
        assert!(record.last_error.unwrap().contains("went stale"));
        assert!(store.events().iter().any(|e| e.kind == AuditEventKind::StaleSwept));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_dispatch() {
        let coordinator =
            RemediationCoordinator::new(Arc::new(succeeding(1)), Arc::new(BrokenStore), settings());
        let (_tx, mut rx) = channel();

        let outcome = coordinator
            .process(&report("fp-1", "db", RemediationAction::OpenApproval), &mut rx)
            .await;
        assert_eq!(outcome, RemediationOutcome::Succeeded);

        let errors = coordinator.metrics().snapshot().errors_by_kind;
        assert!(errors.get("store").copied().unwrap_or_default() >= 1);
    }

    #[tokio::test]
    async fn test_concurrent_sightings_dispatch_once() {
        let executor = Arc::new(SlowExecutor {
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        });
        let coordinator = Arc::new(RemediationCoordinator::new(
            executor.clone(),
            Arc::new(MemoryReportStore::new()),
            settings(),
        ));
        let (_tx, rx) = channel();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let mut rx = rx.clone();
            handles.push(tokio::spawn(async move {
                let drift = report("fp-1", "web", RemediationAction::AutoRemediate);
                coordinator.process(&drift, &mut rx).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == RemediationOutcome::Succeeded).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == RemediationOutcome::Suppressed).count(),
            7
        );
    }
}
