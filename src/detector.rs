//! Drift detection runs.
//!
//! A run takes every configured resource through collect → diff → classify
//! → coordinate. Resources are processed concurrently up to
//! `max_concurrency`; a failure on one resource is audited and
//! reported in the summary without affecting the others.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collector::{Side, StateCollector};
use crate::config::DetectionConfig;
use crate::engine::{DiffEngine, PolicyEngine, PolicySet};
use crate::error::{CollectionError, DriftGuardError};
use crate::metrics::DriftMetrics;
use crate::remediation::{RemediationCoordinator, RemediationOutcome, shutdown_signalled};
use crate::report::{
    AuditEvent, AuditEventKind, RemediationAction, ReportStore, ResourceIdentity,
    ResourceUniverse, Severity,
};
use crate::tree::StateTree;

/// Limits for a detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    /// Timeout for each collector call.
    pub collection_timeout: Duration,
    /// Maximum resources processed at once.
    pub max_concurrency: usize,
}

impl From<&DetectionConfig> for DetectorSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            collection_timeout: config.collection_timeout(),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

/// Result for one resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceResult {
    /// Resource identifier.
    pub resource_id: String,
    /// What happened.
    pub status: ResourceStatus,
}

/// What happened to one resource in a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// No retained drift.
    Clean,
    /// Drift was reported.
    Drifted {
        /// Report fingerprint.
        report_id: String,
        /// Report severity.
        severity: Severity,
        /// Decided action.
        action: RemediationAction,
        /// Retained entries.
        entries: usize,
        /// Remediation outcome.
        outcome: RemediationOutcome,
    },
    /// Collection or diffing failed.
    Failed {
        /// Short error kind.
        error_kind: String,
        /// Error message.
        message: String,
    },
    /// Shutdown arrived before the resource was checked.
    Cancelled,
}

/// Summary of a detection run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,
    /// Environment the run evaluated.
    pub environment: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Stale records swept before the run.
    pub swept: Vec<String>,
    /// Per-resource results, in input order.
    pub results: Vec<ResourceResult>,
}

impl RunSummary {
    fn count(&self, predicate: impl Fn(&ResourceStatus) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.status)).count()
    }

    /// Number of resources without drift.
    #[must_use]
    pub fn clean(&self) -> usize {
        self.count(|s| matches!(s, ResourceStatus::Clean))
    }

    /// Number of resources with reported drift.
    #[must_use]
    pub fn drifted(&self) -> usize {
        self.count(|s| matches!(s, ResourceStatus::Drifted { .. }))
    }

    /// Number of resources that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ResourceStatus::Failed { .. }))
    }

    /// Number of resources skipped by shutdown.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, ResourceStatus::Cancelled))
    }

    /// Highest severity reported in the run.
    #[must_use]
    pub fn highest_severity(&self) -> Option<Severity> {
        self.results
            .iter()
            .filter_map(|r| match &r.status {
                ResourceStatus::Drifted { severity, .. } => Some(*severity),
                _ => None,
            })
            .max()
    }
}

/// Runs drift detection over a set of resources.
pub struct DriftDetector {
    collectors: BTreeMap<ResourceUniverse, Arc<dyn StateCollector>>,
    policy: PolicySet,
    engine: PolicyEngine,
    diff_engine: DiffEngine,
    coordinator: Arc<RemediationCoordinator>,
    store: Arc<dyn ReportStore>,
    metrics: Arc<DriftMetrics>,
    environment: String,
    settings: DetectorSettings,
}

async fn collect_with_timeout<F>(
    call: F,
    timeout: Duration,
    resource: &ResourceIdentity,
    side: Side,
) -> Result<StateTree, CollectionError>
where
    F: Future<Output = Result<StateTree, CollectionError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(CollectionError::Timeout {
                resource: resource.to_string(),
                side: side.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        })
}

impl DriftDetector {
    /// Creates a detector evaluating `policy` for `environment`.
    ///
    /// The detector shares the coordinator's metrics registry.
    #[must_use]
    pub fn new(
        policy: PolicySet,
        environment: impl Into<String>,
        coordinator: Arc<RemediationCoordinator>,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        let engine = policy.engine();
        let metrics = Arc::clone(coordinator.metrics());

        Self {
            collectors: BTreeMap::new(),
            policy,
            engine,
            diff_engine: DiffEngine::new(),
            coordinator,
            store,
            metrics,
            environment: environment.into(),
            settings: DetectorSettings::default(),
        }
    }

    /// Registers the collector for a resource universe.
    #[must_use]
    pub fn with_collector(
        mut self,
        universe: ResourceUniverse,
        collector: Arc<dyn StateCollector>,
    ) -> Self {
        self.collectors.insert(universe, collector);
        self
    }

    /// Sets run limits.
    #[must_use]
    pub const fn with_settings(mut self, settings: DetectorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<RemediationCoordinator> {
        &self.coordinator
    }

    /// Returns the metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<DriftMetrics> {
        &self.metrics
    }

    /// Runs one detection cycle over `resources`.
    ///
    /// Stale remediation records are swept first. Setting `shutdown`
    /// stops scheduling new resources and abandons in-flight calls.
    pub async fn run(
        self: &Arc<Self>,
        resources: &[ResourceIdentity],
        shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            environment = %self.environment,
            "Starting detection run over {} resources",
            resources.len()
        );

        let swept = self.coordinator.sweep_stale(started_at).await;

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, resource) in resources.iter().enumerate() {
            let stopping = *shutdown.borrow();
            if stopping {
                warn!("Shutdown requested, not scheduling remaining resources");
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let detector = Arc::clone(self);
            let resource = resource.clone();
            let mut shutdown = shutdown.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let status = detector.check_resource(&resource, &mut shutdown).await;
                detector.metrics.record_resource_checked(started.elapsed());
                (index, status)
            });
        }

        let mut statuses: Vec<Option<ResourceStatus>> = vec![None; resources.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, status)) => statuses[index] = Some(status),
                Err(e) => {
                    error!("Detection task failed: {e}");
                    self.metrics.record_error("internal");
                }
            }
        }

        let stopped = *shutdown.borrow();
        let results: Vec<ResourceResult> = resources
            .iter()
            .zip(statuses)
            .map(|(resource, status)| ResourceResult {
                resource_id: resource.qualified_id(),
                status: status.unwrap_or_else(|| {
                    if stopped {
                        ResourceStatus::Cancelled
                    } else {
                        ResourceStatus::Failed {
                            error_kind: String::from("internal"),
                            message: String::from("Detection task aborted"),
                        }
                    }
                }),
            })
            .collect();

        let summary = RunSummary {
            run_id,
            environment: self.environment.clone(),
            started_at,
            finished_at: Utc::now(),
            swept,
            results,
        };

        info!(
            run_id = %summary.run_id,
            "Detection run finished: {} clean, {} drifted, {} failed, {} cancelled",
            summary.clean(),
            summary.drifted(),
            summary.failed(),
            summary.cancelled()
        );
        summary
    }

    /// Checks one resource end to end.
    pub async fn check_resource(
        &self,
        resource: &ResourceIdentity,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ResourceStatus {
        let collected = tokio::select! {
            biased;
            () = shutdown_signalled(shutdown) => return ResourceStatus::Cancelled,
            collected = self.collect(resource) => collected,
        };

        let (desired, live) = match collected {
            Ok(trees) => trees,
            Err(e) => return self.fail(resource, AuditEventKind::CollectionFailed, e.into()).await,
        };

        let ignore = self
            .policy
            .rules
            .ignore_globs(&self.environment, resource.namespace());
        let diffs = match self.diff_engine.diff_resource(resource, &desired, &live, &ignore) {
            Ok(diffs) => diffs,
            Err(e) => return self.fail(resource, AuditEventKind::StateTreeInvalid, e.into()).await,
        };

        let env_policy = self.policy.environment(&self.environment);
        let Some(report) =
            self.engine
                .classify(diffs, resource, &env_policy, &self.policy.rules, Utc::now())
        else {
            debug!(resource = %resource, "No drift");
            return ResourceStatus::Clean;
        };

        self.metrics.record_report(&report);
        info!(
            resource = %resource,
            severity = %report.severity(),
            action = %report.decided_action(),
            "Drift detected on {} paths",
            report.diffs().len()
        );

        let outcome = self.coordinator.process(&report, shutdown).await;

        ResourceStatus::Drifted {
            report_id: report.id().to_string(),
            severity: report.severity(),
            action: report.decided_action(),
            entries: report.diffs().len(),
            outcome,
        }
    }

    async fn collect(
        &self,
        resource: &ResourceIdentity,
    ) -> Result<(StateTree, StateTree), CollectionError> {
        let collector =
            self.collectors
                .get(&resource.universe)
                .ok_or_else(|| CollectionError::NoCollector {
                    universe: resource.universe.to_string(),
                })?;
        let timeout = self.settings.collection_timeout;

        let (desired, live) = tokio::join!(
            collect_with_timeout(
                collector.collect_desired(resource),
                timeout,
                resource,
                Side::Desired
            ),
            collect_with_timeout(collector.collect_live(resource), timeout, resource, Side::Live),
        );

        Ok((desired?, live?))
    }

    async fn fail(
        &self,
        resource: &ResourceIdentity,
        kind: AuditEventKind,
        err: DriftGuardError,
    ) -> ResourceStatus {
        warn!(resource = %resource, "Skipping resource: {err}");
        self.metrics.record_error(err.kind());

        let event = AuditEvent::new(kind, resource.qualified_id())
            .with_error(err.kind(), err.to_string());
        if let Err(e) = self.store.put_event(&event).await {
            warn!("Failed to write audit event: {e}");
            self.metrics.record_error(e.kind());
        }

        ResourceStatus::Failed {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Debug for DriftDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftDetector")
            .field("environment", &self.environment)
            .field("universes", &self.collectors.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
