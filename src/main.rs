//! DriftGuard CLI entrypoint.
//!
//! This is the main entrypoint for the driftguard command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use driftguard::cli::{Cli, Commands, OutputFormatter};
use driftguard::collector::{Side, SnapshotCollector, StateCollector};
use driftguard::config::{
    ConfigParser, ConfigValidator, DriftGuardConfig, ReportBackend, ResourceConfig,
    find_config_file,
};
use driftguard::detector::{DetectorSettings, DriftDetector, RunSummary};
use driftguard::engine::DiffEngine;
use driftguard::error::{DriftGuardError, PolicyConfigError, Result};
use driftguard::metrics::MetricsSnapshot;
use driftguard::remediation::{
    CoordinatorSettings, LOCK_REFRESH_SECS, LocalRecordStore, LoggingExecutor, RecordStore,
    RecordTable, RemediationCoordinator, while_locked,
};
use driftguard::report::{
    LocalReportStore, REPORT_DIR, ReportStore, ResourceIdentity, ResourceUniverse, S3ReportStore,
};

use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for transient failures such as a held record lock (`EX_TEMPFAIL`).
const EXIT_TEMPFAIL: u8 = 75;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_retryable() => {
            eprintln!("Error: {e} (transient, retry later)");
            ExitCode::from(EXIT_TEMPFAIL)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose` when set.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Check {
            resource,
            desired,
            live,
            namespace,
            environment,
        } => {
            cmd_check(
                config_path,
                &resource,
                (desired.as_path(), live.as_path()),
                namespace,
                environment,
                &formatter,
            )
            .await
        }
        Commands::Run {
            environment,
            resources,
        } => cmd_run(config_path, environment, &resources, &formatter).await,
        Commands::Records => cmd_records(config_path, &formatter).await,
        Commands::Sweep => cmd_sweep(config_path, &formatter).await,
    }
}

/// A loaded configuration and the directory relative paths resolve against.
struct Loaded {
    config: DriftGuardConfig,
    base_dir: PathBuf,
}

impl Loaded {
    fn path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn environment(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| self.config.project.environment.clone())
    }
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    if !result.is_valid() {
        return Err(PolicyConfigError::validation_general(format!(
            "{} validation error(s)",
            result.error_count()
        ))
        .into());
    }

    config.compile()?;
    Ok(())
}

/// Diff two snapshot files for one resource.
async fn cmd_check(
    config_path: Option<&PathBuf>,
    resource_id: &str,
    (desired_file, live_file): (&Path, &Path),
    namespace: Option<String>,
    environment: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let policy = loaded.config.compile()?;
    let environment = loaded.environment(environment);

    let mut resource = match loaded.config.find_resource(resource_id) {
        Some(configured) => configured.identity(),
        None => parse_identity(resource_id)?,
    };
    if let Some(ns) = namespace {
        resource = resource.with_namespace(ns);
    }

    let collector = SnapshotCollector::new(&loaded.base_dir)
        .with_ordered_paths(loaded.config.detection.ordered_globs()?);
    let (desired, live) = tokio::try_join!(
        collector.load_file(desired_file, Side::Desired, &resource),
        collector.load_file(live_file, Side::Live, &resource),
    )?;

    let ignore = policy.rules.ignore_globs(&environment, resource.namespace());
    let diffs = DiffEngine::new().diff_resource(&resource, &desired, &live, &ignore)?;
    let report = policy.engine().classify(
        diffs,
        &resource,
        &policy.environment(&environment),
        &policy.rules,
        Utc::now(),
    );

    println!("{}", formatter.format_report(&resource, report.as_ref()));
    Ok(())
}

/// Run a full detection cycle.
async fn cmd_run(
    config_path: Option<&PathBuf>,
    environment: Option<String>,
    filter: &[String],
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_config(config_path)?;
    let environment = loaded.environment(environment);
    let resources = select_resources(&loaded.config, filter)?;

    let report_store = build_report_store(&loaded).await?;
    let record_store = LocalRecordStore::with_base_dir(loaded.path(&loaded.config.records.path));

    let lock = record_store.acquire_lock("").await?;
    let outcome = while_locked(
        &record_store,
        &lock.lock_id,
        Duration::from_secs(LOCK_REFRESH_SECS),
        detect(&loaded, &environment, &resources, report_store, &record_store),
    )
    .await;
    if let Err(e) = record_store.release_lock(&lock.lock_id).await {
        warn!("Failed to release record lock: {e}");
    }

    let (summary, metrics) = outcome?;
    println!("{}", formatter.format_summary(&summary, &metrics));
    Ok(())
}

/// Runs detection while holding the record lock.
async fn detect(
    loaded: &Loaded,
    environment: &str,
    resources: &[ResourceIdentity],
    report_store: Arc<dyn ReportStore>,
    record_store: &LocalRecordStore,
) -> Result<(RunSummary, MetricsSnapshot)> {
    let config = &loaded.config;
    let policy = config.compile()?;
    let records = record_store.load().await?.map(|t| t.records).unwrap_or_default();
    debug!("Loaded {} remediation records", records.len());

    let coordinator = Arc::new(
        RemediationCoordinator::new(
            Arc::new(LoggingExecutor::new()),
            Arc::clone(&report_store),
            CoordinatorSettings::from(&config.coordinator),
        )
        .with_records(records),
    );

    let collector: Arc<dyn StateCollector> = Arc::new(
        SnapshotCollector::new(loaded.path(&config.detection.snapshot_dir))
            .with_ordered_paths(config.detection.ordered_globs()?),
    );

    let detector = Arc::new(
        DriftDetector::new(policy, environment, Arc::clone(&coordinator), report_store)
            .with_collector(ResourceUniverse::Cloud, Arc::clone(&collector))
            .with_collector(ResourceUniverse::Kubernetes, collector)
            .with_settings(DetectorSettings::from(&config.detection)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, abandoning in-flight work");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = detector.run(resources, shutdown_rx).await;
    signal.abort();

    record_store
        .save(&RecordTable::new(coordinator.records().await))
        .await?;

    Ok((summary, detector.metrics().snapshot()))
}

/// Show the remediation record table.
async fn cmd_records(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let loaded = load_config(config_path)?;
    let record_store = LocalRecordStore::with_base_dir(loaded.path(&loaded.config.records.path));

    let records = record_store.load().await?.map(|t| t.records).unwrap_or_default();
    println!("{}", formatter.format_records(&records));
    Ok(())
}

/// Force stale in-progress remediations to failed.
async fn cmd_sweep(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let loaded = load_config(config_path)?;
    let report_store = build_report_store(&loaded).await?;
    let record_store = LocalRecordStore::with_base_dir(loaded.path(&loaded.config.records.path));

    let lock = record_store.acquire_lock("").await?;
    let outcome = while_locked(
        &record_store,
        &lock.lock_id,
        Duration::from_secs(LOCK_REFRESH_SECS),
        sweep(&loaded, report_store, &record_store),
    )
    .await;
    if let Err(e) = record_store.release_lock(&lock.lock_id).await {
        warn!("Failed to release record lock: {e}");
    }

    let swept = outcome?;
    println!("{}", formatter.format_swept(&swept));
    Ok(())
}

/// Sweeps stale records while holding the record lock.
async fn sweep(
    loaded: &Loaded,
    report_store: Arc<dyn ReportStore>,
    record_store: &LocalRecordStore,
) -> Result<Vec<String>> {
    let Some(table) = record_store.load().await? else {
        return Ok(Vec::new());
    };

    let coordinator = RemediationCoordinator::new(
        Arc::new(LoggingExecutor::new()),
        report_store,
        CoordinatorSettings::from(&loaded.config.coordinator),
    )
    .with_records(table.records);

    let swept = coordinator.sweep_stale(Utc::now()).await;
    if !swept.is_empty() {
        record_store
            .save(&RecordTable::new(coordinator.records().await))
            .await?;
    }
    Ok(swept)
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Returns the directory containing the configuration file.
fn base_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<Loaded> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_dir = base_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    Ok(Loaded { config, base_dir })
}

/// Creates the report store selected by the configuration.
async fn build_report_store(loaded: &Loaded) -> Result<Arc<dyn ReportStore>> {
    let reports = &loaded.config.reports;
    let store: Arc<dyn ReportStore> = match reports.backend {
        ReportBackend::Local => {
            let dir = reports
                .path
                .as_deref()
                .map_or_else(|| loaded.base_dir.join(REPORT_DIR), |p| loaded.path(p));
            Arc::new(LocalReportStore::with_base_dir(dir))
        }
        ReportBackend::S3 => {
            let bucket = reports
                .bucket
                .as_deref()
                .ok_or_else(|| DriftGuardError::internal("S3 report bucket not configured"))?;
            Arc::new(
                S3ReportStore::new(bucket, reports.prefix.as_deref(), reports.region.as_deref())
                    .await?,
            )
        }
    };
    Ok(store)
}

/// Picks the resources to check, all of them when `filter` is empty.
fn select_resources(config: &DriftGuardConfig, filter: &[String]) -> Result<Vec<ResourceIdentity>> {
    if filter.is_empty() {
        return Ok(config.resource_identities());
    }

    filter
        .iter()
        .map(|id| {
            config
                .find_resource(id)
                .map(ResourceConfig::identity)
                .ok_or_else(|| {
                    DriftGuardError::from(PolicyConfigError::validation(
                        format!("Unknown resource: {id}"),
                        "resources",
                    ))
                })
        })
        .collect()
}

/// Parses a `<type>.<name>` identifier.
fn parse_identity(resource_id: &str) -> Result<ResourceIdentity> {
    resource_id
        .split_once('.')
        .filter(|(resource_type, name)| !resource_type.is_empty() && !name.is_empty())
        .map(|(resource_type, name)| ResourceIdentity::new(resource_type, name))
        .ok_or_else(|| {
            PolicyConfigError::validation(
                format!("Resource id must be <type>.<name>: {resource_id}"),
                "resource",
            )
            .into()
        })
}
