//! S3-based report store.
//!
//! Each report and audit event is written as its own object under a
//! date-partitioned key, so writers never contend on a shared object.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

use super::audit::AuditEvent;
use super::store::ReportStore;
use super::types::DriftReport;

/// Default key prefix for reports.
pub const DEFAULT_PREFIX: &str = "driftguard-reports";

/// S3-based report store.
#[derive(Debug)]
pub struct S3ReportStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, always ending in `/`.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    let p = prefix.unwrap_or(DEFAULT_PREFIX).trim_matches('/');
    if p.is_empty() {
        String::new()
    } else {
        format!("{p}/")
    }
}

impl S3ReportStore {
    /// Creates a new S3 report store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        info!("Using S3 report store s3://{bucket}/{}", normalize_prefix(prefix));

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 report store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Builds `<prefix>YYYY/MM/DD/<kind>/<name>-<timestamp>.json`.
    fn key(&self, kind: &str, name: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}{}/{kind}/{name}-{}.json",
            self.prefix,
            at.format("%Y/%m/%d"),
            at.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StoreError::s3(format!("S3 put error: {}", e.into_service_error())))?;

        Ok(())
    }
}

#[async_trait]
impl ReportStore for S3ReportStore {
    async fn put_report(&self, report: &DriftReport) -> Result<()> {
        let key = self.key("reports", report.id(), report.timestamp());
        debug!("Writing report to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(report)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize report: {e}")))?;

        self.put_object(&key, content).await
    }

    async fn put_event(&self, event: &AuditEvent) -> Result<()> {
        let key = self.key("events", &event.id, event.timestamp);

        let content = serde_json::to_string(event)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize event: {e}")))?;

        self.put_object(&key, content).await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
