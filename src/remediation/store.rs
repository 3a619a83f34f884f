//! Persistence interface for remediation records.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

use super::lock::LockInfo;
use super::record::RecordTable;

/// Trait for remediation record backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Loads the record table.
    ///
    /// Returns `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<RecordTable>>;

    /// Saves the record table, replacing the previous one.
    async fn save(&self, table: &RecordTable) -> Result<()>;

    /// Acquires the table lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Extends the expiry of the lock `lock_id`.
    ///
    /// Fails if the lock was released or taken over by another holder.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases the table lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Drives `work` to completion, refreshing the lock every `refresh_every`.
///
/// A failed refresh is logged and the work keeps running; the save at the
/// end of the cycle still goes through the store.
pub async fn while_locked<S, F>(
    store: &S,
    lock_id: &str,
    refresh_every: Duration,
    work: F,
) -> F::Output
where
    S: RecordStore + ?Sized,
    F: Future,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(refresh_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => {
                if let Err(e) = store.refresh_lock(lock_id).await {
                    warn!("Failed to refresh record lock {lock_id}: {e}");
                }
            }
        }
    }
}
