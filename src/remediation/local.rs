//! Local file-based record storage.
//!
//! The table lives in `records.json` next to a `records.lock` file. Saves
//! go through a temporary file and a rename so a crash never leaves a
//! half-written table behind.
//!
//! The lock file is published with a hard link from a fully written
//! temporary file, which fails if the lock already exists. Replacing an
//! expired lock is serialized through a `records.lock.takeover` guard
//! created with `create_new`.

use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DriftGuardError, Result, StoreError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::record::{RECORDS_VERSION, RecordTable};
use super::store::RecordStore;

/// Record file name.
const RECORDS_FILE: &str = "records.json";

/// Lock file name.
const LOCK_FILE: &str = "records.lock";

/// Takeover guard file name.
const TAKEOVER_FILE: &str = "records.lock.takeover";

/// Age after which a takeover guard left by a crashed process is removed.
const TAKEOVER_GRACE: Duration = Duration::from_secs(30);

/// Local file-based record store.
#[derive(Debug)]
pub struct LocalRecordStore {
    base_dir: PathBuf,
    records_path: PathBuf,
    lock_path: PathBuf,
    takeover_path: PathBuf,
}

fn corrupted(message: String) -> DriftGuardError {
    StoreError::Corrupted { message }.into()
}

fn lock_failed(message: String) -> DriftGuardError {
    StoreError::LockFailed { message }.into()
}

fn locked_by(lock: &LockInfo) -> DriftGuardError {
    StoreError::LockedByOther {
        holder: lock.holder.clone(),
        since: lock.acquired_at.to_rfc3339(),
    }
    .into()
}

fn write_failed(message: String) -> DriftGuardError {
    StoreError::write_failed("local", message).into()
}

fn serialize_lock(lock: &LockInfo) -> Result<String> {
    serde_json::to_string_pretty(lock)
        .map_err(|e| StoreError::serialization(format!("Failed to serialize lock: {e}")).into())
}

impl LocalRecordStore {
    /// Creates a record store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let records_path = base_dir.join(RECORDS_FILE);
        let lock_path = base_dir.join(LOCK_FILE);
        let takeover_path = base_dir.join(TAKEOVER_FILE);

        Self {
            base_dir,
            records_path,
            lock_path,
            takeover_path,
        }
    }

    /// Path of the record file.
    #[must_use]
    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating record directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| write_failed(format!("Failed to create record directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupted(format!("Failed to read lock file: {e}"))),
        };

        let lock_info = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Writes `content` to a uniquely named, synced file next to `path`.
    async fn write_temp(&self, path: &Path, content: &str) -> Result<PathBuf> {
        self.ensure_dir().await?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed(format!("Failed to create {}: {e}", temp_path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed(format!("Failed to sync {}: {e}", temp_path.display())))?;
        Ok(temp_path)
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let temp_path = self.write_temp(path, content).await?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_failed(format!("Failed to rename to {}: {e}", path.display())));
        }
        Ok(())
    }

    /// Publishes a new lock file. Returns false if one already exists.
    async fn link_lock_file(&self, content: &str) -> Result<bool> {
        let temp_path = self.write_temp(&self.lock_path, content).await?;
        let linked = fs::hard_link(&temp_path, &self.lock_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            debug!("Failed to remove {}: {e}", temp_path.display());
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lock_failed(format!("Failed to create lock file: {e}"))),
        }
    }

    /// Replaces the expired lock `expired` with `content`.
    async fn take_over(&self, expired: &LockInfo, content: &str) -> Result<()> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.takeover_path)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.clear_stale_guard().await;
                return Err(locked_by(expired));
            }
            Err(e) => return Err(lock_failed(format!("Failed to create takeover guard: {e}"))),
        }

        let result = match self.read_lock_file().await {
            Ok(Some(current)) if current.lock_id == expired.lock_id => self
                .write_file(&self.lock_path, content)
                .await
                .map_err(|e| lock_failed(e.to_string())),
            Ok(Some(current)) => Err(locked_by(&current)),
            Ok(None) => match self.link_lock_file(content).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(locked_by(expired)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = fs::remove_file(&self.takeover_path).await {
            warn!("Failed to remove takeover guard: {e}");
        }
        result
    }

    /// Removes a takeover guard left behind by a crashed process.
    async fn clear_stale_guard(&self) {
        let Ok(metadata) = fs::metadata(&self.takeover_path).await else {
            return;
        };
        let stale = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > TAKEOVER_GRACE);

        if stale {
            warn!("Removing stale takeover guard: {}", self.takeover_path.display());
            let _ = fs::remove_file(&self.takeover_path).await;
        }
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn load(&self) -> Result<Option<RecordTable>> {
        if !self.records_path.exists() {
            debug!("Record file does not exist: {}", self.records_path.display());
            return Ok(None);
        }

        info!("Loading remediation records from: {}", self.records_path.display());

        let content = fs::read_to_string(&self.records_path)
            .await
            .map_err(|e| corrupted(format!("Failed to read record file: {e}")))?;

        let table: RecordTable = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse record file: {e}")))?;

        if table.version != RECORDS_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: String::from(RECORDS_VERSION),
                found: table.version,
            }
            .into());
        }

        Ok(Some(table))
    }

    async fn save(&self, table: &RecordTable) -> Result<()> {
        let content = serde_json::to_string_pretty(table)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize records: {e}")))?;

        self.write_file(&self.records_path, &content).await?;
        debug!(
            "Saved {} remediation records to {}",
            table.records.len(),
            self.records_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, Utc::now());
        let content = serialize_lock(&lock_info)?;

        if !self.link_lock_file(&content).await? {
            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => return Err(locked_by(&existing)),
                Some(existing) => {
                    debug!("Expired record lock held by {} found, taking over", existing.holder);
                    self.take_over(&existing, &content).await?;
                }
                None => {
                    if !self.link_lock_file(&content).await? {
                        return Err(lock_failed(String::from(
                            "Lock file changed during acquisition",
                        )));
                    }
                }
            }
        }

        info!(
            "Acquired record lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock_info)
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        match self.read_lock_file().await? {
            Some(current) if current.lock_id == lock_id => {
                let refreshed = current.refreshed(Utc::now());
                self.write_file(&self.lock_path, &serialize_lock(&refreshed)?)
                    .await
                    .map_err(|e| lock_failed(e.to_string()))?;
                debug!("Refreshed record lock {lock_id} until {}", refreshed.expires_at);
                Ok(refreshed)
            }
            Some(current) => Err(locked_by(&current)),
            None => Err(lock_failed(format!("Record lock {lock_id} is no longer held"))),
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                fs::remove_file(&self.lock_path)
                    .await
                    .map_err(|e| lock_failed(format!("Failed to delete lock file: {e}")))?;
                info!("Released record lock: {lock_id}");
            }
            Some(existing) => {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::record::RemediationRecord;
    use crate::remediation::store::while_locked;
    use crate::report::RemediationAction;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalRecordStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalRecordStore::with_base_dir(temp_dir.path().join("records"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let now = Utc::now();

        let mut record = RemediationRecord::new("fp-1", "aws_instance.web", now);
        record.start_attempt(RemediationAction::Alert, now).unwrap();
        let table = RecordTable::new(vec![
            record,
            RemediationRecord::new("fp-0", "aws_instance.db", now),
        ]);
        store.save(&table).await.unwrap();

        let loaded = store.load().await.unwrap().expect("table should exist");
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].fingerprint, "fp-0");
        assert_eq!(loaded.records[1].attempt_count, 1);
        let leftovers: Vec<_> = std::fs::read_dir(store.records_path().parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut table = RecordTable::new(Vec::new());
        table.version = String::from("0");
        store.save(&table).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(
            err,
            DriftGuardError::Store(StoreError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupted_file() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.records_path().parent().unwrap()).unwrap();
        std::fs::write(store.records_path(), "{not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("detector-1").await.unwrap();
        let err = store.acquire_lock("detector-2").await.unwrap_err();
        assert!(matches!(
            err,
            DriftGuardError::Store(StoreError::LockedByOther { .. })
        ));
        assert!(err.is_retryable());

        store.release_lock("someone-else").await.unwrap();
        assert!(store.acquire_lock("detector-2").await.is_err());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.acquire_lock("detector-2").await.is_ok());
    }

    fn write_lock(store: &LocalRecordStore, lock: &LockInfo) {
        std::fs::create_dir_all(&store.base_dir).unwrap();
        std::fs::write(&store.lock_path, serde_json::to_string(lock).unwrap()).unwrap();
    }

    fn expired_lock() -> LockInfo {
        LockInfo::new(
            "crashed-detector",
            Utc::now() - chrono::Duration::seconds(2 * LOCK_EXPIRY_SECS),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_single_winner() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("records");

        for _ in 0..50 {
            let first = LocalRecordStore::with_base_dir(&dir);
            let second = LocalRecordStore::with_base_dir(&dir);
            let (a, b) = tokio::join!(
                tokio::spawn(async move { first.acquire_lock("detector-1").await }),
                tokio::spawn(async move { second.acquire_lock("detector-2").await }),
            );
            let results = [a.unwrap(), b.unwrap()];

            let winners: Vec<&LockInfo> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);

            let store = LocalRecordStore::with_base_dir(&dir);
            assert_eq!(
                store.read_lock_file().await.unwrap().unwrap().lock_id,
                winners[0].lock_id
            );
            store.release_lock(&winners[0].lock_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let stale = expired_lock();
        write_lock(&store, &stale);

        let lock = store.acquire_lock("detector-2").await.unwrap();
        assert_ne!(lock.lock_id, stale.lock_id);
        assert_eq!(store.read_lock_file().await.unwrap().unwrap().lock_id, lock.lock_id);
        assert!(!store.takeover_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takeover_has_single_winner() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("records");

        for _ in 0..20 {
            write_lock(&LocalRecordStore::with_base_dir(&dir), &expired_lock());

            let first = LocalRecordStore::with_base_dir(&dir);
            let second = LocalRecordStore::with_base_dir(&dir);
            let (a, b) = tokio::join!(
                tokio::spawn(async move { first.acquire_lock("detector-1").await }),
                tokio::spawn(async move { second.acquire_lock("detector-2").await }),
            );
            let winners = [a.unwrap(), b.unwrap()].into_iter().filter(Result::is_ok).count();
            assert_eq!(winners, 1);
        }
    }

    #[tokio::test]
    async fn test_live_takeover_guard_blocks() {
        let (store, _temp) = create_test_store();
        let stale = expired_lock();
        write_lock(&store, &stale);
        std::fs::write(&store.takeover_path, "").unwrap();

        let err = store.acquire_lock("detector-2").await.unwrap_err();
        assert!(matches!(
            err,
            DriftGuardError::Store(StoreError::LockedByOther { .. })
        ));
        assert!(store.takeover_path.exists());
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let (store, _temp) = create_test_store();
        let lock = store.acquire_lock("detector-1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let refreshed = store.refresh_lock(&lock.lock_id).await.unwrap();
        assert_eq!(refreshed.lock_id, lock.lock_id);
        assert!(refreshed.expires_at > lock.expires_at);
        assert_eq!(
            store.read_lock_file().await.unwrap().unwrap().expires_at,
            refreshed.expires_at
        );

        assert!(store.refresh_lock("someone-else").await.is_err());
        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.refresh_lock(&lock.lock_id).await.is_err());
    }

    #[tokio::test]
    async fn test_while_locked_refreshes_during_work() {
        let (store, _temp) = create_test_store();
        let lock = store.acquire_lock("detector-1").await.unwrap();

        let output = while_locked(&store, &lock.lock_id, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            42
        })
        .await;

        assert_eq!(output, 42);
        let current = store.read_lock_file().await.unwrap().unwrap();
        assert!(current.expires_at > lock.expires_at);
    }
}
