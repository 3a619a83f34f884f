//! Cross-process lock on the remediation record table.
//!
//! Two detector processes sharing a record directory would otherwise both
//! see a fingerprint as `Pending` and both dispatch it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 600;

/// How often a holder extends its lock while working.
pub const LOCK_REFRESH_SECS: u64 = 200;

/// Information about a held record lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates lock info for `holder`, acquired at `now`.
    #[must_use]
    pub fn new(holder: &str, now: DateTime<Utc>) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Returns the same lock with its expiry pushed out from `now`.
    #[must_use]
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
            ..self.clone()
        }
    }

    /// Checks if the lock has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
