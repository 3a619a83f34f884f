//! Remediation coordination and record keeping.
//!
//! This module provides:
//! - Remediation records and their forward-only status machine
//! - The executor seam and a dry-run executor
//! - The coordinator enforcing one in-flight remediation per fingerprint
//!   and per resource
//! - Record persistence between runs (local file with a refreshed lock)

mod coordinator;
mod executor;
mod local;
mod lock;
mod record;
mod store;

pub use coordinator::{CoordinatorSettings, RemediationCoordinator, RemediationOutcome};
pub(crate) use coordinator::shutdown_signalled;
pub use executor::{ExecutionResult, LoggingExecutor, RemediationExecutor};
pub use local::LocalRecordStore;
pub use lock::{LOCK_EXPIRY_SECS, LOCK_REFRESH_SECS, LockInfo, generate_holder_id};
pub use record::{RECORDS_VERSION, RecordTable, RemediationRecord, RemediationStatus};
pub use store::{RecordStore, while_locked};

#[cfg(test)]
pub use executor::MockRemediationExecutor;
