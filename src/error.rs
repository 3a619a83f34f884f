//! Error types for the DriftGuard engine.
//!
//! Errors are grouped by the stage that raises them: policy configuration,
//! state collection, state tree validation, remediation dispatch and
//! persistence. Per-resource errors are isolated by the detector; only
//! configuration errors are fatal.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for DriftGuard.
#[derive(Debug, Error)]
pub enum DriftGuardError {
    /// Policy configuration errors (fatal at startup).
    #[error("Policy configuration error: {0}")]
    Config(#[from] PolicyConfigError),

    /// State collection errors.
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    /// Malformed state tree input.
    #[error("State tree error: {0}")]
    StateTree(#[from] StateTreeError),

    /// Remediation dispatch errors.
    #[error("Remediation dispatch error: {0}")]
    Dispatch(#[from] RemediationDispatchError),

    /// Report or record persistence errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading or compiling the policy document.
#[derive(Debug, Error)]
pub enum PolicyConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A path glob could not be compiled.
    #[error("Invalid path glob '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Environment policy defined more than once.
    #[error("Duplicate environment policy: {environment}")]
    DuplicateEnvironment {
        /// The duplicated environment name.
        environment: String,
    },
}

/// Errors raised by state collectors.
///
/// A collector must fail with one of these rather than return a partial or
/// empty tree.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The source of state could not be reached.
    #[error("State source unavailable for {resource}: {message}")]
    Unavailable {
        /// Resource being collected.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// The resource does not exist in the queried source.
    #[error("Resource {resource} not found in {side} state")]
    NotFound {
        /// Resource being collected.
        resource: String,
        /// Which side was queried (desired or live).
        side: String,
    },

    /// The source returned data that could not be normalized.
    #[error("Invalid {side} state for {resource}: {message}")]
    InvalidState {
        /// Resource being collected.
        resource: String,
        /// Which side was queried (desired or live).
        side: String,
        /// Description of the problem.
        message: String,
    },

    /// No collector is registered for the resource universe.
    #[error("No collector registered for {universe} resources")]
    NoCollector {
        /// The resource universe.
        universe: String,
    },

    /// Collection exceeded its per-call timeout.
    #[error("Timed out after {timeout_secs}s collecting {side} state for {resource}")]
    Timeout {
        /// Resource being collected.
        resource: String,
        /// Which side was queried (desired or live).
        side: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
}

/// Errors raised for malformed state tree input.
///
/// Diff computation for a resource fails atomically on any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateTreeError {
    /// The tree nests deeper than allowed (also guards against cyclic input).
    #[error("State tree exceeds maximum depth {limit} at '{path}'")]
    DepthExceeded {
        /// Path where the limit was hit.
        path: String,
        /// Maximum allowed depth.
        limit: usize,
    },

    /// A mapping key is empty.
    #[error("Empty key under '{path}'")]
    EmptyKey {
        /// Path of the parent mapping.
        path: String,
    },

    /// A number is NaN or infinite.
    #[error("Non-finite number at '{path}'")]
    NonFiniteNumber {
        /// Path of the number.
        path: String,
    },

    /// The root of a document is not a mapping.
    #[error("State document root must be a mapping, found {found}")]
    NotAMapping {
        /// Kind of value found.
        found: String,
    },
}

/// Errors raised while dispatching a remediation action.
///
/// These are recorded on the remediation record as `Failed` and never
/// propagate out of the coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemediationDispatchError {
    /// The executor reported a failure.
    #[error("Executor rejected {action}: {reason}")]
    Rejected {
        /// Action that was attempted.
        action: String,
        /// Reason reported by the executor.
        reason: String,
    },

    /// The executor could not be reached.
    #[error("Executor unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The executor did not answer within the dispatch timeout.
    #[error("Executor timed out after {timeout_secs}s")]
    TimedOut {
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// The record stayed in progress past the stale threshold.
    #[error("Remediation in progress since {since} went stale")]
    Stale {
        /// When the record entered `InProgress`.
        since: String,
    },
}

/// Persistence errors for reports and remediation records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored data is corrupted.
    #[error("Store data is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing to the backend failed.
    #[error("Failed to write to {backend} store: {message}")]
    WriteFailed {
        /// Backend name.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire record lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The lock is held by another process.
    #[error("Records are locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 report backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Stored format version is not supported.
    #[error("Record format version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version.
        expected: String,
        /// Found version.
        found: String,
    },
}

/// Result type alias for DriftGuard operations.
pub type Result<T> = std::result::Result<T, DriftGuardError>;

impl DriftGuardError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and a later run may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Collection(
                CollectionError::Unavailable { .. } | CollectionError::Timeout { .. }
            ) | Self::Dispatch(
                RemediationDispatchError::Unavailable { .. }
                    | RemediationDispatchError::TimedOut { .. }
            ) | Self::Store(StoreError::LockFailed { .. } | StoreError::LockedByOther { .. })
        )
    }

    /// Short, stable name of the error kind, used for audit events and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "policy_config",
            Self::Collection(_) => "collection",
            Self::StateTree(_) => "state_tree",
            Self::Dispatch(_) => "remediation_dispatch",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl PolicyConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a glob compilation error.
    #[must_use]
    pub fn invalid_glob(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGlob {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

impl CollectionError {
    /// Creates an unavailable-source error.
    #[must_use]
    pub fn unavailable(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

impl StoreError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write failure for the named backend.
    #[must_use]
    pub fn write_failed(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let timeout = DriftGuardError::Collection(CollectionError::Timeout {
            resource: String::from("aws_instance.web"),
            side: String::from("live"),
            timeout_secs: 5,
        });
        assert!(timeout.is_retryable());

        let malformed = DriftGuardError::StateTree(StateTreeError::EmptyKey {
            path: String::from("spec"),
        });
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn test_error_kind_names() {
        let err = DriftGuardError::from(PolicyConfigError::validation_general("bad"));
        assert_eq!(err.kind(), "policy_config");
        assert!(err.to_string().contains("bad"));
    }
}
