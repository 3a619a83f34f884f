//! State collector trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CollectionError;
use crate::report::ResourceIdentity;
use crate::tree::StateTree;

/// Which side of the comparison a tree comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Declared state (Terraform plan, rendered Helm chart).
    Desired,
    /// Observed state (cloud API, Kubernetes API).
    Live,
}

impl Side {
    /// Returns the lowercase name, also used as the snapshot directory name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desired => "desired",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source of desired and live state for one resource universe.
///
/// Implementations must fail with a `CollectionError` rather than return a
/// partial or empty tree.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateCollector: Send + Sync {
    /// Collects the declared state of `resource`.
    async fn collect_desired(
        &self,
        resource: &ResourceIdentity,
    ) -> Result<StateTree, CollectionError>;

    /// Collects the observed state of `resource`.
    async fn collect_live(&self, resource: &ResourceIdentity)
    -> Result<StateTree, CollectionError>;
}
