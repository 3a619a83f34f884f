//! Snapshot-file collector.
//!
//! Reads exported state from disk:
//!
//! ```text
//! <root>/desired/<type>.<name>.json
//! <root>/live/<namespace>/<type>.<name>.yaml
//! ```
//!
//! A namespaced resource is looked up under its namespace directory first,
//! then directly under the side directory. JSON and YAML (`.yaml`, `.yml`)
//! are both accepted.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::CollectionError;
use crate::report::ResourceIdentity;
use crate::tree::{ConversionOptions, DiffPath, GlobSet, StateTree};

use super::source::{Side, StateCollector};

/// Accepted snapshot extensions, in lookup order.
const EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// Collector reading desired and live state from snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotCollector {
    root: PathBuf,
    ordered_paths: GlobSet,
}

impl SnapshotCollector {
    /// Creates a collector reading from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ordered_paths: GlobSet::default(),
        }
    }

    /// Keeps scalar arrays at these paths ordered.
    #[must_use]
    pub fn with_ordered_paths(mut self, ordered_paths: GlobSet) -> Self {
        self.ordered_paths = ordered_paths;
        self
    }

    /// Returns the snapshot root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, side: Side, resource: &ResourceIdentity) -> Vec<PathBuf> {
        let side_dir = self.root.join(side.as_str());
        let id = resource.resource_id();
        let id = id.as_str();

        let mut dirs = Vec::with_capacity(2);
        if let Some(ns) = resource.namespace() {
            dirs.push(side_dir.join(ns));
        }
        dirs.push(side_dir);

        dirs.iter()
            .flat_map(|dir| EXTENSIONS.iter().map(move |ext| dir.join(format!("{id}.{ext}"))))
            .collect()
    }

    async fn read(&self, side: Side, resource: &ResourceIdentity) -> Result<StateTree, CollectionError> {
        let resource_id = resource.to_string();
        let Some(path) = self.candidates(side, resource).into_iter().find(|p| p.exists()) else {
            return Err(CollectionError::NotFound {
                resource: resource_id,
                side: side.to_string(),
            });
        };

        self.load_file(&path, side, resource).await
    }

    /// Loads one snapshot file as the given side of `resource`.
    ///
    /// The format follows the extension: `.json` is JSON, anything else is
    /// parsed as YAML.
    pub async fn load_file(
        &self,
        path: &Path,
        side: Side,
        resource: &ResourceIdentity,
    ) -> Result<StateTree, CollectionError> {
        let resource_id = resource.to_string();
        debug!("Reading {side} state for {resource_id} from {}", path.display());

        let content = fs::read_to_string(path).await.map_err(|e| {
            CollectionError::unavailable(&resource_id, format!("Failed to read {}: {e}", path.display()))
        })?;

        let invalid = |message: String| CollectionError::InvalidState {
            resource: resource_id.clone(),
            side: side.to_string(),
            message,
        };

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let document: serde_json::Value = if is_json {
            serde_json::from_str(&content).map_err(|e| invalid(format!("JSON parse error: {e}")))?
        } else {
            serde_yaml::from_str(&content).map_err(|e| invalid(format!("YAML parse error: {e}")))?
        };

        let options = ConversionOptions::new(
            self.ordered_paths.clone(),
            DiffPath::root(&resource.resource_type),
        );
        StateTree::from_json(&document, &options).map_err(|e| invalid(e.to_string()))
    }
}

#[async_trait]
impl StateCollector for SnapshotCollector {
    async fn collect_desired(
        &self,
        resource: &ResourceIdentity,
    ) -> Result<StateTree, CollectionError> {
        self.read(Side::Desired, resource).await
    }

    async fn collect_live(&self, resource: &ResourceIdentity) -> Result<StateTree, CollectionError> {
        self.read(Side::Live, resource).await
    }
}
