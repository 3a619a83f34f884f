//! Diff engine for comparing desired vs live state.
//!
//! The engine walks both trees depth-first in a single merged pass over the
//! union of their keys and emits one entry per differing path. Ignored paths
//! are pruned from both sides before any comparison, so an ignored subtree
//! never produces an entry even when its structure differs.

use std::collections::BTreeSet;
use tracing::debug;

use crate::error::StateTreeError;
use crate::report::{DiffEntry, DiffKind, ResourceIdentity};
use crate::tree::{DiffPath, GlobSet, StateTree, StateValue};

/// Engine for computing diffs between desired and live state trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Shared state of one diff computation.
struct Walk<'a> {
    ignore: &'a GlobSet,
    resource_type: &'a str,
    entries: Vec<DiffEntry>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the differences between two trees.
    ///
    /// Paths are relative to the tree roots and ignore globs are matched
    /// against them as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if either tree is malformed. No partial result is
    /// produced.
    pub fn diff(
        &self,
        desired: &StateTree,
        live: &StateTree,
        ignore: &GlobSet,
    ) -> Result<Vec<DiffEntry>, StateTreeError> {
        Self::run(&DiffPath::new(), "", desired, live, ignore)
    }

    /// Computes the differences for a resource.
    ///
    /// Every path is qualified with the resource type
    /// (`k8s_pod.status.hostIP`), so globs written as `<type>.<field path>`
    /// apply.
    ///
    /// # Errors
    ///
    /// Returns an error if either tree is malformed.
    pub fn diff_resource(
        &self,
        resource: &ResourceIdentity,
        desired: &StateTree,
        live: &StateTree,
        ignore: &GlobSet,
    ) -> Result<Vec<DiffEntry>, StateTreeError> {
        let entries = Self::run(
            &DiffPath::root(&resource.resource_type),
            &resource.resource_type,
            desired,
            live,
            ignore,
        )?;

        debug!("Computed {} diff entries for {resource}", entries.len());
        Ok(entries)
    }

    fn run(
        root: &DiffPath,
        resource_type: &str,
        desired: &StateTree,
        live: &StateTree,
        ignore: &GlobSet,
    ) -> Result<Vec<DiffEntry>, StateTreeError> {
        desired.validate()?;
        live.validate()?;

        if !root.is_empty() && ignore.matches_path(root) {
            return Ok(Vec::new());
        }

        let mut walk = Walk {
            ignore,
            resource_type,
            entries: Vec::new(),
        };
        walk.trees(root, desired, live);

        let mut entries = walk.entries;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

impl Walk<'_> {
    fn ignored(&self, path: &DiffPath) -> bool {
        self.ignore.matches_path(path)
    }

    fn push(
        &mut self,
        path: DiffPath,
        kind: DiffKind,
        desired: Option<StateValue>,
        live: Option<StateValue>,
    ) {
        self.entries.push(DiffEntry {
            path,
            kind,
            desired_value: desired,
            live_value: live,
            resource_type: self.resource_type.to_string(),
        });
    }

    /// Merged walk over the union of keys of two mappings.
    fn trees(&mut self, path: &DiffPath, desired: &StateTree, live: &StateTree) {
        let keys: BTreeSet<&String> = desired.keys().chain(live.keys()).collect();

        for key in keys {
            let child = path.child(key);
            if self.ignored(&child) {
                continue;
            }

            match (desired.get(key), live.get(key)) {
                (Some(d), None) => {
                    let pruned = self.prune(&child, d);
                    self.push(child, DiffKind::Removed, Some(pruned), None);
                }
                (None, Some(l)) => {
                    let pruned = self.prune(&child, l);
                    self.push(child, DiffKind::Added, None, Some(pruned));
                }
                (Some(d), Some(l)) => self.values(child, d, l),
                (None, None) => {}
            }
        }
    }

    /// Positional walk over two ordered sequences.
    fn lists(&mut self, path: &DiffPath, desired: &[StateValue], live: &[StateValue]) {
        for i in 0..desired.len().max(live.len()) {
            let child = path.index(i);
            if self.ignored(&child) {
                continue;
            }

            match (desired.get(i), live.get(i)) {
                (Some(d), None) => {
                    let pruned = self.prune(&child, d);
                    self.push(child, DiffKind::Removed, Some(pruned), None);
                }
                (None, Some(l)) => {
                    let pruned = self.prune(&child, l);
                    self.push(child, DiffKind::Added, None, Some(pruned));
                }
                (Some(d), Some(l)) => self.values(child, d, l),
                (None, None) => {}
            }
        }
    }

    fn values(&mut self, path: DiffPath, desired: &StateValue, live: &StateValue) {
        match (desired, live) {
            (StateValue::Map(d), StateValue::Map(l)) => self.trees(&path, d, l),
            (StateValue::List(d), StateValue::List(l)) => self.lists(&path, d, l),
            _ => {
                let d = self.prune(&path, desired);
                let l = self.prune(&path, live);
                if !d.normalized_eq(&l) {
                    self.push(path, DiffKind::Changed, Some(d), Some(l));
                }
            }
        }
    }

    /// Removes ignored descendants from a value.
    fn prune(&self, path: &DiffPath, value: &StateValue) -> StateValue {
        match value {
            StateValue::Map(tree) => StateValue::Map(
                tree.iter()
                    .filter_map(|(key, child)| {
                        let child_path = path.child(key);
                        (!self.ignored(&child_path))
                            .then(|| (key.clone(), self.prune(&child_path, child)))
                    })
                    .collect(),
            ),
            StateValue::List(items) => StateValue::List(
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        let child_path = path.index(i);
                        (!self.ignored(&child_path)).then(|| self.prune(&child_path, item))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Scalar;

    fn deployment() -> ResourceIdentity {
        ResourceIdentity::new("k8s_deployment", "app")
    }

    fn no_ignore() -> GlobSet {
        GlobSet::default()
    }

    fn sample_tree() -> StateTree {
        StateTree::new()
            .with("replicas", 3)
            .with(
                "spec",
                StateTree::new()
                    .with("image", "app:1.2")
                    .with("ports", StateValue::set([Scalar::Int(80), Scalar::Int(443)])),
            )
            .with(
                "containers",
                vec![StateValue::from(StateTree::new().with("name", "app"))],
            )
    }

    #[test]
    fn test_identical_trees_have_no_diff() {
        let engine = DiffEngine::new();
        let tree = sample_tree();
        let diffs = engine.diff(&tree, &tree, &no_ignore()).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_changed_scalar() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with("replicas", 3);
        let live = StateTree::new().with("replicas", 5);

        let diffs = engine
            .diff_resource(&deployment(), &desired, &live, &no_ignore())
            .unwrap();

        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path.to_string(), "k8s_deployment.replicas");
        assert_eq!(diffs[0].kind, DiffKind::Changed);
        assert_eq!(diffs[0].desired_value, Some(StateValue::from(3)));
        assert_eq!(diffs[0].live_value, Some(StateValue::from(5)));
        assert_eq!(diffs[0].resource_type, "k8s_deployment");
    }

    #[test]
    fn test_added_and_removed() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with("a", 1).with("b", 2);
        let live = StateTree::new().with("b", 2).with("c", 3);

        let diffs = engine.diff(&desired, &live, &no_ignore()).unwrap();
        let kinds: Vec<_> = diffs
            .iter()
            .map(|d| (d.path.to_string(), d.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (String::from("a"), DiffKind::Removed),
                (String::from("c"), DiffKind::Added),
            ]
        );
    }

    #[test]
    fn test_numbers_compare_numerically() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with("cpu", 2);
        let live = StateTree::new().with("cpu", 2.0);
        assert!(engine.diff(&desired, &live, &no_ignore()).unwrap().is_empty());

        let string_live = StateTree::new().with("cpu", "2");
        assert_eq!(
            engine.diff(&desired, &string_live, &no_ignore()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_reordered_sets_are_equal() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with(
            "security_groups",
            StateValue::set([Scalar::Str("sg-1".into()), Scalar::Str("sg-2".into())]),
        );
        let live = StateTree::new().with(
            "security_groups",
            StateValue::List(vec![StateValue::from("sg-2"), StateValue::from("sg-1")]),
        );
        assert!(engine.diff(&desired, &live, &no_ignore()).unwrap().is_empty());
    }

    #[test]
    fn test_lists_compare_positionally() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with(
            "command",
            vec![StateValue::from("sh"), StateValue::from("-c")],
        );
        let live = StateTree::new().with(
            "command",
            vec![StateValue::from("-c"), StateValue::from("sh")],
        );

        let diffs = engine.diff(&desired, &live, &no_ignore()).unwrap();
        let paths: Vec<String> = diffs.iter().map(|d| d.path.to_string()).collect();
        assert_eq!(paths, vec!["command.0", "command.1"]);
    }

    #[test]
    fn test_ignored_subtree_never_surfaces() {
        let engine = DiffEngine::new();
        let pod = ResourceIdentity::new("k8s_pod", "api");
        let desired = StateTree::new().with(
            "status",
            StateTree::new().with("hostIP", "10.0.0.1").with("phase", "Running"),
        );
        let live = StateTree::new().with(
            "status",
            StateTree::new()
                .with("hostIP", StateTree::new().with("v4", "10.0.0.2"))
                .with("phase", "Running"),
        );
        let ignore = GlobSet::from_patterns(["k8s_pod.status.hostIP"]).unwrap();

        let diffs = engine.diff_resource(&pod, &desired, &live, &ignore).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_ignored_paths_pruned_from_added_values() {
        let engine = DiffEngine::new();
        let desired = StateTree::new();
        let live = StateTree::new().with(
            "metadata",
            StateTree::new().with("name", "x").with("last_modified", "now"),
        );
        let ignore = GlobSet::from_patterns(["metadata.last_modified"]).unwrap();

        let diffs = engine.diff(&desired, &live, &ignore).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(
            diffs[0].live_value,
            Some(StateValue::from(StateTree::new().with("name", "x")))
        );
    }

    #[test]
    fn test_type_change_is_single_entry() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with("tags", StateTree::new().with("env", "prod"));
        let live = StateTree::new().with("tags", "none");

        let diffs = engine.diff(&desired, &live, &no_ignore()).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DiffKind::Changed);
    }

    #[test]
    fn test_output_is_depth_first_ordered() {
        let engine = DiffEngine::new();
        let desired = StateTree::new()
            .with("z", 1)
            .with("a", StateTree::new().with("b", 1).with("a", 1));
        let live = StateTree::new()
            .with("z", 2)
            .with("a", StateTree::new().with("b", 2).with("a", 2));

        let paths: Vec<String> = engine
            .diff(&desired, &live, &no_ignore())
            .unwrap()
            .iter()
            .map(|d| d.path.to_string())
            .collect();
        assert_eq!(paths, vec!["a.a", "a.b", "z"]);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let engine = DiffEngine::new();
        let desired = sample_tree();
        let live = sample_tree().with("replicas", 4).with("extra", true);

        let first = engine.diff(&desired, &live, &no_ignore()).unwrap();
        let second = engine.diff(&desired, &live, &no_ignore()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_tree_fails_atomically() {
        let engine = DiffEngine::new();
        let desired = StateTree::new().with("replicas", 3);
        let live = StateTree::new()
            .with("replicas", 5)
            .with("ratio", Scalar::Float(f64::INFINITY));

        let result = engine.diff(&desired, &live, &no_ignore());
        assert!(matches!(result, Err(StateTreeError::NonFiniteNumber { .. })));
    }
}
