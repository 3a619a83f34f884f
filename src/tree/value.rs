//! Normalized state values.
//!
//! A [`StateTree`] is the normalized form of a resource's desired or live
//! state as handed over by a collector. Values are a tagged variant of
//! scalar, ordered sequence, unordered scalar set or nested mapping, each
//! with its own comparison rule:
//!
//! - numbers compare numerically (`3 == 3.0`),
//! - sets compare order-insensitively,
//! - lists compare positionally.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use crate::error::StateTreeError;

use super::glob::GlobSet;
use super::path::DiffPath;

/// Maximum nesting depth accepted for a state tree.
pub const MAX_DEPTH: usize = 64;

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Bounds of the `i128` range as `f64` (2^127).
const I128_UPPER: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

/// A scalar leaf value.
#[derive(Debug, Clone)]
pub enum Scalar {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer, wide enough to hold every `i64` and `u64` exactly.
    Int(i128),
    /// Floating point number with a fractional part or outside the exact range.
    Float(f64),
    /// String.
    Str(String),
}

/// An unordered collection of scalars, kept sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalarSet {
    items: Vec<Scalar>,
}

/// A normalized state value.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// Scalar leaf.
    Scalar(Scalar),
    /// Ordered sequence, compared positionally.
    List(Vec<StateValue>),
    /// Unordered collection of scalars, compared as a set.
    Set(ScalarSet),
    /// Nested mapping.
    Map(StateTree),
}

/// An ordered mapping from key to value; the root of a resource's state.
///
/// Trees have no mutating API: build them with [`StateTree::with`],
/// [`FromIterator`] or [`StateTree::from_json`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTree {
    entries: BTreeMap<String, StateValue>,
}

/// Options for converting JSON documents into state trees.
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    /// Arrays of scalars at these paths stay ordered lists instead of sets.
    pub ordered_paths: GlobSet,
    /// Prefix prepended to paths before matching `ordered_paths`.
    pub prefix: DiffPath,
}

impl Scalar {
    /// Creates a number, normalizing integral floats to integers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn float(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT_INT {
            return Self::Int(value as i128);
        }
        Self::Float(value)
    }

    /// Returns a short name of the scalar kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
        }
    }

    /// Returns false for NaN or infinite floats.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            _ => true,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
        }
    }
}

/// Exact comparison of an integer with a float.
#[allow(clippy::cast_possible_truncation)]
fn cmp_int_float(int: i128, float: f64) -> Ordering {
    if float.is_nan() {
        return Ordering::Less;
    }
    if float >= I128_UPPER {
        return Ordering::Less;
    }
    if float < -I128_UPPER {
        return Ordering::Greater;
    }

    let truncated = float.trunc();
    match int.cmp(&(truncated as i128)) {
        Ordering::Equal => {
            if float > truncated {
                Ordering::Less
            } else if float < truncated {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(*a, *b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl ScalarSet {
    /// Returns the members in canonical order.
    #[must_use]
    pub fn items(&self) -> &[Scalar] {
        &self.items
    }

    /// Returns the number of distinct members.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Scalar> for ScalarSet {
    fn from_iter<T: IntoIterator<Item = Scalar>>(iter: T) -> Self {
        let mut items: Vec<Scalar> = iter.into_iter().collect();
        items.sort();
        items.dedup();
        Self { items }
    }
}

impl StateValue {
    /// Creates a set value from scalars.
    pub fn set<I: IntoIterator<Item = Scalar>>(items: I) -> Self {
        Self::Set(items.into_iter().collect())
    }

    /// Creates a null scalar.
    #[must_use]
    pub const fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    /// Returns a short name of the value kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(scalar) => scalar.kind(),
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    /// Returns the scalar if this value is one.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// Returns the nested tree if this value is a mapping.
    #[must_use]
    pub const fn as_map(&self) -> Option<&StateTree> {
        match self {
            Self::Map(tree) => Some(tree),
            _ => None,
        }
    }

    /// Compares two values under the normalization rules.
    ///
    /// Identical to `==` except that a set compared with a list of scalars
    /// compares as sets.
    #[must_use]
    pub fn normalized_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Set(set), Self::List(list)) | (Self::List(list), Self::Set(set)) => {
                scalars_of(list).is_some_and(|scalars| scalars == *set)
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.normalized_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => a.normalized_eq(b),
            _ => self == other,
        }
    }

    fn validate(&self, path: &DiffPath, depth: usize) -> Result<(), StateTreeError> {
        if depth > MAX_DEPTH {
            return Err(StateTreeError::DepthExceeded {
                path: path.to_string(),
                limit: MAX_DEPTH,
            });
        }

        match self {
            Self::Scalar(scalar) => check_finite(scalar, path),
            Self::Set(set) => set.items.iter().try_for_each(|s| check_finite(s, path)),
            Self::List(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| item.validate(&path.index(i), depth + 1)),
            Self::Map(tree) => tree.validate_at(path, depth),
        }
    }

    fn from_json_at(
        value: &serde_json::Value,
        path: &DiffPath,
        options: &ConversionOptions,
    ) -> Self {
        match value {
            serde_json::Value::Null => Self::null(),
            serde_json::Value::Bool(b) => Self::Scalar(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => Self::Scalar(number_to_scalar(n)),
            serde_json::Value::String(s) => Self::Scalar(Scalar::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let all_scalars = items.iter().all(|v| !v.is_array() && !v.is_object());
                let ordered = options.ordered_paths.matches_path(&options.prefixed(path));
                let converted: Vec<Self> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Self::from_json_at(v, &path.index(i), options))
                    .collect();

                if all_scalars && !ordered {
                    Self::Set(
                        converted
                            .into_iter()
                            .filter_map(|v| match v {
                                Self::Scalar(s) => Some(s),
                                _ => None,
                            })
                            .collect(),
                    )
                } else {
                    Self::List(converted)
                }
            }
            serde_json::Value::Object(map) => Self::Map(StateTree {
                entries: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json_at(v, &path.child(k), options)))
                    .collect(),
            }),
        }
    }
}

fn check_finite(scalar: &Scalar, path: &DiffPath) -> Result<(), StateTreeError> {
    if scalar.is_finite() {
        Ok(())
    } else {
        Err(StateTreeError::NonFiniteNumber {
            path: path.to_string(),
        })
    }
}

fn scalars_of(list: &[StateValue]) -> Option<ScalarSet> {
    list.iter()
        .map(|v| v.as_scalar().cloned())
        .collect::<Option<ScalarSet>>()
}

fn number_to_scalar(n: &serde_json::Number) -> Scalar {
    if let Some(i) = n.as_i64() {
        Scalar::Int(i128::from(i))
    } else if let Some(u) = n.as_u64() {
        Scalar::Int(i128::from(u))
    } else {
        Scalar::float(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl ConversionOptions {
    /// Creates options that keep arrays at the given paths ordered.
    #[must_use]
    pub const fn new(ordered_paths: GlobSet, prefix: DiffPath) -> Self {
        Self {
            ordered_paths,
            prefix,
        }
    }

    fn prefixed(&self, path: &DiffPath) -> DiffPath {
        let mut full = self.prefix.clone();
        for segment in path.segments() {
            full = match segment {
                super::path::PathSegment::Key(key) => full.child(key),
                super::path::PathSegment::Index(i) => full.index(*i),
            };
        }
        full
    }
}

impl StateTree {
    /// Creates an empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Returns the tree with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Looks up a direct child.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, StateValue> {
        self.entries.iter()
    }

    /// Iterates over keys in order.
    pub fn keys(&self) -> btree_map::Keys<'_, String, StateValue> {
        self.entries.keys()
    }

    /// Returns the number of direct children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks depth, keys and numbers across the whole tree.
    ///
    /// # Errors
    ///
    /// Returns the first malformation found.
    pub fn validate(&self) -> Result<(), StateTreeError> {
        self.validate_at(&DiffPath::new(), 0)
    }

    fn validate_at(&self, path: &DiffPath, depth: usize) -> Result<(), StateTreeError> {
        if depth + 1 > MAX_DEPTH {
            return Err(StateTreeError::DepthExceeded {
                path: path.to_string(),
                limit: MAX_DEPTH,
            });
        }

        for (key, value) in &self.entries {
            if key.is_empty() {
                return Err(StateTreeError::EmptyKey {
                    path: path.to_string(),
                });
            }
            value.validate(&path.child(key), depth + 1)?;
        }
        Ok(())
    }

    /// Converts a JSON document into a validated tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not an object or the result is malformed.
    pub fn from_json(
        value: &serde_json::Value,
        options: &ConversionOptions,
    ) -> Result<Self, StateTreeError> {
        if !value.is_object() {
            return Err(StateTreeError::NotAMapping {
                found: json_kind(value).to_string(),
            });
        }

        match StateValue::from_json_at(value, &DiffPath::new(), options) {
            StateValue::Map(tree) => {
                tree.validate()?;
                Ok(tree)
            }
            other => Err(StateTreeError::NotAMapping {
                found: other.kind().to_string(),
            }),
        }
    }

    fn normalized_eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|((ka, va), (kb, vb))| ka == kb && va.normalized_eq(vb))
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl FromIterator<(String, StateValue)> for StateTree {
    fn from_iter<T: IntoIterator<Item = (String, StateValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a StateTree {
    type Item = (&'a String, &'a StateValue);
    type IntoIter = btree_map::Iter<'a, String, StateValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl From<Scalar> for StateValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<StateTree> for StateValue {
    fn from(value: StateTree) -> Self {
        Self::Map(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int(i128::from(value)))
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        Self::Scalar(Scalar::Int(i128::from(value)))
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        Self::Scalar(Scalar::Int(i128::from(value)))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::float(value))
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::Str(value.to_string()))
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::Scalar(Scalar::Str(value))
    }
}

impl From<Vec<Self>> for StateValue {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => {
                if let Ok(small) = i64::try_from(*i) {
                    serializer.serialize_i64(small)
                } else if let Ok(unsigned) = u64::try_from(*i) {
                    serializer.serialize_u64(unsigned)
                } else {
                    serializer.serialize_i128(*i)
                }
            }
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl Serialize for ScalarSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(scalar) => scalar.serialize(serializer),
            Self::Set(set) => set.serialize(serializer),
            Self::Map(tree) => tree.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl Serialize for StateTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{rendered}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(Scalar::Int(3), Scalar::float(3.0));
        assert_eq!(Scalar::Int(3), Scalar::Float(3.0));
        assert!(Scalar::Int(3) < Scalar::Float(3.5));
        assert!(Scalar::Float(-0.5) < Scalar::Int(0));
        assert_ne!(Scalar::Int(3), Scalar::Str(String::from("3")));
    }

    #[test]
    fn test_large_unsigned_integers_stay_exact() {
        let desired = StateTree::from_json(
            &json!({"quota": 18_446_744_073_709_551_615_u64}),
            &ConversionOptions::default(),
        )
        .unwrap();
        let live = StateTree::from_json(
            &json!({"quota": 18_446_744_073_709_551_614_u64}),
            &ConversionOptions::default(),
        )
        .unwrap();

        assert_ne!(desired, live);
        assert_eq!(
            serde_json::to_value(&desired).unwrap(),
            json!({"quota": 18_446_744_073_709_551_615_u64})
        );
        assert!(Scalar::Int(i128::from(u64::MAX)) > Scalar::Int(i128::from(i64::MAX)));
        assert!(Scalar::Int(i128::from(u64::MAX)) < Scalar::Float(1e20));
    }

    #[test]
    fn test_integral_floats_normalize_to_int() {
        assert!(matches!(Scalar::float(5.0), Scalar::Int(5)));
        assert!(matches!(Scalar::float(5.5), Scalar::Float(_)));
    }

    #[test]
    fn test_sets_ignore_order_and_duplicates() {
        let a = StateValue::set([Scalar::Str("b".into()), Scalar::Str("a".into())]);
        let b = StateValue::set([
            Scalar::Str("a".into()),
            Scalar::Str("b".into()),
            Scalar::Str("a".into()),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_compares_with_scalar_list() {
        let set = StateValue::set([Scalar::Int(2), Scalar::Int(1)]);
        let list = StateValue::List(vec![StateValue::from(1), StateValue::from(2)]);
        assert!(set.normalized_eq(&list));
        assert!(list.normalized_eq(&set));
    }

    #[test]
    fn test_lists_compare_positionally() {
        let a = StateValue::List(vec![StateValue::from("x"), StateValue::from("y")]);
        let b = StateValue::List(vec![StateValue::from("y"), StateValue::from("x")]);
        assert!(!a.normalized_eq(&b));
    }

    #[test]
    fn test_from_json_scalar_arrays_become_sets() {
        let doc = json!({
            "security_groups": ["sg-2", "sg-1"],
            "containers": [{"name": "app"}],
            "command": ["sh", "-c", "run"]
        });
        let ordered = GlobSet::from_patterns(["command"]).unwrap();
        let options = ConversionOptions::new(ordered, DiffPath::new());
        let tree = StateTree::from_json(&doc, &options).unwrap();

        assert_eq!(tree.get("security_groups").map(StateValue::kind), Some("set"));
        assert_eq!(tree.get("containers").map(StateValue::kind), Some("list"));
        assert_eq!(tree.get("command").map(StateValue::kind), Some("list"));
    }

    #[test]
    fn test_from_json_ordered_paths_use_prefix() {
        let doc = json!({"args": ["b", "a"]});
        let ordered = GlobSet::from_patterns(["k8s_deployment.args"]).unwrap();
        let options = ConversionOptions::new(ordered, DiffPath::root("k8s_deployment"));
        let tree = StateTree::from_json(&doc, &options).unwrap();
        assert_eq!(tree.get("args").map(StateValue::kind), Some("list"));
    }

    #[test]
    fn test_from_json_rejects_non_mapping_root() {
        let err = StateTree::from_json(&json!([1, 2]), &ConversionOptions::default()).unwrap_err();
        assert!(matches!(err, StateTreeError::NotAMapping { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let tree = StateTree::new().with("spec", StateTree::new().with("", 1));
        assert_eq!(
            tree.validate(),
            Err(StateTreeError::EmptyKey {
                path: String::from("spec")
            })
        );
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let tree = StateTree::new().with("ratio", Scalar::Float(f64::NAN));
        assert!(matches!(
            tree.validate(),
            Err(StateTreeError::NonFiniteNumber { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_excessive_depth() {
        let mut tree = StateTree::new().with("leaf", 1);
        for i in 0..MAX_DEPTH + 1 {
            tree = StateTree::new().with(format!("level{i}"), tree);
        }
        assert!(matches!(
            tree.validate(),
            Err(StateTreeError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn test_serializes_to_plain_json() {
        let tree = StateTree::new()
            .with("replicas", 3)
            .with("ports", StateValue::set([Scalar::Int(443), Scalar::Int(80)]));
        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value, json!({"ports": [80, 443], "replicas": 3}));
    }
}
