//! Path addressing inside state trees.

use serde::{Serialize, Serializer};
use std::fmt;

/// A single step in a path: a mapping key or a sequence index.
///
/// Keys sort before indices; indices compare numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    /// Mapping key.
    Key(String),
    /// Position in an ordered sequence.
    Index(usize),
}

/// A dotted path such as `k8s_deployment.spec.template.spec.containers.0.image`.
///
/// Paths order segment by segment, so a parent sorts immediately before its
/// descendants and siblings sort by key. This is the order of a depth-first
/// walk over sorted keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiffPath {
    segments: Vec<PathSegment>,
}

impl DiffPath {
    /// Creates an empty (root) path.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Creates a path with a single key segment.
    #[must_use]
    pub fn root(key: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Key(key.into())],
        }
    }

    /// Returns this path extended with a key.
    #[must_use]
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self { segments }
    }

    /// Returns this path extended with a sequence index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true for the root path.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Renders the path for glob matching.
    ///
    /// Like [`fmt::Display`], but dots and backslashes inside keys are
    /// escaped so `labels.app\.kubernetes\.io/name` stays three segments.
    #[must_use]
    pub fn glob_key(&self) -> String {
        let mut rendered = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                rendered.push('.');
            }
            match segment {
                PathSegment::Key(key) => {
                    for ch in key.chars() {
                        if matches!(ch, '.' | '\\') {
                            rendered.push('\\');
                        }
                        rendered.push(ch);
                    }
                }
                PathSegment::Index(index) => rendered.push_str(&index.to_string()),
            }
        }
        rendered
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl fmt::Display for DiffPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for DiffPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
