//! Normalized state trees.
//!
//! This module provides:
//! - State values with numeric, set and list comparison rules
//! - Dotted paths addressing nodes inside a tree
//! - Path globs used by ignore and classification rules

mod glob;
mod path;
mod value;

pub use glob::{GlobSet, PathGlob, Specificity};
pub use path::{DiffPath, PathSegment};
pub use value::{ConversionOptions, MAX_DEPTH, Scalar, ScalarSet, StateTree, StateValue};
