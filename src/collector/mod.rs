//! State collection.
//!
//! Collectors fetch the desired and live state of a resource and normalize
//! it into a `StateTree`. The detector holds one collector per resource
//! universe.

mod snapshot;
mod source;

pub use snapshot::SnapshotCollector;
pub use source::{Side, StateCollector};

#[cfg(test)]
pub use source::MockStateCollector;
