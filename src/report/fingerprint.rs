//! Drift fingerprinting for deduplication.
//!
//! A fingerprint is a SHA-256 over the resource identifier and the diff
//! entries sorted by path. Values are written in a canonical, type-tagged,
//! length-prefixed encoding so identical drift always hashes the same way
//! and distinct drift cannot collide by concatenation.

use sha2::{Digest, Sha256};

use crate::tree::{Scalar, StateValue};

use super::types::{DiffEntry, DiffKind};

/// Hasher for computing drift fingerprints.
#[derive(Debug, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    /// Creates a new fingerprinter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a resource's drift.
    ///
    /// The result does not depend on the order of `diffs`.
    #[must_use]
    pub fn fingerprint(&self, resource_id: &str, diffs: &[DiffEntry]) -> String {
        let mut hasher = Sha256::new();

        write_str(&mut hasher, resource_id);

        let mut sorted: Vec<&DiffEntry> = diffs.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        hasher.update((sorted.len() as u64).to_be_bytes());
        for entry in sorted {
            write_str(&mut hasher, &entry.path.to_string());
            hasher.update([kind_tag(entry.kind)]);
            write_optional(&mut hasher, entry.desired_value.as_ref());
            write_optional(&mut hasher, entry.live_value.as_ref());
        }

        hex::encode(hasher.finalize())
    }
}

const fn kind_tag(kind: DiffKind) -> u8 {
    match kind {
        DiffKind::Added => b'a',
        DiffKind::Removed => b'r',
        DiffKind::Changed => b'c',
    }
}

fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn write_optional(hasher: &mut Sha256, value: Option<&StateValue>) {
    match value {
        None => hasher.update([b'_']),
        Some(v) => write_value(hasher, v),
    }
}

fn write_scalar(hasher: &mut Sha256, scalar: &Scalar) {
    match scalar {
        Scalar::Null => hasher.update([b'n']),
        Scalar::Bool(b) => hasher.update([b'b', u8::from(*b)]),
        Scalar::Int(i) => match i64::try_from(*i) {
            Ok(small) => {
                hasher.update([b'i']);
                hasher.update(small.to_be_bytes());
            }
            Err(_) => {
                hasher.update([b'I']);
                hasher.update(i.to_be_bytes());
            }
        },
        Scalar::Float(f) => {
            hasher.update([b'f']);
            hasher.update(f.to_bits().to_be_bytes());
        }
        Scalar::Str(s) => {
            hasher.update([b's']);
            write_str(hasher, s);
        }
    }
}

fn write_value(hasher: &mut Sha256, value: &StateValue) {
    match value {
        StateValue::Scalar(scalar) => write_scalar(hasher, scalar),
        StateValue::List(items) => {
            hasher.update([b'L']);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                write_value(hasher, item);
            }
        }
        StateValue::Set(set) => {
            hasher.update([b'S']);
            hasher.update((set.len() as u64).to_be_bytes());
            for item in set.items() {
                write_scalar(hasher, item);
            }
        }
        StateValue::Map(tree) => {
            hasher.update([b'M']);
            hasher.update((tree.len() as u64).to_be_bytes());
            for (key, item) in tree {
                write_str(hasher, key);
                write_value(hasher, item);
            }
        }
    }
}
