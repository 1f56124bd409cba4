//! File-level change detection between two repository snapshots.
//!
//! Compares the persisted file-hash mapping with a freshly downloaded one and
//! produces the sets of paths that must be re-chunked or whose chunks must be
//! deleted. Pure and deterministic; ordering is stable (`BTreeSet`).

use std::collections::{BTreeMap, BTreeSet};

/// Paths that changed (added or modified) and paths that were deleted between
/// two snapshots of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Present in the new snapshot with a different hash, or new entirely.
    pub changed: BTreeSet<String>,
    /// Present only in the old snapshot.
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Diff two file-hash mappings.
///
/// An empty `old` mapping means a first-time index: every path in `new` is
/// reported as changed and nothing as deleted.
pub fn diff_file_hashes(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    for (path, hash) in new {
        if old.get(path) != Some(hash) {
            set.changed.insert(path.clone());
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            set.deleted.insert(path.clone());
        }
    }

    set
}

/// Paths present in both mappings with identical hashes. Not consumed by the
/// pipeline; kept so the partition can be validated.
pub fn unchanged(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    new.iter()
        .filter(|(path, hash)| old.get(*path) == Some(*hash))
        .map(|(path, _)| path.clone())
        .collect()
}
