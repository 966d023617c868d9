//! Diff engine: partitions source and target identifiers into new, changed,
//! unchanged and removed.

use std::collections::HashSet;

use db2sync_core::{Normalizer, TargetRecord};
use serde::Serialize;

use crate::identity::{IdentityMap, SourceRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change<E> {
    pub old: E,
    pub new: E,
}

/// Outcome of one diff. `new` and `changed` follow source row order,
/// `removed` follows remote list order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation<E> {
    pub new: Vec<E>,
    pub changed: Vec<Change<E>>,
    pub unchanged: Vec<String>,
    pub removed: Vec<E>,
}

impl<E> Default for Reconciliation<E> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            changed: Vec::new(),
            unchanged: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<E: TargetRecord> Reconciliation<E> {
    /// True when nothing needs to be written.
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Records to upsert: new first, then changed.
    pub fn upserts(&self) -> Vec<&E> {
        self.new
            .iter()
            .chain(self.changed.iter().map(|change| &change.new))
            .collect()
    }

    pub fn new_ids(&self) -> Vec<String> {
        self.new.iter().map(|record| record.id().to_string()).collect()
    }

    pub fn changed_ids(&self) -> Vec<String> {
        self.changed
            .iter()
            .map(|change| change.old.id().to_string())
            .collect()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.removed
            .iter()
            .map(|record| record.id().to_string())
            .collect()
    }
}

/// Diffs a full source against the full identity map.
pub fn diff<E: TargetRecord>(
    targets: &IdentityMap<E>,
    source: &[SourceRow],
    normalizer: &dyn Normalizer<E>,
) -> Reconciliation<E> {
    let source_ids: HashSet<&str> = source.iter().map(|row| row.id.as_str()).collect();
    diff_window(targets, source, targets.records(), &source_ids, normalizer)
}

/// Diffs one window. `source_slice` is classified against the whole
/// identity map; removals are drawn only from `removal_candidates`, and a
/// candidate counts as removed when its identifier is absent from
/// `source_ids`, the identifiers of the entire pass.
pub fn diff_window<E: TargetRecord>(
    targets: &IdentityMap<E>,
    source_slice: &[SourceRow],
    removal_candidates: &[E],
    source_ids: &HashSet<&str>,
    normalizer: &dyn Normalizer<E>,
) -> Reconciliation<E> {
    let mut out = Reconciliation::default();

    for row in source_slice {
        match targets.get(&row.id) {
            None => out.new.push(normalizer.normalize(None, &row.raw, &row.id)),
            Some(existing) => {
                let candidate = normalizer.normalize(Some(existing), &row.raw, &row.id);
                if candidate == *existing {
                    out.unchanged.push(row.id.clone());
                } else {
                    out.changed.push(Change {
                        old: existing.clone(),
                        new: candidate,
                    });
                }
            }
        }
    }

    out.removed = removal_candidates
        .iter()
        .filter(|record| !source_ids.contains(record.id()))
        .cloned()
        .collect();

    out
}
