//! Identity resolution: the remote identity map and the per-row identifier
//! each legacy record maps onto.

use std::collections::HashMap;

use db2sync_core::coerce::text;
use db2sync_core::{IdentityStrategy, NaturalKey, RawRecord, TargetRecord};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Remote records of one entity type keyed by identifier, in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMap<E> {
    records: Vec<E>,
    index: HashMap<String, usize>,
}

impl<E: TargetRecord> IdentityMap<E> {
    /// A repeated identifier keeps its first position and its last value.
    pub fn from_records(records: Vec<E>) -> Self {
        let mut kept: Vec<E> = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            match index.get(record.id()) {
                Some(&position) => {
                    debug!(id = record.id(), "duplicate identifier in remote list");
                    kept[position] = record;
                }
                None => {
                    index.insert(record.id().to_string(), kept.len());
                    kept.push(record);
                }
            }
        }
        Self {
            records: kept,
            index,
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn records(&self) -> &[E] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One legacy row with its resolved identifier. `index` is the zero-based
/// row position across the whole pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub id: String,
    pub index: usize,
    pub raw: RawRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateSourceId {
    pub id: String,
    pub first_row: usize,
    pub row: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSource {
    pub rows: Vec<SourceRow>,
    pub duplicates: Vec<DuplicateSourceId>,
}

/// Placeholder for rows whose declared key is null or blank: a deterministic
/// function of the row content, so the row surfaces as an addition and
/// converges once upserted.
pub fn placeholder_id(raw: &RawRecord) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.canonical_json().as_bytes());
    format!("unkeyed-{digest}")
}

pub struct IdentityResolver<'a, E> {
    strategy: &'a IdentityStrategy<E>,
    by_natural_key: HashMap<NaturalKey, &'a str>,
}

impl<'a, E: TargetRecord> IdentityResolver<'a, E> {
    /// Indexes `known` by natural key up front so derived lookups are O(1).
    /// When several known records share a key, the first in list order wins.
    pub fn new(strategy: &'a IdentityStrategy<E>, known: &'a IdentityMap<E>) -> Self {
        let mut by_natural_key = HashMap::new();
        if let IdentityStrategy::DerivedLookup(lookup) = strategy {
            for record in known.iter() {
                by_natural_key
                    .entry((lookup.target_key)(record))
                    .or_insert(record.id());
            }
        }
        Self {
            strategy,
            by_natural_key,
        }
    }

    pub fn resolve(&self, raw: &RawRecord, global_index: usize) -> String {
        match self.strategy {
            IdentityStrategy::DeclaredKey(column) => {
                let key = text(raw.get(column));
                if key.trim().is_empty() {
                    let id = placeholder_id(raw);
                    warn!(column, row = global_index, id = %id, "row has no key; using placeholder id");
                    id
                } else {
                    key
                }
            }
            IdentityStrategy::Positional => (global_index + 1).to_string(),
            IdentityStrategy::DerivedLookup(lookup) => {
                let key = (lookup.source_key)(raw);
                match self.by_natural_key.get(&key) {
                    Some(id) => id.to_string(),
                    None => key.composite_id(),
                }
            }
        }
    }

    /// Resolves every row of a pass. Rows resolving to an identifier already
    /// seen replace the earlier row's values but keep its position.
    pub fn resolve_all(&self, rows: Vec<RawRecord>) -> ResolvedSource {
        let mut resolved = ResolvedSource {
            rows: Vec::with_capacity(rows.len()),
            duplicates: Vec::new(),
        };
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());

        for (index, raw) in rows.into_iter().enumerate() {
            let id = self.resolve(&raw, index);
            match positions.get(&id) {
                Some(&position) => {
                    let first_row = resolved.rows[position].index;
                    warn!(id = %id, first_row, row = index, "legacy rows resolve to the same identifier; keeping the later row");
                    resolved.duplicates.push(DuplicateSourceId {
                        id,
                        first_row,
                        row: index,
                    });
                    resolved.rows[position].raw = raw;
                }
                None => {
                    positions.insert(id.clone(), resolved.rows.len());
                    resolved.rows.push(SourceRow { id, index, raw });
                }
            }
        }
        resolved
    }
}
