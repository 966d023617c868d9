//! Per-entity sync contract: identity strategy, normalizer and the static
//! configuration one reconciliation pass runs against.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::{RawRecord, RowSchema};

pub const DEFAULT_ITERATION_LIMIT: usize = 5000;
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Canonical entity shape as stored by the remote system of record.
pub trait TargetRecord:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn id(&self) -> &str;
}

/// Non-surrogate key fields used to match records across systems.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            parts
                .into_iter()
                .map(|part| part.as_ref().trim_end().to_string())
                .collect(),
        )
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Identifier synthesized when no known target carries this key.
    pub fn composite_id(&self) -> String {
        self.0.join("-")
    }
}

/// Natural-key extractors for the derived-lookup strategy.
pub struct DerivedLookup<E> {
    pub source_key: fn(&RawRecord) -> NaturalKey,
    pub target_key: fn(&E) -> NaturalKey,
}

impl<E> Clone for DerivedLookup<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for DerivedLookup<E> {}

impl<E> fmt::Debug for DerivedLookup<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedLookup").finish_non_exhaustive()
    }
}

pub enum IdentityStrategy<E> {
    /// Right-trimmed value of one legacy column.
    DeclaredKey(&'static str),
    /// Pass-relative row index + 1.
    Positional,
    DerivedLookup(DerivedLookup<E>),
}

impl<E> Clone for IdentityStrategy<E> {
    fn clone(&self) -> Self {
        match self {
            Self::DeclaredKey(column) => Self::DeclaredKey(*column),
            Self::Positional => Self::Positional,
            Self::DerivedLookup(lookup) => Self::DerivedLookup(*lookup),
        }
    }
}

impl<E> fmt::Debug for IdentityStrategy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeclaredKey(column) => f.debug_tuple("DeclaredKey").field(column).finish(),
            Self::Positional => f.write_str("Positional"),
            Self::DerivedLookup(lookup) => f.debug_tuple("DerivedLookup").field(lookup).finish(),
        }
    }
}

/// Maps one raw row (plus the record it would replace) into the target's
/// canonical shape. Must be pure: the diff relies on plain equality.
pub trait Normalizer<E>: Send + Sync {
    fn normalize(&self, existing: Option<&E>, raw: &RawRecord, id: &str) -> E;
}

impl<E, F> Normalizer<E> for F
where
    F: Fn(Option<&E>, &RawRecord, &str) -> E + Send + Sync,
{
    fn normalize(&self, existing: Option<&E>, raw: &RawRecord, id: &str) -> E {
        self(existing, raw, id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityConfigError {
    #[error("{entity}: iteration limit must be at least 1")]
    ZeroIterationLimit { entity: String },
    #[error("{entity}: chunk size must be at least 1")]
    ZeroChunkSize { entity: String },
}

/// Static configuration for one entity type. Built once, never mutated
/// during a pass.
pub struct EntitySyncConfig<E> {
    pub item_name: String,
    pub item_plural_name: String,
    pub legacy_query: String,
    pub list_query: String,
    /// Field under `data` holding `{ nodes: [...] }`.
    pub list_field: String,
    pub upsert_mutation: String,
    /// Input field the upsert mutation expects the record array under.
    pub upsert_field: String,
    pub delete_mutation: Option<String>,
    pub iteration_limit: usize,
    pub chunk_size: usize,
    pub schema: RowSchema,
    pub identity: IdentityStrategy<E>,
    pub normalizer: Arc<dyn Normalizer<E>>,
}

impl<E> EntitySyncConfig<E> {
    pub fn validate(&self) -> Result<(), EntityConfigError> {
        if self.iteration_limit == 0 {
            return Err(EntityConfigError::ZeroIterationLimit {
                entity: self.item_name.clone(),
            });
        }
        if self.chunk_size == 0 {
            return Err(EntityConfigError::ZeroChunkSize {
                entity: self.item_name.clone(),
            });
        }
        Ok(())
    }
}

impl<E> Clone for EntitySyncConfig<E> {
    fn clone(&self) -> Self {
        Self {
            item_name: self.item_name.clone(),
            item_plural_name: self.item_plural_name.clone(),
            legacy_query: self.legacy_query.clone(),
            list_query: self.list_query.clone(),
            list_field: self.list_field.clone(),
            upsert_mutation: self.upsert_mutation.clone(),
            upsert_field: self.upsert_field.clone(),
            delete_mutation: self.delete_mutation.clone(),
            iteration_limit: self.iteration_limit,
            chunk_size: self.chunk_size,
            schema: self.schema.clone(),
            identity: self.identity.clone(),
            normalizer: Arc::clone(&self.normalizer),
        }
    }
}

impl<E> fmt::Debug for EntitySyncConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySyncConfig")
            .field("item_name", &self.item_name)
            .field("list_field", &self.list_field)
            .field("upsert_field", &self.upsert_field)
            .field("iteration_limit", &self.iteration_limit)
            .field("chunk_size", &self.chunk_size)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Reads a nullable remote string column as an empty string.
pub fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
