//! Core data model for the DB2 reconciliation engine: raw legacy rows, their
//! declared schema, and the per-entity sync contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod coerce;
pub mod entity;

pub use entity::{
    null_as_empty, DerivedLookup, EntityConfigError, EntitySyncConfig, IdentityStrategy, NaturalKey,
    Normalizer, TargetRecord, DEFAULT_CHUNK_SIZE, DEFAULT_ITERATION_LIMIT,
};

pub const CRATE_NAME: &str = "db2sync-core";

/// One scalar cell as read from the legacy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Null, or text that is empty once trimmed.
    pub fn is_blank(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Number(_) => false,
            Scalar::Text(text) => text.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Number(_) => "number",
            Scalar::Text(_) => "text",
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}

static NULL_SCALAR: Scalar = Scalar::Null;

/// Untyped legacy row: column name -> scalar, exactly as read for one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    columns: BTreeMap<String, Scalar>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Missing columns read as null.
    pub fn get(&self, column: &str) -> &Scalar {
        self.columns.get(column).unwrap_or(&NULL_SCALAR)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Right-trims every text cell; CHAR columns come back blank-padded.
    pub fn trim_text_end(&mut self) {
        for value in self.columns.values_mut() {
            if let Scalar::Text(text) = value {
                let trimmed_len = text.trim_end().len();
                text.truncate(trimmed_len);
            }
        }
    }

    /// Column-sorted JSON rendering, stable across runs.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.columns).unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, Scalar)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, Scalar)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    Text,
    Number,
    /// DECIMAL columns: the legacy driver hands these over either as numbers
    /// or as their text rendering.
    Decimal,
    Any,
}

impl ScalarKind {
    fn accepts(self, value: &Scalar) -> bool {
        match (self, value) {
            (_, Scalar::Null) | (ScalarKind::Any, _) => true,
            (ScalarKind::Text, Scalar::Text(_)) => true,
            (ScalarKind::Number, Scalar::Number(_)) => true,
            (ScalarKind::Decimal, Scalar::Number(_) | Scalar::Text(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ScalarKind,
    pub nullable: bool,
}

impl ColumnSpec {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ScalarKind::Text,
            nullable: false,
        }
    }

    pub const fn number(name: &'static str) -> Self {
        Self {
            name,
            kind: ScalarKind::Number,
            nullable: false,
        }
    }

    pub const fn decimal(name: &'static str) -> Self {
        Self {
            name,
            kind: ScalarKind::Decimal,
            nullable: false,
        }
    }

    pub const fn any(name: &'static str) -> Self {
        Self {
            name,
            kind: ScalarKind::Any,
            nullable: true,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("row {row}: missing column {column}")]
    MissingColumn { row: usize, column: &'static str },
    #[error("row {row}: column {column} is null but not nullable")]
    UnexpectedNull { row: usize, column: &'static str },
    #[error("row {row}: column {column} expected {expected:?}, found {found}")]
    KindMismatch {
        row: usize,
        column: &'static str,
        expected: ScalarKind,
        found: &'static str,
    },
}

/// Ordered legacy column layout for one entity's query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSchema {
    columns: Vec<ColumnSpec>,
}

impl RowSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Columns not named in the schema are allowed and kept.
    pub fn validate(&self, row: usize, record: &RawRecord) -> Result<(), SchemaError> {
        for spec in &self.columns {
            if !record.contains(spec.name) {
                return Err(SchemaError::MissingColumn {
                    row,
                    column: spec.name,
                });
            }
            let value = record.get(spec.name);
            if value.is_null() && !spec.nullable {
                return Err(SchemaError::UnexpectedNull {
                    row,
                    column: spec.name,
                });
            }
            if !spec.kind.accepts(value) {
                return Err(SchemaError::KindMismatch {
                    row,
                    column: spec.name,
                    expected: spec.kind,
                    found: value.kind_name(),
                });
            }
        }
        Ok(())
    }

    pub fn validate_all(&self, rows: &[RawRecord]) -> Result<(), SchemaError> {
        rows.iter()
            .enumerate()
            .try_for_each(|(row, record)| self.validate(row, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_deserializes_untagged_json() {
        let row: RawRecord =
            serde_json::from_str(r#"{"BOAT#Z":"ABC  ","DEPDDZ":12,"CNTRYZ":null}"#).expect("row");
        assert_eq!(row.get("BOAT#Z"), &Scalar::Text("ABC  ".into()));
        assert_eq!(row.get("DEPDDZ"), &Scalar::Number(12.0));
        assert!(row.get("CNTRYZ").is_null());
        assert!(row.get("MISSING").is_null());
    }

    #[test]
    fn trim_text_end_only_touches_trailing_padding() {
        let mut row = RawRecord::new().with("NAME", "  Lucky Star   ").with("N", 3.0);
        row.trim_text_end();
        assert_eq!(row.get("NAME").as_text(), Some("  Lucky Star"));
        assert_eq!(row.get("N").as_number(), Some(3.0));
    }

    #[test]
    fn canonical_json_ignores_insertion_order() {
        let a = RawRecord::new().with("B", "2").with("A", "1");
        let b = RawRecord::new().with("A", "1").with("B", "2");
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn schema_rejects_missing_and_mistyped_columns() {
        let schema = RowSchema::new(vec![
            ColumnSpec::text("CODE"),
            ColumnSpec::number("QTY").nullable(),
            ColumnSpec::decimal("WEIGHT").nullable(),
        ]);

        let ok = RawRecord::new()
            .with("CODE", "A1")
            .with("QTY", Scalar::Null)
            .with("WEIGHT", "12.50")
            .with("EXTRA", 1.0);
        assert_eq!(schema.validate(0, &ok), Ok(()));

        let missing = RawRecord::new().with("CODE", "A1").with("QTY", 1.0);
        assert_eq!(
            schema.validate(3, &missing),
            Err(SchemaError::MissingColumn {
                row: 3,
                column: "WEIGHT"
            })
        );

        let mistyped = RawRecord::new()
            .with("CODE", 7.0)
            .with("QTY", 1.0)
            .with("WEIGHT", 1.0);
        assert!(matches!(
            schema.validate(1, &mistyped),
            Err(SchemaError::KindMismatch { column: "CODE", .. })
        ));

        let null_key = RawRecord::new()
            .with("CODE", Scalar::Null)
            .with("QTY", 1.0)
            .with("WEIGHT", 1.0);
        assert!(matches!(
            schema.validate_all(&[ok, null_key]),
            Err(SchemaError::UnexpectedNull { row: 1, .. })
        ));
    }
}
