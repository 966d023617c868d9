//! I/O seams of the reconciliation engine (legacy source readers, remote
//! target API) and the built-in entity catalogue.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use db2sync_core::{RawRecord, Scalar, SchemaError};
use db2sync_storage::{GraphQlClient, RemoteError};
use rust_decimal::Decimal;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

pub mod entities;

pub const CRATE_NAME: &str = "db2sync-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("legacy query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("column {column} has unsupported type {type_name}; cast it to text or float8 in the legacy query")]
    UnsupportedColumn { column: String, type_name: String },
    #[error("fixture {}: {message}", path.display())]
    Fixture { path: PathBuf, message: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Executes an entity's read-only legacy query and returns its rows in order.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, entity: &str, query: &str) -> Result<Vec<RawRecord>, SourceError>;
}

/// Remote system of record: full-collection list, bulk upsert, bulk delete.
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn list(&self, query: &str, list_field: &str) -> Result<Vec<JsonValue>, RemoteError>;

    async fn upsert(
        &self,
        mutation: &str,
        upsert_field: &str,
        records: Vec<JsonValue>,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, mutation: &str, ids: &[String]) -> Result<(), RemoteError>;
}

/// Legacy rows reached over a Postgres-wire gateway in front of DB2.
#[derive(Debug, Clone)]
pub struct SqlSourceReader {
    pool: PgPool,
}

impl SqlSourceReader {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to legacy database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SourceReader for SqlSourceReader {
    async fn read(&self, entity: &str, query: &str) -> Result<Vec<RawRecord>, SourceError> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        debug!(entity, rows = rows.len(), "legacy query returned");
        rows.iter().map(pg_row_to_raw).collect()
    }
}

/// How a gateway column type is read into a [`Scalar`]. BOOL and timestamp
/// columns have no legacy counterpart and are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnDecoder {
    Text,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    /// DB2 DECIMAL / NUMERIC, kept as exact text.
    Numeric,
    Date,
}

impl ColumnDecoder {
    fn for_type(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => Self::Text,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "DATE" => Self::Date,
            _ => return None,
        })
    }

    fn decode(self, row: &PgRow, idx: usize) -> Result<Scalar, sqlx::Error> {
        Ok(match self {
            Self::Text => row.try_get::<Option<String>, _>(idx)?.into(),
            Self::Int2 => row.try_get::<Option<i16>, _>(idx)?.map(i64::from).into(),
            Self::Int4 => row.try_get::<Option<i32>, _>(idx)?.map(i64::from).into(),
            Self::Int8 => row.try_get::<Option<i64>, _>(idx)?.into(),
            Self::Float4 => row.try_get::<Option<f32>, _>(idx)?.map(f64::from).into(),
            Self::Float8 => row.try_get::<Option<f64>, _>(idx)?.into(),
            Self::Numeric => row.try_get::<Option<Decimal>, _>(idx)?.map(numeric_scalar).into(),
            Self::Date => row.try_get::<Option<NaiveDate>, _>(idx)?.map(date_scalar).into(),
        })
    }
}

/// `12.50` stays `"12.50"`; the normalizers parse it like any numeric text.
fn numeric_scalar(value: Decimal) -> Scalar {
    Scalar::Text(value.to_string())
}

fn date_scalar(value: NaiveDate) -> Scalar {
    Scalar::Text(value.format("%Y-%m-%d").to_string())
}

fn pg_row_to_raw(row: &PgRow) -> Result<RawRecord, SourceError> {
    let mut record = RawRecord::new();
    for column in row.columns() {
        let type_name = column.type_info().name();
        let decoder =
            ColumnDecoder::for_type(type_name).ok_or_else(|| SourceError::UnsupportedColumn {
                column: column.name().to_string(),
                type_name: type_name.to_string(),
            })?;
        record.insert(column.name(), decoder.decode(row, column.ordinal())?);
    }
    Ok(record)
}

/// Reads `<dir>/<entity>.json`, a JSON array of row objects. Used for dry
/// runs without a legacy connection and in tests.
#[derive(Debug, Clone)]
pub struct FixtureSourceReader {
    dir: PathBuf,
}

impl FixtureSourceReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn fixture_path(&self, entity: &str) -> PathBuf {
        self.dir.join(format!("{entity}.json"))
    }
}

#[async_trait]
impl SourceReader for FixtureSourceReader {
    async fn read(&self, entity: &str, _query: &str) -> Result<Vec<RawRecord>, SourceError> {
        let path = self.fixture_path(entity);
        let text = fs::read_to_string(&path)
            .await
            .map_err(|err| fixture_error(&path, err))?;
        serde_json::from_str(&text).map_err(|err| fixture_error(&path, err))
    }
}

fn fixture_error(path: &Path, err: impl std::fmt::Display) -> SourceError {
    SourceError::Fixture {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// [`TargetApi`] over a PostGraphile-style GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlTarget {
    client: GraphQlClient,
}

impl GraphQlTarget {
    pub fn new(client: GraphQlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TargetApi for GraphQlTarget {
    async fn list(&self, query: &str, list_field: &str) -> Result<Vec<JsonValue>, RemoteError> {
        let data = self.client.request(list_field, query, json!({})).await?;
        data.get(list_field)
            .and_then(|collection| collection.get("nodes"))
            .and_then(JsonValue::as_array)
            .cloned()
            .ok_or_else(|| RemoteError::Shape(format!("missing {list_field}.nodes in list response")))
    }

    async fn upsert(
        &self,
        mutation: &str,
        upsert_field: &str,
        records: Vec<JsonValue>,
    ) -> Result<(), RemoteError> {
        let mut input = JsonMap::new();
        input.insert(upsert_field.to_string(), JsonValue::Array(records));
        self.client
            .request(upsert_field, mutation, json!({ "input": input }))
            .await?;
        Ok(())
    }

    async fn delete(&self, mutation: &str, ids: &[String]) -> Result<(), RemoteError> {
        self.client
            .request("idsToDelete", mutation, json!({ "input": { "idsToDelete": ids } }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db2sync_storage::{BackoffPolicy, GraphQlClientConfig};
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target_for(server: &MockServer) -> GraphQlTarget {
        let client = GraphQlClient::new(GraphQlClientConfig {
            endpoint: server.uri(),
            backoff: BackoffPolicy::none(),
            ..Default::default()
        })
        .expect("client");
        GraphQlTarget::new(client)
    }

    #[test]
    fn gateway_column_types_map_to_decoders() {
        assert_eq!(ColumnDecoder::for_type("BPCHAR"), Some(ColumnDecoder::Text));
        assert_eq!(ColumnDecoder::for_type("INT4"), Some(ColumnDecoder::Int4));
        assert_eq!(ColumnDecoder::for_type("NUMERIC"), Some(ColumnDecoder::Numeric));
        assert_eq!(ColumnDecoder::for_type("DATE"), Some(ColumnDecoder::Date));
        assert_eq!(ColumnDecoder::for_type("BOOL"), None);
        assert_eq!(ColumnDecoder::for_type("TIMESTAMPTZ"), None);
    }

    #[test]
    fn numeric_and_date_cells_satisfy_the_row_schema() {
        use db2sync_core::{coerce, ColumnSpec, RowSchema};

        let depth = numeric_scalar(Decimal::new(1250, 2));
        assert_eq!(depth, Scalar::from("12.50"));
        assert_eq!(coerce::parse_measurement(&depth), 12.5);

        let record = RawRecord::new()
            .with("DEPDDZ", depth)
            .with("SAILED", date_scalar(NaiveDate::from_ymd_opt(2024, 3, 5).expect("date")));
        assert_eq!(record.get("SAILED").as_text(), Some("2024-03-05"));
        assert_eq!(record.len(), 2);
        assert!(!record.is_empty());

        let schema = RowSchema::new(vec![ColumnSpec::decimal("DEPDDZ"), ColumnSpec::text("SAILED")]);
        assert_eq!(schema.columns().len(), 2);
        schema.validate(0, &record).expect("decimal text is accepted");
    }

    #[tokio::test]
    async fn fixture_reader_loads_rows_in_file_order() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("vessel.json"),
            r#"[{"BOAT#Z":"B2  ","ARVPTZ":"PHL"},{"BOAT#Z":"A1","ARVPTZ":null}]"#,
        )
        .expect("write fixture");

        let reader = FixtureSourceReader::new(dir.path());
        let rows = reader.read("vessel", "select 1").await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("BOAT#Z").as_text(), Some("B2  "));
        assert!(rows[1].get("ARVPTZ").is_null());
    }

    #[tokio::test]
    async fn missing_fixture_is_a_read_failure() {
        let dir = tempdir().expect("tempdir");
        let reader = FixtureSourceReader::new(dir.path());
        let err = reader.read("customer", "").await.expect_err("missing");
        assert!(matches!(err, SourceError::Fixture { .. }));
    }

    #[tokio::test]
    async fn list_unwraps_nodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "data": { "vessels": { "nodes": [{ "id": "A" }, { "id": "B" }] } } }),
            ))
            .mount(&server)
            .await;

        let nodes = target_for(&server)
            .list("query { vessels { nodes { id } } }", "vessels")
            .await
            .expect("list");
        assert_eq!(nodes, vec![json!({ "id": "A" }), json!({ "id": "B" })]);
    }

    #[tokio::test]
    async fn list_without_nodes_is_a_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&server)
            .await;

        let err = target_for(&server)
            .list("query { vessels { nodes { id } } }", "vessels")
            .await
            .expect_err("shape");
        assert!(matches!(err, RemoteError::Shape(_)));
    }

    #[tokio::test]
    async fn upsert_and_delete_send_named_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "input": { "vessels": [{ "id": "C" }] } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "bulkUpsertVessel": null } })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "input": { "idsToDelete": ["X", "Y"] } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "bulkDeleteVessel": null } })))
            .expect(1)
            .mount(&server)
            .await;

        let target = target_for(&server);
        target
            .upsert("mutation U", "vessels", vec![json!({ "id": "C" })])
            .await
            .expect("upsert");
        target
            .delete("mutation D", &["X".to_string(), "Y".to_string()])
            .await
            .expect("delete");
    }
}
