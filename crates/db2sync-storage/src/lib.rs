//! Remote GraphQL transport and immutable report artifact storage for db2sync.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "db2sync-storage";

#[derive(Debug, Clone)]
pub struct StoredReport {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub stored_at: DateTime<Utc>,
}

/// Writes per-pass delta reports under `<root>/<run_id>/<entity>.json`.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn report_relative_path(&self, run_id: Uuid, entity: &str) -> PathBuf {
        let entity = entity.trim();
        let entity = if entity.is_empty() { "entity" } else { entity };
        PathBuf::from(run_id.to_string()).join(format!("{entity}.json"))
    }

    /// Store bytes through a temp file + rename so readers never observe a
    /// half-written report.
    pub async fn store_bytes(
        &self,
        run_id: Uuid,
        entity: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredReport> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.report_relative_path(run_id, entity);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating report directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp report file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp report file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp report file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp report {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredReport {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            stored_at: Utc::now(),
        })
    }

    pub async fn store_json<T: Serialize>(
        &self,
        run_id: Uuid,
        entity: &str,
        value: &T,
    ) -> anyhow::Result<StoredReport> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {entity} report"))?;
        self.store_bytes(run_id, entity, &bytes).await
    }
}

/// Gateway restarts, request timeouts and rate limiting clear on their own;
/// anything else means the document or credentials are wrong.
fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
}

fn retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sleep before retry `retry` (zero-based): the base delay doubled per
    /// earlier retry, never above `max_delay`.
    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.base_delay
            .checked_mul(1u32 << doublings)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct GraphQlClientConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Upper bound on requests in flight across all entity passes sharing
    /// this client.
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
}

impl Default for GraphQlClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000/graphql".to_string(),
            bearer_token: None,
            timeout: Duration::from_secs(60),
            user_agent: Some(format!("db2sync/{}", env!("CARGO_PKG_VERSION"))),
            max_in_flight: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GraphQlErrorMessage {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("graphql errors: {}", .0.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; "))]
    GraphQl(Vec<GraphQlErrorMessage>),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<JsonValue>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorMessage>>,
}

/// GraphQL-over-HTTP client. Shared by every entity pass of a run; retries
/// transient transport failures with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
    in_flight: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl GraphQlClient {
    pub fn new(config: GraphQlClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint,
            bearer_token: config.bearer_token,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            backoff: config.backoff,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts one operation and returns its `data` member.
    pub async fn request(
        &self,
        operation: &str,
        document: &str,
        variables: JsonValue,
    ) -> Result<JsonValue, RemoteError> {
        let span = info_span!("graphql_request", operation, endpoint = %self.endpoint);
        self.request_with_retries(document, &variables)
            .instrument(span)
            .await
    }

    async fn request_with_retries(
        &self,
        document: &str,
        variables: &JsonValue,
    ) -> Result<JsonValue, RemoteError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| RemoteError::Shape("client semaphore closed".to_string()))?;

        let body = serde_json::json!({ "query": document, "variables": variables });

        for attempt in 0..=self.backoff.max_retries {
            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: GraphQlResponse = resp.json().await?;
                        return unwrap_payload(payload);
                    }

                    if retryable_status(status) && attempt < self.backoff.max_retries
                    {
                        warn!(status = status.as_u16(), attempt, "retrying graphql request");
                        tokio::time::sleep(self.backoff.delay_before_retry(attempt)).await;
                        continue;
                    }

                    return Err(RemoteError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Err(err) => {
                    if retryable_transport(&err) && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retrying graphql request");
                        tokio::time::sleep(self.backoff.delay_before_retry(attempt)).await;
                        continue;
                    }
                    return Err(RemoteError::Request(err));
                }
            }
        }

        // The final attempt always returns above.
        Err(RemoteError::Shape("retry loop exhausted".to_string()))
    }
}

fn unwrap_payload(payload: GraphQlResponse) -> Result<JsonValue, RemoteError> {
    if let Some(errors) = payload.errors.filter(|errors| !errors.is_empty()) {
        return Err(RemoteError::GraphQl(errors));
    }
    payload
        .data
        .ok_or_else(|| RemoteError::Shape("response carries neither data nor errors".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, backoff: BackoffPolicy) -> GraphQlClient {
        GraphQlClient::new(GraphQlClientConfig {
            endpoint: format!("{}/graphql", server.uri()),
            bearer_token: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
            backoff,
            ..Default::default()
        })
        .expect("client")
    }

    #[test]
    fn report_hashing_is_stable() {
        let hash = ReportStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn reports_land_under_run_and_entity() {
        let dir = tempdir().expect("tempdir");
        let store = ReportStore::new(dir.path());
        let run_id = Uuid::new_v4();

        let stored = store
            .store_json(run_id, "vessel", &json!({ "new": 1 }))
            .await
            .expect("store");

        assert_eq!(
            stored.relative_path,
            PathBuf::from(run_id.to_string()).join("vessel.json")
        );
        let written = std::fs::read(&stored.absolute_path).expect("read back");
        assert_eq!(ReportStore::sha256_hex(&written), stored.content_hash);

        let again = store
            .store_json(run_id, "vessel", &json!({ "new": 2 }))
            .await
            .expect("overwrite");
        assert_ne!(again.content_hash, stored.content_hash);
    }

    #[test]
    fn retry_delays_double_up_to_the_cap() {
        let policy = BackoffPolicy {
            max_retries: 6,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        };
        let delays: Vec<u128> = (0..6)
            .map(|retry| policy.delay_before_retry(retry).as_millis())
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 2000, 2000]);
        assert_eq!(policy.delay_before_retry(usize::MAX), Duration::from_secs(2));
        assert_eq!(BackoffPolicy::none().delay_before_retry(3), Duration::ZERO);
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        for status in [502, 503, 504, 408, 429] {
            assert!(retryable_status(StatusCode::from_u16(status).unwrap()), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!retryable_status(StatusCode::from_u16(status).unwrap()), "{status}");
        }
    }

    #[tokio::test]
    async fn request_returns_data_and_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({ "variables": { "input": { "ids": ["A"] } } })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "vessels": { "nodes": [] } } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, BackoffPolicy::none());
        let data = client
            .request("VESSEL_LIST", "query { vessels { nodes { id } } }", json!({ "input": { "ids": ["A"] } }))
            .await
            .expect("request");
        assert_eq!(data, json!({ "vessels": { "nodes": [] } }));
    }

    #[tokio::test]
    async fn graphql_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({ "data": null, "errors": [{ "message": "duplicate key" }] }),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, BackoffPolicy::default());
        let err = client
            .request("BULK_UPSERT", "mutation { x }", json!({}))
            .await
            .expect_err("graphql error");
        assert!(matches!(err, RemoteError::GraphQl(ref errors) if errors[0].message == "duplicate key"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(
            &server,
            BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        );
        let err = client
            .request("VESSEL_LIST", "query { x }", json!({}))
            .await
            .expect_err("status error");
        assert!(matches!(err, RemoteError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, BackoffPolicy::default());
        let err = client
            .request("VESSEL_LIST", "query { x }", json!({}))
            .await
            .expect_err("status error");
        assert!(matches!(err, RemoteError::HttpStatus { status: 400, .. }));
    }
}
