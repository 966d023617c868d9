//! Batch applier: chunked upserts followed by one delete call, issued
//! sequentially. Remote failures are reported, never raised.

use db2sync_adapters::TargetApi;
use db2sync_core::{EntitySyncConfig, TargetRecord};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    /// 1-based chunk number within the window.
    pub chunk: usize,
    pub ids: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub log_only: bool,
    pub upsert_calls: usize,
    pub upserted: usize,
    pub failed_chunks: Vec<ChunkFailure>,
    pub delete_called: bool,
    pub deleted: usize,
    pub delete_failure: Option<String>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed_chunks.is_empty() && self.delete_failure.is_none()
    }
}

pub struct BatchApplier<'a> {
    target: &'a dyn TargetApi,
    log_only: bool,
}

impl<'a> BatchApplier<'a> {
    pub fn new(target: &'a dyn TargetApi, log_only: bool) -> Self {
        Self { target, log_only }
    }

    pub async fn apply<E: TargetRecord>(
        &self,
        config: &EntitySyncConfig<E>,
        upserts: &[&E],
        removed_ids: &[String],
        iteration: usize,
    ) -> ApplyReport {
        let entity = config.item_name.as_str();
        let mut report = ApplyReport {
            log_only: self.log_only,
            ..Default::default()
        };

        if self.log_only {
            info!(
                entity,
                iteration,
                upserts = upserts.len(),
                deletes = removed_ids.len(),
                "log-only mode; remote writes skipped"
            );
            return report;
        }

        for (chunk_index, chunk) in upserts.chunks(config.chunk_size.max(1)).enumerate() {
            let chunk_no = chunk_index + 1;
            let ids: Vec<String> = chunk.iter().map(|record| record.id().to_string()).collect();
            report.upsert_calls += 1;

            let payload: Result<Vec<JsonValue>, _> =
                chunk.iter().map(|record| serde_json::to_value(*record)).collect();
            let outcome = match payload {
                Ok(values) => self
                    .target
                    .upsert(&config.upsert_mutation, &config.upsert_field, values)
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(format!("serializing chunk: {err}")),
            };

            match outcome {
                Ok(()) => {
                    debug!(entity, iteration, chunk = chunk_no, records = chunk.len(), "upserted chunk");
                    report.upserted += chunk.len();
                }
                Err(err) => {
                    error!(
                        entity,
                        iteration,
                        chunk = chunk_no,
                        ids = ?ids,
                        error = %err,
                        "upsert chunk failed; continuing"
                    );
                    report.failed_chunks.push(ChunkFailure {
                        chunk: chunk_no,
                        ids,
                        error: err,
                    });
                }
            }
        }

        if removed_ids.is_empty() {
            return report;
        }
        let Some(mutation) = &config.delete_mutation else {
            debug!(entity, iteration, "no delete mutation configured; removals left in place");
            return report;
        };

        report.delete_called = true;
        match self.target.delete(mutation, removed_ids).await {
            Ok(()) => report.deleted = removed_ids.len(),
            Err(err) => {
                let sample: Vec<&String> = removed_ids.iter().take(5).collect();
                error!(
                    entity,
                    iteration,
                    ids = ?sample,
                    total = removed_ids.len(),
                    error = %err,
                    "delete failed"
                );
                report.delete_failure = Some(err.to_string());
            }
        }

        report
    }
}
