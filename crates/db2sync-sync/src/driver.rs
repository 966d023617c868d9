//! Reconciliation driver: one pass for one entity type. Reads both sides,
//! resolves identities, then runs diff -> apply once per iteration window.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use db2sync_adapters::{SourceError, SourceReader, TargetApi};
use db2sync_core::{EntityConfigError, EntitySyncConfig, TargetRecord};
use db2sync_storage::{RemoteError, ReportStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::apply::{ApplyReport, BatchApplier};
use crate::diff::{diff_window, Change, Reconciliation};
use crate::identity::{DuplicateSourceId, IdentityMap, IdentityResolver};

/// Number of records of each kind echoed into the window log line.
const AUDIT_SAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: Uuid,
    /// Compute and log the diff without any remote write.
    pub log_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            log_only: false,
        }
    }
}

/// Failures that abort one entity's pass before any remote write.
#[derive(Debug, Error)]
pub enum PassError {
    /// `source_count` is known only when the rows arrived but failed their
    /// schema check.
    #[error("{entity}: legacy source read failed: {source}")]
    SourceRead {
        entity: String,
        target_count: usize,
        source_count: Option<usize>,
        source: SourceError,
    },
    #[error("{entity}: remote list read failed: {source}")]
    TargetRead { entity: String, source: RemoteError },
    #[error("{entity}: remote record {index} does not decode: {source}")]
    TargetDecode {
        entity: String,
        index: usize,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] EntityConfigError),
}

impl PassError {
    /// Remote records read before the pass aborted.
    pub fn target_count(&self) -> Option<usize> {
        match self {
            PassError::SourceRead { target_count, .. } => Some(*target_count),
            _ => None,
        }
    }

    /// Legacy rows read before the pass aborted.
    pub fn source_count(&self) -> Option<usize> {
        match self {
            PassError::SourceRead { source_count, .. } => *source_count,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    /// 1-based.
    pub iteration: usize,
    pub iterations: usize,
    pub target_seen: usize,
    pub target_total: usize,
    pub source_seen: usize,
    pub source_total: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub elapsed_secs: f64,
    pub apply: ApplyReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub entity: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log_only: bool,
    pub target_count: usize,
    pub source_count: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub duplicate_source_ids: Vec<DuplicateSourceId>,
    pub windows: Vec<WindowSummary>,
    pub elapsed_secs: f64,
    pub report_path: Option<String>,
}

impl PassSummary {
    pub fn failed_chunks(&self) -> usize {
        self.windows.iter().map(|w| w.apply.failed_chunks.len()).sum()
    }

    pub fn delete_failures(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| w.apply.delete_failure.is_some())
            .count()
    }

    pub fn upsert_calls(&self) -> usize {
        self.windows.iter().map(|w| w.apply.upsert_calls).sum()
    }

    pub fn delete_calls(&self) -> usize {
        self.windows.iter().filter(|w| w.apply.delete_called).count()
    }
}

#[derive(Serialize)]
struct DeltaReport<'a, E> {
    summary: &'a PassSummary,
    new: &'a [E],
    changed: &'a [Change<E>],
    removed: &'a [E],
}

/// Window `iteration` of `len` items. The last window of a pass also takes
/// whatever lies beyond the regular window bounds when `take_rest` is set.
fn window_range(iteration: usize, window: usize, len: usize, take_rest: bool) -> Range<usize> {
    let start = (iteration * window).min(len);
    let end = if take_rest {
        len
    } else {
        ((iteration + 1) * window).min(len)
    };
    start..end
}

fn sample_json<T: Serialize>(items: &[T]) -> String {
    serde_json::to_string(&items[..items.len().min(AUDIT_SAMPLE)]).unwrap_or_default()
}

/// Explicitly constructed I/O dependencies of a pass.
#[derive(Clone)]
pub struct ReconciliationDriver {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetApi>,
    reports: Option<ReportStore>,
}

impl ReconciliationDriver {
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<dyn TargetApi>) -> Self {
        Self {
            source,
            target,
            reports: None,
        }
    }

    pub fn with_reports(mut self, reports: ReportStore) -> Self {
        self.reports = Some(reports);
        self
    }

    pub async fn run_pass<E: TargetRecord>(
        &self,
        config: &EntitySyncConfig<E>,
        options: &RunOptions,
    ) -> Result<PassSummary, PassError> {
        let span = info_span!("reconcile", entity = %config.item_name, run_id = %options.run_id);
        let started = Instant::now();
        let result = self.run_pass_inner(config, options).instrument(span).await;
        if let Err(err) = &result {
            error!(
                entity = %config.item_name,
                run_id = %options.run_id,
                elapsed_secs = started.elapsed().as_secs_f64(),
                target_count = err.target_count(),
                source_count = err.source_count(),
                error = %err,
                "pass aborted before any remote write"
            );
        }
        result
    }

    async fn run_pass_inner<E: TargetRecord>(
        &self,
        config: &EntitySyncConfig<E>,
        options: &RunOptions,
    ) -> Result<PassSummary, PassError> {
        config.validate()?;
        let entity = config.item_name.as_str();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(entity, log_only = options.log_only, "updating {} from legacy source", config.item_plural_name);

        let nodes = self
            .target
            .list(&config.list_query, &config.list_field)
            .await
            .map_err(|source| PassError::TargetRead {
                entity: entity.to_string(),
                source,
            })?;
        let targets = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| {
                serde_json::from_value::<E>(node).map_err(|source| PassError::TargetDecode {
                    entity: entity.to_string(),
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<E>, PassError>>()?;
        let listed = targets.len();

        let mut rows = self
            .source
            .read(entity, &config.legacy_query)
            .await
            .map_err(|source| PassError::SourceRead {
                entity: entity.to_string(),
                target_count: listed,
                source_count: None,
                source,
            })?;
        for row in &mut rows {
            row.trim_text_end();
        }
        config
            .schema
            .validate_all(&rows)
            .map_err(|err| PassError::SourceRead {
                entity: entity.to_string(),
                target_count: listed,
                source_count: Some(rows.len()),
                source: SourceError::Schema(err),
            })?;

        let source_count = rows.len();
        let identity_map = IdentityMap::from_records(targets);
        let target_count = identity_map.len();
        let resolved = IdentityResolver::new(&config.identity, &identity_map).resolve_all(rows);
        let source_ids: HashSet<&str> = resolved.rows.iter().map(|row| row.id.as_str()).collect();

        let window = config.iteration_limit;
        let iterations = source_count.div_ceil(window);
        if iterations == 0 && target_count > 0 {
            warn!(
                entity,
                target_count, "legacy source returned no rows; nothing is applied"
            );
        }

        let applier = BatchApplier::new(self.target.as_ref(), options.log_only);
        let keep_delta = self.reports.is_some();
        let mut delta: Reconciliation<E> = Reconciliation::default();
        let mut windows = Vec::with_capacity(iterations);

        for iteration in 0..iterations {
            let window_clock = Instant::now();
            let last = iteration + 1 == iterations;
            let source_range = window_range(iteration, window, resolved.rows.len(), false);
            let target_range = window_range(iteration, window, target_count, last);
            let source_slice = &resolved.rows[source_range.clone()];
            let target_slice = &identity_map.records()[target_range.clone()];

            let recon = diff_window(
                &identity_map,
                source_slice,
                target_slice,
                &source_ids,
                config.normalizer.as_ref(),
            );
            let upserts = recon.upserts();
            let removed_ids = recon.removed_ids();
            let apply = applier
                .apply(config, &upserts, &removed_ids, iteration + 1)
                .await;

            let summary = WindowSummary {
                iteration: iteration + 1,
                iterations,
                target_seen: target_range.end,
                target_total: target_count,
                source_seen: ((iteration + 1) * window).min(source_count),
                source_total: source_count,
                new: recon.new.len(),
                changed: recon.changed.len(),
                unchanged: recon.unchanged.len(),
                removed: recon.removed.len(),
                elapsed_secs: window_clock.elapsed().as_secs_f64(),
                apply,
            };
            log_window(config, &summary, &recon, clock.elapsed().as_secs_f64());
            windows.push(summary);

            if keep_delta {
                delta.new.extend(recon.new);
                delta.changed.extend(recon.changed);
                delta.unchanged.extend(recon.unchanged);
                delta.removed.extend(recon.removed);
            }
        }

        let mut summary = PassSummary {
            entity: entity.to_string(),
            run_id: options.run_id,
            started_at,
            finished_at: Utc::now(),
            log_only: options.log_only,
            target_count,
            source_count,
            new: windows.iter().map(|w| w.new).sum(),
            changed: windows.iter().map(|w| w.changed).sum(),
            unchanged: windows.iter().map(|w| w.unchanged).sum(),
            removed: windows.iter().map(|w| w.removed).sum(),
            duplicate_source_ids: resolved.duplicates,
            windows,
            elapsed_secs: clock.elapsed().as_secs_f64(),
            report_path: None,
        };

        info!(
            entity,
            target_count = summary.target_count,
            source_count = summary.source_count,
            new = summary.new,
            changed = summary.changed,
            removed = summary.removed,
            unchanged = summary.unchanged,
            duplicate_source_ids = summary.duplicate_source_ids.len(),
            failed_chunks = summary.failed_chunks(),
            delete_failures = summary.delete_failures(),
            elapsed_secs = summary.elapsed_secs,
            "{} pass complete",
            config.item_name
        );

        if let Some(store) = &self.reports {
            let report = DeltaReport {
                summary: &summary,
                new: &delta.new,
                changed: &delta.changed,
                removed: &delta.removed,
            };
            match store.store_json(options.run_id, entity, &report).await {
                Ok(stored) => {
                    info!(
                        entity,
                        path = %stored.relative_path.display(),
                        sha256 = %stored.content_hash,
                        bytes = stored.byte_size,
                        "delta report written"
                    );
                    summary.report_path = Some(stored.absolute_path.display().to_string());
                }
                Err(err) => warn!(entity, error = %err, "writing delta report failed"),
            }
        }

        Ok(summary)
    }
}

fn log_window<E: TargetRecord>(
    config: &EntitySyncConfig<E>,
    summary: &WindowSummary,
    recon: &Reconciliation<E>,
    pass_elapsed_secs: f64,
) {
    info!(
        entity = %config.item_name,
        iteration = summary.iteration,
        iterations = summary.iterations,
        target_seen = summary.target_seen,
        target_total = summary.target_total,
        source_seen = summary.source_seen,
        source_total = summary.source_total,
        new = summary.new,
        changed = summary.changed,
        removed = summary.removed,
        unchanged = summary.unchanged,
        upsert_calls = summary.apply.upsert_calls,
        failed_chunks = summary.apply.failed_chunks.len(),
        delete_failed = summary.apply.delete_failure.is_some(),
        processing_secs = pass_elapsed_secs,
        new_sample = %sample_json(&recon.new),
        changed_sample = %sample_json(&recon.changed),
        removed_sample = %sample_json(&recon.removed),
        "{} update summary ({}/{})",
        config.item_plural_name,
        summary.iteration,
        summary.iterations
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_ranges_clamp_and_absorb_remainder() {
        assert_eq!(window_range(0, 2, 5, false), 0..2);
        assert_eq!(window_range(2, 2, 5, false), 4..5);
        assert_eq!(window_range(3, 2, 5, false), 5..5);
        assert_eq!(window_range(1, 2, 7, true), 2..7);
        assert_eq!(window_range(0, 10, 0, true), 0..0);
    }

    #[test]
    fn audit_samples_cap_at_five() {
        let items: Vec<u32> = (0..8).collect();
        assert_eq!(sample_json(&items), "[0,1,2,3,4]");
        assert_eq!(sample_json::<u32>(&[]), "[]");
    }
}
