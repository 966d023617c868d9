//! Reconciliation engine: identity resolution, diffing, chunked apply and
//! the per-entity driver, plus the multi-entity run and its scheduler.

pub mod apply;
pub mod config;
pub mod diff;
pub mod driver;
pub mod identity;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db2sync_adapters::entities::{customer, inventory_item, vessel, BUILTIN_ENTITIES};
use db2sync_adapters::{FixtureSourceReader, GraphQlTarget, SourceReader, SqlSourceReader};
use db2sync_core::{EntitySyncConfig, TargetRecord};
use db2sync_storage::{GraphQlClient, GraphQlClientConfig, ReportStore};
use futures::future::join_all;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use apply::{ApplyReport, BatchApplier, ChunkFailure};
pub use config::{EntityOverride, EntityRegistry, SyncConfig};
pub use diff::{diff, diff_window, Change, Reconciliation};
pub use driver::{PassError, PassSummary, ReconciliationDriver, RunOptions, WindowSummary};
pub use identity::{IdentityMap, IdentityResolver, SourceRow};

pub const CRATE_NAME: &str = "db2sync-sync";

/// One entity type's pass with its record type erased, so a run can hold a
/// heterogeneous list of entities.
#[async_trait]
pub trait EntityJob: Send + Sync {
    fn name(&self) -> &str;
    fn iteration_limit(&self) -> usize;
    fn chunk_size(&self) -> usize;
    fn apply_override(&mut self, entry: &EntityOverride);
    async fn run(
        &self,
        driver: &ReconciliationDriver,
        options: &RunOptions,
    ) -> Result<PassSummary, PassError>;
}

#[async_trait]
impl<E: TargetRecord> EntityJob for EntitySyncConfig<E> {
    fn name(&self) -> &str {
        &self.item_name
    }

    fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn apply_override(&mut self, entry: &EntityOverride) {
        if let Some(limit) = entry.iteration_limit {
            self.iteration_limit = limit;
        }
        if let Some(size) = entry.chunk_size {
            self.chunk_size = size;
        }
        if let Some(query) = &entry.legacy_query {
            self.legacy_query = query.clone();
        }
    }

    async fn run(
        &self,
        driver: &ReconciliationDriver,
        options: &RunOptions,
    ) -> Result<PassSummary, PassError> {
        driver.run_pass(self, options).await
    }
}

/// Built-in entities in scheduled-run order.
pub fn builtin_jobs() -> Vec<Box<dyn EntityJob>> {
    vec![
        Box::new(vessel::config()),
        Box::new(customer::config()),
        Box::new(inventory_item::config()),
    ]
}

pub struct CatalogueEntry {
    pub job: Box<dyn EntityJob>,
    pub enabled: bool,
}

/// Built-in entities with registry overrides applied.
pub fn catalogue(registry: &EntityRegistry) -> Vec<CatalogueEntry> {
    builtin_jobs()
        .into_iter()
        .map(|mut job| {
            let enabled = registry.is_enabled(job.name());
            if let Some(entry) = registry.get(job.name()) {
                job.apply_override(entry);
            }
            CatalogueEntry { job, enabled }
        })
        .collect()
}

/// With no names, every enabled entity. Named entities run even when the
/// registry disables them; unknown names are an error.
pub fn select_jobs(registry: &EntityRegistry, names: &[String]) -> Result<Vec<Box<dyn EntityJob>>> {
    for name in names {
        if !BUILTIN_ENTITIES.contains(&name.as_str()) {
            bail!(
                "unknown entity `{name}` (known: {})",
                BUILTIN_ENTITIES.join(", ")
            );
        }
    }
    Ok(catalogue(registry)
        .into_iter()
        .filter(|entry| {
            if names.is_empty() {
                entry.enabled
            } else {
                names.iter().any(|name| name == entry.job.name())
            }
        })
        .map(|entry| entry.job)
        .collect())
}

#[derive(Debug)]
pub struct EntityOutcome {
    pub entity: String,
    pub result: Result<PassSummary, PassError>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<EntityOutcome>,
}

impl RunSummary {
    pub fn failed_entities(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .map(|outcome| outcome.entity.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }
}

/// Runs each job's pass. Entity types share no state, so a fatal read in
/// one leaves the others untouched.
pub async fn run_entities(
    driver: &ReconciliationDriver,
    jobs: &[Box<dyn EntityJob>],
    options: &RunOptions,
    concurrent: bool,
) -> RunSummary {
    let started_at = Utc::now();
    let passes = jobs.iter().map(|job| async move {
        EntityOutcome {
            entity: job.name().to_string(),
            result: job.run(driver, options).await,
        }
    });

    let outcomes = if concurrent {
        join_all(passes).await
    } else {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for pass in passes {
            outcomes.push(pass.await);
        }
        outcomes
    };

    RunSummary {
        run_id: options.run_id,
        started_at,
        finished_at: Utc::now(),
        outcomes,
    }
}

pub async fn build_driver(config: &SyncConfig) -> Result<ReconciliationDriver> {
    let source: Arc<dyn SourceReader> = match &config.legacy_database_url {
        Some(url) => Arc::new(SqlSourceReader::connect(url).await?),
        None => {
            info!(dir = %config.fixtures_dir.display(), "no legacy database configured; reading fixtures");
            Arc::new(FixtureSourceReader::new(config.fixtures_dir.clone()))
        }
    };

    let client = GraphQlClient::new(GraphQlClientConfig {
        endpoint: config.graphql_url.clone(),
        bearer_token: config.graphql_token.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
        ..Default::default()
    })?;
    let driver = ReconciliationDriver::new(source, Arc::new(GraphQlTarget::new(client)));

    Ok(match &config.reports_dir {
        Some(dir) => driver.with_reports(ReportStore::new(dir.clone())),
        None => driver,
    })
}

pub async fn run_sync_once(config: &SyncConfig, entities: &[String]) -> Result<RunSummary> {
    let registry = EntityRegistry::load(&config.registry_path(), BUILTIN_ENTITIES).await?;
    let jobs = select_jobs(&registry, entities)?;
    let driver = build_driver(config).await?;
    let options = RunOptions {
        run_id: Uuid::new_v4(),
        log_only: config.log_only,
    };

    info!(
        run_id = %options.run_id,
        entities = jobs.len(),
        log_only = options.log_only,
        concurrent = config.concurrent_entities,
        "starting sync run"
    );
    let summary = run_entities(&driver, &jobs, &options, config.concurrent_entities).await;
    let failed = summary.failed_entities();
    if failed.is_empty() {
        info!(run_id = %summary.run_id, "sync run complete");
    } else {
        warn!(run_id = %summary.run_id, failed = ?failed, "sync run complete with failed entities");
    }
    Ok(summary)
}

pub async fn run_sync_once_from_env() -> Result<RunSummary> {
    run_sync_once(&SyncConfig::from_env(), &[]).await
}

pub async fn maybe_build_scheduler(config: &SyncConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job = Job::new_async(config.sync_cron.as_str(), move |_uuid, _l| {
        let config = job_config.clone();
        Box::pin(async move {
            if let Err(err) = run_sync_once(&config, &[]).await {
                error!(error = %format!("{err:#}"), "scheduled sync run failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.sync_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

/// Runs the scheduler until interrupted.
pub async fn run_scheduler(config: &SyncConfig) -> Result<()> {
    let Some(mut sched) = maybe_build_scheduler(config).await? else {
        bail!("scheduler disabled; set DB2SYNC_SCHEDULER_ENABLED=1");
    };
    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.sync_cron, "scheduler started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
