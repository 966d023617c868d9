use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use db2sync_adapters::entities::BUILTIN_ENTITIES;
use db2sync_sync::{catalogue, EntityRegistry, RunSummary, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "db2sync")]
#[command(about = "Reconcile legacy DB2 tables into the GraphQL system of record")]
struct Cli {
    /// Debug-level logging unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass per entity type.
    Sync {
        /// Entity to sync; repeat for several. Defaults to every enabled entity.
        #[arg(long = "entity", value_name = "NAME")]
        entities: Vec<String>,
        /// Compute and log the diff without writing to the remote API.
        #[arg(long)]
        log_only: bool,
    },
    /// Run syncs on DB2SYNC_SYNC_CRON until interrupted.
    Schedule,
    /// List entity types with their effective window and chunk sizes.
    Entities,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .init();
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(pass) => println!(
                "{}: source={} target={} new={} changed={} removed={} unchanged={} failed_chunks={} delete_failures={}{}",
                outcome.entity,
                pass.source_count,
                pass.target_count,
                pass.new,
                pass.changed,
                pass.removed,
                pass.unchanged,
                pass.failed_chunks(),
                pass.delete_failures(),
                pass.report_path
                    .as_deref()
                    .map(|path| format!(" report={path}"))
                    .unwrap_or_default(),
            ),
            Err(err) => println!("{}: FAILED {err}", outcome.entity),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        entities: Vec::new(),
        log_only: false,
    }) {
        Commands::Sync { entities, log_only } => {
            config.log_only |= log_only;
            let summary = db2sync_sync::run_sync_once(&config, &entities).await?;
            println!("sync complete: run_id={}", summary.run_id);
            print_summary(&summary);
            let failed = summary.failed_entities();
            if !failed.is_empty() {
                bail!("{} entity pass(es) failed: {}", failed.len(), failed.join(", "));
            }
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            db2sync_sync::run_scheduler(&config).await?;
        }
        Commands::Entities => {
            let registry = EntityRegistry::load(&config.registry_path(), BUILTIN_ENTITIES).await?;
            for entry in catalogue(&registry) {
                println!(
                    "{:<16} window={:<6} chunk={:<5} {}",
                    entry.job.name(),
                    entry.job.iteration_limit(),
                    entry.job.chunk_size(),
                    if entry.enabled { "enabled" } else { "disabled" }
                );
            }
        }
    }

    Ok(())
}
