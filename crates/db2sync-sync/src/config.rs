use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::fs;

pub const REGISTRY_FILE: &str = "entities.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub graphql_url: String,
    pub graphql_token: Option<String>,
    /// Absent means rows come from `fixtures_dir`.
    pub legacy_database_url: Option<String>,
    pub fixtures_dir: PathBuf,
    pub log_only: bool,
    pub http_timeout_secs: u64,
    pub reports_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub concurrent_entities: bool,
    pub workspace_root: PathBuf,
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |key: &str| lookup(key).map(|v| truthy(&v)).unwrap_or(false);

        Self {
            graphql_url: non_empty("DB2SYNC_GRAPHQL_URL")
                .unwrap_or_else(|| "http://localhost:5000/graphql".to_string()),
            graphql_token: non_empty("DB2SYNC_GRAPHQL_TOKEN"),
            legacy_database_url: non_empty("DB2SYNC_LEGACY_DATABASE_URL"),
            fixtures_dir: non_empty("DB2SYNC_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./fixtures")),
            log_only: flag("DB2SYNC_LOG_ONLY"),
            http_timeout_secs: lookup("DB2SYNC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            reports_dir: non_empty("DB2SYNC_REPORTS_DIR").map(PathBuf::from),
            scheduler_enabled: flag("DB2SYNC_SCHEDULER_ENABLED"),
            sync_cron: non_empty("DB2SYNC_SYNC_CRON").unwrap_or_else(|| "0 0 5 * * *".to_string()),
            concurrent_entities: flag("DB2SYNC_CONCURRENT_ENTITIES"),
            workspace_root: non_empty("DB2SYNC_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join(REGISTRY_FILE)
    }
}

/// Per-entity overrides read from `entities.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityOverride {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub iteration_limit: Option<usize>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub legacy_query: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntityRegistry {
    #[serde(default)]
    pub entities: Vec<EntityOverride>,
}

impl EntityRegistry {
    pub fn parse(text: &str, known: &[&str]) -> Result<Self> {
        let registry: EntityRegistry = serde_yaml::from_str(text)?;
        registry.check(known)?;
        Ok(registry)
    }

    /// Missing file means every built-in entity with its own defaults.
    pub async fn load(path: &Path, known: &[&str]) -> Result<Self> {
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text, known).with_context(|| format!("parsing {}", path.display()))
    }

    fn check(&self, known: &[&str]) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entities {
            if !known.contains(&entry.name.as_str()) {
                bail!(
                    "unknown entity `{}` (known: {})",
                    entry.name,
                    known.join(", ")
                );
            }
            if !seen.insert(entry.name.as_str()) {
                bail!("entity `{}` listed more than once", entry.name);
            }
            if entry.iteration_limit == Some(0) || entry.chunk_size == Some(0) {
                bail!("entity `{}`: window and chunk sizes must be at least 1", entry.name);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntityOverride> {
        self.entities.iter().find(|entry| entry.name == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|entry| entry.enabled).unwrap_or(true)
    }
}
