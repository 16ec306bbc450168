//! Pipeline configuration.
//!
//! Loaded from TOML, then overridden from `SNIPLINE_*` environment
//! variables. Every section has defaults, so an empty file is a valid
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snipline_state::{
    JsonlPromotionLedger, JsonlStagingStore, MemoryPromotionLedger, MemoryStagingStore,
    PromotionLedger, StagingStore, SurrealPromotionLedger,
};

use crate::domain::{PipelineError, Result};
use crate::sandbox::{ExecutionLimits, RetryConfig};
use crate::slots::{EvictionPolicy, FixedAssignment, LeastRecentlyPromoted, RejectOnFull};

pub const ENV_DATA_DIR: &str = "SNIPLINE_DATA_DIR";
pub const ENV_WORKERS: &str = "SNIPLINE_WORKERS";
pub const ENV_WALL_TIME_MS: &str = "SNIPLINE_WALL_TIME_MS";
pub const ENV_LEDGER_URL: &str = "SNIPLINE_LEDGER_URL";

/// A statically pinned `(engine, label) -> position` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedSlot {
    pub engine: String,
    pub label: String,
    pub position: u32,
}

/// What to do when an engine has no free slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EvictionConfig {
    #[default]
    RejectOnFull,
    LeastRecentlyPromoted,
    Fixed {
        #[serde(default)]
        pins: Vec<PinnedSlot>,
    },
}

/// Whether a snippet identical to an already promoted one is executed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    AlwaysExecute,
    /// Skip execution when the engine already promoted the same content
    /// under the same spec.
    ReusePromotedVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Jsonl,
    Surreal,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// SurrealDB endpoint; defaults to an embedded store under `data_dir`.
    pub url: Option<String>,
}

/// Where staging records live between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StagingBackend {
    #[default]
    Jsonl,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StagingConfig {
    pub backend: StagingBackend,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrent executions.
    pub worker_pool_size: usize,
    /// Root for the ledger, audit log and rendered snippets.
    pub data_dir: PathBuf,
    pub limits: ExecutionLimits,
    pub retry: RetryConfig,
    pub eviction: EvictionConfig,
    pub dedup: DedupPolicy,
    /// Slot capacity applied to every engine.
    pub capacity_override: Option<u32>,
    pub ledger: LedgerConfig,
    pub staging: StagingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            data_dir: PathBuf::from(".snipline"),
            limits: ExecutionLimits::default(),
            retry: RetryConfig::default(),
            eviction: EvictionConfig::default(),
            dedup: DedupPolicy::default(),
            capacity_override: None,
            ledger: LedgerConfig::default(),
            staging: StagingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(format!("invalid TOML: {e}")))
    }

    /// Apply `SNIPLINE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.worker_pool_size = parse_env(ENV_WORKERS, &workers)?;
        }
        if let Some(ms) = lookup(ENV_WALL_TIME_MS) {
            self.limits.wall_time_ms = parse_env(ENV_WALL_TIME_MS, &ms)?;
        }
        if let Some(url) = lookup(ENV_LEDGER_URL) {
            self.ledger.backend = LedgerBackend::Surreal;
            self.ledger.url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(PipelineError::Config(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.limits.wall_time_ms == 0 {
            return Err(PipelineError::Config(
                "limits.wall_time_ms must be positive".into(),
            ));
        }
        if self.limits.max_output_bytes == 0 {
            return Err(PipelineError::Config(
                "limits.max_output_bytes must be positive".into(),
            ));
        }
        if self.capacity_override == Some(0) {
            return Err(PipelineError::Config(
                "capacity_override must be positive".into(),
            ));
        }
        if let EvictionConfig::Fixed { pins } = &self.eviction {
            if let Some(pin) = pins.iter().find(|p| p.position == 0) {
                return Err(PipelineError::Config(format!(
                    "pinned slot for {:?} on {} has position 0; positions are 1-based",
                    pin.label, pin.engine
                )));
            }
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.jsonl")
    }

    pub fn staging_path(&self) -> PathBuf {
        self.data_dir.join("staging.jsonl")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    pub fn snippets_dir(&self) -> PathBuf {
        self.data_dir.join("snippets")
    }

    fn surreal_url(&self) -> String {
        self.ledger
            .url
            .clone()
            .unwrap_or_else(|| format!("surrealkv://{}", self.data_dir.join("db").display()))
    }

    pub fn eviction_policy(&self) -> Arc<dyn EvictionPolicy> {
        match &self.eviction {
            EvictionConfig::RejectOnFull => Arc::new(RejectOnFull),
            EvictionConfig::LeastRecentlyPromoted => Arc::new(LeastRecentlyPromoted),
            EvictionConfig::Fixed { pins } => Arc::new(
                pins.iter()
                    .fold(FixedAssignment::new(), |policy, pin| {
                        policy.pin(&pin.engine, &pin.label, pin.position)
                    }),
            ),
        }
    }

    /// Open the configured promotion ledger.
    pub async fn open_ledger(&self) -> Result<Arc<dyn PromotionLedger>> {
        let ledger: Arc<dyn PromotionLedger> = match self.ledger.backend {
            LedgerBackend::Jsonl => Arc::new(JsonlPromotionLedger::open(self.ledger_path())?),
            LedgerBackend::Surreal => {
                Arc::new(SurrealPromotionLedger::connect(&self.surreal_url()).await?)
            }
            LedgerBackend::Memory => Arc::new(MemoryPromotionLedger::new()),
        };
        Ok(ledger)
    }

    /// Open the configured staging store.
    pub async fn open_store(&self) -> Result<Arc<dyn StagingStore>> {
        let store: Arc<dyn StagingStore> = match self.staging.backend {
            StagingBackend::Jsonl => Arc::new(JsonlStagingStore::open(self.staging_path()).await?),
            StagingBackend::Memory => Arc::new(MemoryStagingStore::new()),
        };
        Ok(store)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PipelineError::Config(format!("{key}={value:?}: {e}")))
}
