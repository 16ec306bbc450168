//! Append-only audit trail of lifecycle events.
//!
//! One JSON object per line. Audit failures are logged and never fail the
//! pipeline. Sinks are async so file appends never block a runtime worker.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snipline_state::StagingId;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SnippetQueued,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    VerdictReused,
    VerdictPass,
    VerdictFail,
    SlotClaimed,
    SlotRetired,
    SlotEvicted,
    PromotionCompleted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_id: Option<StagingId>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        event: AuditEventType,
        staging_id: Option<&StagingId>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            staging_id: staging_id.cloned(),
            details,
        }
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Drops every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _entry: &AuditEntry) -> Result<()> {
        Ok(())
    }
}

/// Keeps entries in memory; used by tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Event types recorded for one staging id, in order.
    pub fn events_for(&self, staging_id: &StagingId) -> Vec<AuditEventType> {
        self.lock()
            .iter()
            .filter(|e| e.staging_id.as_ref() == Some(staging_id))
            .map(|e| e.event)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.lock().push(entry.clone());
        Ok(())
    }
}

/// Appends JSON lines to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry in the file.
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.path).await?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<AuditEntry>(l).map_err(PipelineError::from))
            .collect()
    }

    /// Entries about one staging id, in the order they were written.
    pub async fn read_for(&self, staging_id: &StagingId) -> Result<Vec<AuditEntry>> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| e.staging_id.as_ref() == Some(staging_id));
        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
