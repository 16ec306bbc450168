//! JSON-lines promotion ledger
//!
//! One `PromotionRecord` per line, or `{"evicted": EvictionRecord}` for a
//! journaled eviction. Lines are appended and synced before the call
//! returns. The file is replayed into memory on open so reads never touch
//! the disk.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::memory::append_to;
use crate::storage_traits::{
    EvictionRecord, PromotionLedger, PromotionRecord, StagingId, StorageResult,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LedgerLine {
    Promotion(PromotionRecord),
    Eviction { evicted: EvictionRecord },
}

#[derive(Debug, Default)]
struct Entries {
    rows: Vec<PromotionRecord>,
    evictions: Vec<EvictionRecord>,
}

/// File-backed [`PromotionLedger`].
#[derive(Debug)]
pub struct JsonlPromotionLedger {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl JsonlPromotionLedger {
    /// Open (or create) the ledger at `path`, replaying existing lines.
    ///
    /// Blank lines are skipped; any other unparsable line is reported as
    /// `CorruptLedger` with its 1-based line number.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = Entries::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: LedgerLine =
                    serde_json::from_str(&line).map_err(|e| StorageError::CorruptLedger {
                        line: idx + 1,
                        reason: e.to_string(),
                    })?;
                match parsed {
                    LedgerLine::Promotion(record) => entries.rows.push(record),
                    LedgerLine::Eviction { evicted } => entries.evictions.push(evicted),
                }
            }
        }

        info!(
            path = %path.display(),
            records = entries.rows.len(),
            evictions = entries.evictions.len(),
            "opened promotion ledger"
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, line: &LedgerLine) -> StorageResult<()> {
        let mut text = serde_json::to_string(line)?;
        text.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl PromotionLedger for JsonlPromotionLedger {
    async fn append(&self, record: PromotionRecord) -> StorageResult<PromotionRecord> {
        let mut entries = self.entries.lock().await;
        let stored = append_to(&mut entries.rows, record)?;

        if let Err(e) = self.write_line(&LedgerLine::Promotion(stored.clone())).await {
            // Keep memory in step with the file.
            entries.rows.pop();
            return Err(e);
        }

        debug!(seq = stored.seq, staging_id = %stored.staging_id, "ledger append");
        Ok(stored)
    }

    async fn record_eviction(&self, eviction: EvictionRecord) -> StorageResult<()> {
        let mut entries = self.entries.lock().await;
        self.write_line(&LedgerLine::Eviction {
            evicted: eviction.clone(),
        })
        .await?;
        debug!(address = %eviction.address(), staging_id = %eviction.staging_id, "eviction journaled");
        entries.evictions.push(eviction);
        Ok(())
    }

    async fn evictions(&self) -> StorageResult<Vec<EvictionRecord>> {
        Ok(self.entries.lock().await.evictions.clone())
    }

    async fn history(&self) -> StorageResult<Vec<PromotionRecord>> {
        Ok(self.entries.lock().await.rows.clone())
    }

    async fn find_by_staging_id(
        &self,
        id: &StagingId,
    ) -> StorageResult<Option<PromotionRecord>> {
        Ok(self
            .entries
            .lock()
            .await
            .rows
            .iter()
            .find(|r| &r.staging_id == id)
            .cloned())
    }
}
