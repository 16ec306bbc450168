//! JSON-lines staging store
//!
//! Every mutation appends a full snapshot of the changed record; on open
//! the last snapshot per staging id wins. A mutation is journaled before
//! it becomes visible, so a failed write leaves the store unchanged.
//!
//! Records found RUNNING on open belonged to a process that is gone. They
//! are put back to STAGED so a later run can pick them up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::memory::check_edge;
use crate::storage_traits::*;

#[derive(Debug)]
struct Journal {
    records: HashMap<StagingId, StagingRecord>,
    file: tokio::fs::File,
}

impl Journal {
    async fn write(&mut self, record: &StagingRecord) -> StorageResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.sync_data().await?;
        Ok(())
    }

    /// Journal then publish a new version of a record.
    async fn commit(&mut self, record: StagingRecord) -> StorageResult<()> {
        self.write(&record).await?;
        self.records.insert(record.staging_id.clone(), record);
        Ok(())
    }

    fn current(&self, id: &StagingId) -> StorageResult<StagingRecord> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::StagingNotFound {
                staging_id: id.to_string(),
            })
    }
}

/// File-backed [`StagingStore`].
#[derive(Debug)]
pub struct JsonlStagingStore {
    path: PathBuf,
    journal: Mutex<Journal>,
}

impl JsonlStagingStore {
    /// Open (or create) the journal at `path` and replay it.
    ///
    /// Blank lines are skipped; any other unparsable line is reported as
    /// `CorruptLedger` with its 1-based line number.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut records = HashMap::new();
        let mut lines = 0usize;
        if tokio::fs::try_exists(&path).await? {
            let text = tokio::fs::read_to_string(&path).await?;
            for (idx, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: StagingRecord =
                    serde_json::from_str(line).map_err(|e| StorageError::CorruptLedger {
                        line: idx + 1,
                        reason: e.to_string(),
                    })?;
                lines += 1;
                records.insert(record.staging_id.clone(), record);
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut journal = Journal { records, file };

        let orphaned: Vec<StagingRecord> = journal
            .records
            .values()
            .filter(|r| r.state == StagingState::Running)
            .cloned()
            .collect();
        for mut record in orphaned {
            warn!(staging_id = %record.staging_id, "requeueing record left RUNNING");
            record.state = StagingState::Staged;
            record.updated_at = Utc::now();
            journal.commit(record).await?;
        }

        info!(
            path = %path.display(),
            records = journal.records.len(),
            lines,
            "opened staging store"
        );
        Ok(Self {
            path,
            journal: Mutex::new(journal),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the record, journal it, then publish it.
    async fn update(
        &self,
        id: &StagingId,
        f: impl FnOnce(&mut StagingRecord) -> StorageResult<()> + Send,
    ) -> StorageResult<StagingRecord> {
        let mut journal = self.journal.lock().await;
        let mut record = journal.current(id)?;
        f(&mut record)?;
        record.updated_at = Utc::now();
        journal.commit(record.clone()).await?;
        Ok(record)
    }
}

#[async_trait]
impl StagingStore for JsonlStagingStore {
    async fn stage(&self, record: StagingRecord) -> StorageResult<StagingId> {
        let mut journal = self.journal.lock().await;
        if journal.records.contains_key(&record.staging_id) {
            return Err(StorageError::DuplicateStagingId {
                staging_id: record.staging_id.to_string(),
            });
        }
        let id = record.staging_id.clone();
        journal.commit(record).await?;
        debug!(staging_id = %id, "staged record");
        Ok(id)
    }

    async fn get(&self, id: &StagingId) -> StorageResult<StagingRecord> {
        self.journal.lock().await.current(id)
    }

    async fn transition(
        &self,
        id: &StagingId,
        from: StagingState,
        to: StagingState,
    ) -> StorageResult<StagingRecord> {
        let record = self
            .update(id, |r| {
                check_edge(r, from, to)?;
                r.state = to;
                Ok(())
            })
            .await?;
        debug!(staging_id = %id, %from, %to, "state transition");
        Ok(record)
    }

    async fn record_verification(
        &self,
        id: &StagingId,
        verification: VerificationRecord,
    ) -> StorageResult<()> {
        self.update(id, |r| {
            r.verification = Some(verification);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn set_failure_reason(&self, id: &StagingId, reason: String) -> StorageResult<()> {
        self.update(id, |r| {
            r.failure_reason = Some(reason);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn mark_promoted(
        &self,
        id: &StagingId,
        promoted_at: DateTime<Utc>,
    ) -> StorageResult<StagingRecord> {
        self.update(id, |r| {
            check_edge(r, StagingState::Passed, StagingState::Promoted)?;
            r.state = StagingState::Promoted;
            r.promoted_at = Some(promoted_at);
            Ok(())
        })
        .await
    }

    async fn list(&self, state: Option<StagingState>) -> StorageResult<Vec<StagingRecord>> {
        let journal = self.journal.lock().await;
        let mut rows: Vec<StagingRecord> = journal
            .records
            .values()
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.staging_id.cmp(&b.staging_id))
        });
        Ok(rows)
    }

    async fn counts(&self) -> StorageResult<StateCounts> {
        let journal = self.journal.lock().await;
        let mut counts = StateCounts::default();
        for r in journal.records.values() {
            counts.bump(r.state);
        }
        Ok(counts)
    }
}
