//! In-memory backends for the storage traits
//!
//! `MemoryStagingStore` and `MemoryPromotionLedger` back tests, embedded
//! use and ephemeral runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryStagingStore
// ---------------------------------------------------------------------------

/// Staging store backed by a `HashMap<staging_id, record>`.
///
/// Every mutation happens under one lock, which makes `transition` a true
/// compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    records: Mutex<HashMap<StagingId, StagingRecord>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(
        &self,
        id: &StagingId,
        f: impl FnOnce(&mut StagingRecord) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::StagingNotFound {
                staging_id: id.to_string(),
            })?;
        f(record)
    }
}

pub(crate) fn check_edge(
    record: &StagingRecord,
    from: StagingState,
    to: StagingState,
) -> StorageResult<()> {
    if !from.can_transition_to(to) {
        return Err(StorageError::IllegalTransition {
            staging_id: record.staging_id.to_string(),
            from,
            to,
        });
    }
    if record.state != from {
        return Err(StorageError::StateMismatch {
            staging_id: record.staging_id.to_string(),
            expected: from,
            actual: record.state,
        });
    }
    Ok(())
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn stage(&self, record: StagingRecord) -> StorageResult<StagingId> {
        let mut records = lock(&self.records);
        if records.contains_key(&record.staging_id) {
            return Err(StorageError::DuplicateStagingId {
                staging_id: record.staging_id.to_string(),
            });
        }
        let id = record.staging_id.clone();
        debug!(staging_id = %id, "staged record");
        records.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &StagingId) -> StorageResult<StagingRecord> {
        self.with_record(id, |r| Ok(r.clone()))
    }

    async fn transition(
        &self,
        id: &StagingId,
        from: StagingState,
        to: StagingState,
    ) -> StorageResult<StagingRecord> {
        self.with_record(id, |r| {
            check_edge(r, from, to)?;
            r.state = to;
            r.updated_at = Utc::now();
            debug!(staging_id = %id, %from, %to, "state transition");
            Ok(r.clone())
        })
    }

    async fn record_verification(
        &self,
        id: &StagingId,
        verification: VerificationRecord,
    ) -> StorageResult<()> {
        self.with_record(id, |r| {
            r.verification = Some(verification);
            r.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn set_failure_reason(&self, id: &StagingId, reason: String) -> StorageResult<()> {
        self.with_record(id, |r| {
            r.failure_reason = Some(reason);
            r.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn mark_promoted(
        &self,
        id: &StagingId,
        promoted_at: DateTime<Utc>,
    ) -> StorageResult<StagingRecord> {
        self.with_record(id, |r| {
            check_edge(r, StagingState::Passed, StagingState::Promoted)?;
            r.state = StagingState::Promoted;
            r.promoted_at = Some(promoted_at);
            r.updated_at = Utc::now();
            Ok(r.clone())
        })
    }

    async fn list(&self, state: Option<StagingState>) -> StorageResult<Vec<StagingRecord>> {
        let records = lock(&self.records);
        let mut rows: Vec<StagingRecord> = records
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
        let records = lock(&self.records);
        let mut counts = StateCounts::default();
        for r in records.values() {
            counts.bump(r.state);
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// MemoryPromotionLedger
// ---------------------------------------------------------------------------

/// Promotion ledger backed by a `Vec`, ordered by `seq`.
#[derive(Debug, Default)]
pub struct MemoryPromotionLedger {
    rows: Mutex<Vec<PromotionRecord>>,
    evictions: Mutex<Vec<EvictionRecord>>,
}

impl MemoryPromotionLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared append rule for the vector-backed ledgers.
pub(crate) fn append_to(
    rows: &mut Vec<PromotionRecord>,
    mut record: PromotionRecord,
) -> StorageResult<PromotionRecord> {
    if let Some(existing) = rows.iter().find(|r| r.staging_id == record.staging_id) {
        return Err(StorageError::DuplicatePromotion {
            staging_id: record.staging_id.to_string(),
            seq: existing.seq,
        });
    }
    record.seq = rows.last().map_or(1, |r| r.seq + 1);
    rows.push(record.clone());
    Ok(record)
}

#[async_trait]
impl PromotionLedger for MemoryPromotionLedger {
    async fn append(&self, record: PromotionRecord) -> StorageResult<PromotionRecord> {
        let mut rows = lock(&self.rows);
        append_to(&mut rows, record)
    }

    async fn record_eviction(&self, eviction: EvictionRecord) -> StorageResult<()> {
        lock(&self.evictions).push(eviction);
        Ok(())
    }

    async fn evictions(&self) -> StorageResult<Vec<EvictionRecord>> {
        Ok(lock(&self.evictions).clone())
    }

    async fn history(&self) -> StorageResult<Vec<PromotionRecord>> {
        Ok(lock(&self.rows).clone())
    }

    async fn find_by_staging_id(
        &self,
        id: &StagingId,
    ) -> StorageResult<Option<PromotionRecord>> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| &r.staging_id == id)
            .cloned())
    }
}
