//! SurrealDB-backed PromotionLedger implementation
//!
//! Uses `schema::PromotionRow` for persistence, converting to/from
//! `storage_traits::PromotionRecord` at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{EvictionRow, PromotionRow};
use crate::storage_traits::{
    EvictionRecord, PromotionLedger, PromotionRecord, StagingId, StorageResult,
};

const NAMESPACE: &str = "snipline";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`PromotionLedger`].
pub struct SurrealPromotionLedger {
    db: Surreal<Any>,
    /// Serializes sequence assignment within this process; the unique
    /// `seq` index rejects cross-process races.
    append_lock: Mutex<()>,
}

impl SurrealPromotionLedger {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`,
    /// `ws://host:port`), select `snipline/main` and run `init_schema`.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealPromotionLedger connected ({})", url);
        Ok(Self {
            db,
            append_lock: Mutex::new(()),
        })
    }

    // -- private helpers -----------------------------------------------------

    async fn select(
        &self,
        sql: &'static str,
        binds: Vec<(&'static str, serde_json::Value)>,
    ) -> StorageResult<Vec<PromotionRecord>> {
        let mut query = self.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut res = query
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<PromotionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(PromotionRow::into_record).collect()
    }

    async fn last_seq(&self) -> StorageResult<u64> {
        let rows = self
            .select(
                "SELECT * FROM promotions ORDER BY seq DESC LIMIT 1",
                Vec::new(),
            )
            .await?;
        Ok(rows.first().map_or(0, |r| r.seq))
    }
}

#[async_trait]
impl PromotionLedger for SurrealPromotionLedger {
    async fn append(&self, record: PromotionRecord) -> StorageResult<PromotionRecord> {
        let _guard = self.append_lock.lock().await;

        if let Some(existing) = self.find_by_staging_id(&record.staging_id).await? {
            return Err(StorageError::DuplicatePromotion {
                staging_id: record.staging_id.to_string(),
                seq: existing.seq,
            });
        }

        let mut stored = record;
        stored.seq = self.last_seq().await? + 1;

        debug!(seq = stored.seq, staging_id = %stored.staging_id, "creating promotion row");

        let _created: Option<PromotionRow> = self
            .db
            .create("promotions")
            .content(PromotionRow::from(&stored))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(stored)
    }

    async fn record_eviction(&self, eviction: EvictionRecord) -> StorageResult<()> {
        debug!(address = %eviction.address(), staging_id = %eviction.staging_id, "creating eviction row");
        let _created: Option<EvictionRow> = self
            .db
            .create("evictions")
            .content(EvictionRow::from(&eviction))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn evictions(&self) -> StorageResult<Vec<EvictionRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM evictions ORDER BY evicted_at ASC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows: Vec<EvictionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter().map(EvictionRow::into_record).collect()
    }

    async fn history(&self) -> StorageResult<Vec<PromotionRecord>> {
        self.select("SELECT * FROM promotions ORDER BY seq ASC", Vec::new())
            .await
    }

    async fn find_by_staging_id(
        &self,
        id: &StagingId,
    ) -> StorageResult<Option<PromotionRecord>> {
        let rows = self
            .select(
                "SELECT * FROM promotions WHERE staging_id = $sid",
                vec![("sid", serde_json::Value::from(id.as_str()))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn for_slot(
        &self,
        engine_code: &str,
        position: u32,
    ) -> StorageResult<Vec<PromotionRecord>> {
        self.select(
            "SELECT * FROM promotions WHERE engine_code = $code AND position = $pos ORDER BY seq DESC",
            vec![
                ("code", serde_json::Value::from(engine_code)),
                ("pos", serde_json::Value::from(position)),
            ],
        )
        .await
    }
}
