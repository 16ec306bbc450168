//! SurrealDB row types
//!
//! Tables:
//! - promotions: append-only promotion ledger
//! - evictions: append-only journal of operator evictions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::language::Language;
use crate::storage_traits::{
    ContentHash, EvictionRecord, PromotionRecord, SpecResult, StagingId, StorageResult,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row stored in the `promotions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub seq: u64,
    pub staging_id: String,
    pub content_hash: String,
    pub language: String,
    pub engine_code: String,
    pub engine_name: String,
    pub position: u32,
    pub label: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub promoted_at: DateTime<Utc>,
    pub spec_time_secs: f64,
    pub spec_result: String,
    pub spec_digest: String,
    pub retired: Option<String>,
}

impl From<&PromotionRecord> for PromotionRow {
    fn from(r: &PromotionRecord) -> Self {
        Self {
            id: None,
            seq: r.seq,
            staging_id: r.staging_id.to_string(),
            content_hash: r.content_hash.as_str().to_string(),
            language: r.language.as_str().to_string(),
            engine_code: r.engine_code.clone(),
            engine_name: r.engine_name.clone(),
            position: r.position,
            label: r.label.clone(),
            created_at: r.created_at,
            promoted_at: r.promoted_at,
            spec_time_secs: r.spec_time_secs,
            spec_result: r.spec_result.as_str().to_string(),
            spec_digest: r.spec_digest.clone(),
            retired: r.retired.as_ref().map(|id| id.to_string()),
        }
    }
}

impl PromotionRow {
    /// Convert a DB row back into a `PromotionRecord`.
    pub fn into_record(self) -> StorageResult<PromotionRecord> {
        let language = self
            .language
            .parse::<Language>()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let spec_result = match self.spec_result.as_str() {
            "PASS" => SpecResult::Pass,
            "FAIL" => SpecResult::Fail,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown spec result: {other}"
                )))
            }
        };
        Ok(PromotionRecord {
            seq: self.seq,
            staging_id: StagingId::try_from(self.staging_id)?,
            content_hash: ContentHash::try_from(self.content_hash)?,
            language,
            engine_code: self.engine_code,
            engine_name: self.engine_name,
            position: self.position,
            label: self.label,
            created_at: self.created_at,
            promoted_at: self.promoted_at,
            spec_time_secs: self.spec_time_secs,
            spec_result,
            spec_digest: self.spec_digest,
            retired: self.retired.map(StagingId::try_from).transpose()?,
        })
    }
}

/// Row stored in the `evictions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub staging_id: String,
    pub engine_code: String,
    pub position: u32,
    pub label: String,
    #[serde(with = "surreal_datetime")]
    pub evicted_at: DateTime<Utc>,
}

impl From<&EvictionRecord> for EvictionRow {
    fn from(e: &EvictionRecord) -> Self {
        Self {
            id: None,
            staging_id: e.staging_id.to_string(),
            engine_code: e.engine_code.clone(),
            position: e.position,
            label: e.label.clone(),
            evicted_at: e.evicted_at,
        }
    }
}

impl EvictionRow {
    pub fn into_record(self) -> StorageResult<EvictionRecord> {
        Ok(EvictionRecord {
            staging_id: StagingId::try_from(self.staging_id)?,
            engine_code: self.engine_code,
            position: self.position,
            label: self.label,
            evicted_at: self.evicted_at,
        })
    }
}
