//! Storage trait definitions for snipline
//!
//! These traits define the core storage abstractions:
//! - `StagingStore`: staged candidates and their lifecycle state
//! - `PromotionLedger`: append-only promotion history and eviction journal
//!
//! All traits are async and backend-agnostic. In-memory backends live in
//! the `memory` module; durable backends in `jsonl_staging`,
//! `jsonl_ledger` and `surreal_ledger`.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::language::Language;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// SHA-256 fingerprint of a normalized snippet (64 lowercase hex chars).
///
/// The inner field is private; values come from `from_bytes` or are
/// validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the SHA-256 hash of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form: first 16 hex chars followed by an ellipsis.
    pub fn short(&self) -> String {
        format!("{}…", &self.0[..16.min(self.0.len())])
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidHash { hash: s });
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a staged candidate: `stg-` followed by 12 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StagingId(String);

impl StagingId {
    const PREFIX: &'static str = "stg-";

    /// Generate a fresh random id from a v4 UUID.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        StagingId(format!("{}{}", Self::PREFIX, &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StagingId {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let valid = s
            .strip_prefix(Self::PREFIX)
            .map(|rest| {
                rest.len() == 12
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            })
            .unwrap_or(false);
        if !valid {
            return Err(StorageError::InvalidStagingId { staging_id: s });
        }
        Ok(StagingId(s))
    }
}

impl std::str::FromStr for StagingId {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StagingId::try_from(s.to_string())
    }
}

impl From<StagingId> for String {
    fn from(id: StagingId) -> Self {
        id.0
    }
}

impl fmt::Display for StagingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// An immutable code candidate. A resubmission is a new `Snippet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub language: Language,
    pub source: String,
    /// Human title; not unique.
    pub label: String,
}

/// Declarative expectation a snippet must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_stdout: Option<String>,
    /// Defaults to 0 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_ms: Option<u64>,
}

impl SnippetSpec {
    pub fn expect_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.expected_stdout = Some(stdout.into());
        self
    }

    pub fn expect_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = Some(code);
        self
    }

    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = Some(ms);
        self
    }

    /// The exit code a run must produce.
    pub fn exit_code(&self) -> i32 {
        self.expected_exit_code.unwrap_or(0)
    }

    /// SHA-256 hex of the canonical JSON form.
    ///
    /// The exit code is made explicit first, so an undeclared code and an
    /// explicit 0 digest the same. Field order is fixed by the struct
    /// definition.
    pub fn digest(&self) -> StorageResult<String> {
        let canonical = Self {
            expected_exit_code: Some(self.exit_code()),
            ..self.clone()
        };
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(ContentHash::from_bytes(&bytes).0)
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Lifecycle state of a staged candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagingState {
    Staged,
    Running,
    Passed,
    Failed,
    Promoted,
}

impl StagingState {
    pub const ALL: [StagingState; 5] = [
        StagingState::Staged,
        StagingState::Running,
        StagingState::Passed,
        StagingState::Failed,
        StagingState::Promoted,
    ];

    /// Whether `self -> to` is an edge of the lifecycle state machine.
    ///
    /// `Running -> Staged` is the infrastructure requeue edge; it never
    /// carries a verdict.
    pub fn can_transition_to(self, to: StagingState) -> bool {
        use StagingState::*;
        matches!(
            (self, to),
            (Staged, Running)
                | (Running, Passed)
                | (Running, Failed)
                | (Running, Staged)
                | (Passed, Promoted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StagingState::Failed | StagingState::Promoted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StagingState::Staged => "STAGED",
            StagingState::Running => "RUNNING",
            StagingState::Passed => "PASSED",
            StagingState::Failed => "FAILED",
            StagingState::Promoted => "PROMOTED",
        }
    }
}

impl fmt::Display for StagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StagingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STAGED" => Ok(StagingState::Staged),
            "RUNNING" => Ok(StagingState::Running),
            "PASSED" => Ok(StagingState::Passed),
            "FAILED" => Ok(StagingState::Failed),
            "PROMOTED" => Ok(StagingState::Promoted),
            _ => Err(format!("unknown staging state: {s}")),
        }
    }
}

/// Verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpecResult {
    Pass,
    Fail,
}

impl SpecResult {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecResult::Pass => "PASS",
            SpecResult::Fail => "FAIL",
        }
    }
}

impl fmt::Display for SpecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored result of verifying one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub result: SpecResult,
    /// Measured wall time of the execution, in seconds.
    pub spec_time_secs: f64,
    pub violations: Vec<String>,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub verified_at: DateTime<Utc>,
}

/// A staged candidate and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub staging_id: StagingId,
    pub snippet: Snippet,
    pub spec: SnippetSpec,
    pub content_hash: ContentHash,
    /// Engine requested at intake, if any.
    pub engine_code: Option<String>,
    pub state: StagingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verification: Option<VerificationRecord>,
    pub failure_reason: Option<String>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl StagingRecord {
    /// A new record in `Staged` state.
    pub fn new(
        staging_id: StagingId,
        snippet: Snippet,
        spec: SnippetSpec,
        content_hash: ContentHash,
        engine_code: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            staging_id,
            snippet,
            spec,
            content_hash,
            engine_code,
            state: StagingState::Staged,
            created_at: now,
            updated_at: now,
            verification: None,
            failure_reason: None,
            promoted_at: None,
        }
    }
}

/// Number of records per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub staged: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    pub promoted: usize,
}

impl StateCounts {
    pub fn bump(&mut self, state: StagingState) {
        match state {
            StagingState::Staged => self.staged += 1,
            StagingState::Running => self.running += 1,
            StagingState::Passed => self.passed += 1,
            StagingState::Failed => self.failed += 1,
            StagingState::Promoted => self.promoted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.staged + self.running + self.passed + self.failed + self.promoted
    }
}

/// Staged candidate persistence with compare-and-swap transitions.
///
/// Guarantees:
/// - `stage` never overwrites: an existing id yields `DuplicateStagingId`.
/// - `transition(id, from, to)` is atomic: it fails with `StateMismatch`
///   unless the current state is `from`, and with `IllegalTransition`
///   unless `from -> to` is a lifecycle edge.
/// - `updated_at` moves on every successful mutation.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Insert a new record.
    async fn stage(&self, record: StagingRecord) -> StorageResult<StagingId>;

    /// Fetch a record. Returns `StagingNotFound` if absent.
    async fn get(&self, id: &StagingId) -> StorageResult<StagingRecord>;

    /// Atomically move `id` from `from` to `to`, returning the updated record.
    async fn transition(
        &self,
        id: &StagingId,
        from: StagingState,
        to: StagingState,
    ) -> StorageResult<StagingRecord>;

    /// Attach a verification to a record.
    async fn record_verification(
        &self,
        id: &StagingId,
        verification: VerificationRecord,
    ) -> StorageResult<()>;

    /// Attach a human-readable failure reason.
    async fn set_failure_reason(&self, id: &StagingId, reason: String) -> StorageResult<()>;

    /// `Passed -> Promoted`, stamping `promoted_at`.
    async fn mark_promoted(
        &self,
        id: &StagingId,
        promoted_at: DateTime<Utc>,
    ) -> StorageResult<StagingRecord>;

    /// Records ordered by `created_at`, optionally filtered by state.
    async fn list(&self, state: Option<StagingState>) -> StorageResult<Vec<StagingRecord>>;

    /// Record counts per state.
    async fn counts(&self) -> StorageResult<StateCounts>;
}

// ---------------------------------------------------------------------------
// PromotionLedger
// ---------------------------------------------------------------------------

/// Immutable record of one promotion into a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    /// Ledger sequence number, assigned by `PromotionLedger::append`.
    pub seq: u64,
    pub staging_id: StagingId,
    pub content_hash: ContentHash,
    pub language: Language,
    pub engine_code: String,
    pub engine_name: String,
    /// 1-based position within the engine.
    pub position: u32,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub promoted_at: DateTime<Utc>,
    pub spec_time_secs: f64,
    pub spec_result: SpecResult,
    pub spec_digest: String,
    /// Previous occupant overwritten by this promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired: Option<StagingId>,
}

impl PromotionRecord {
    /// Slot address, e.g. `m2`.
    pub fn address(&self) -> String {
        format!("{}{}", self.engine_code, self.position)
    }
}

/// Operator removal of a promoted occupant from its slot.
///
/// The promotion record itself stays in the ledger; the eviction only
/// ends its occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub staging_id: StagingId,
    pub engine_code: String,
    pub position: u32,
    pub label: String,
    pub evicted_at: DateTime<Utc>,
}

impl EvictionRecord {
    /// Slot address, e.g. `m2`.
    pub fn address(&self) -> String {
        format!("{}{}", self.engine_code, self.position)
    }
}

/// Append-only promotion history plus the journal of slot evictions.
///
/// Guarantees:
/// - `append` assigns strictly increasing `seq` values starting at 1.
/// - A staging id appears in at most one record (`DuplicatePromotion`).
/// - Records are never mutated or removed.
/// - Evictions are kept in the order they were recorded.
#[async_trait]
pub trait PromotionLedger: Send + Sync {
    /// Append a record, assigning its `seq`. Returns the stored record.
    async fn append(&self, record: PromotionRecord) -> StorageResult<PromotionRecord>;

    /// Journal an eviction.
    async fn record_eviction(&self, eviction: EvictionRecord) -> StorageResult<()>;

    /// Every journaled eviction, oldest first.
    async fn evictions(&self) -> StorageResult<Vec<EvictionRecord>>;

    /// Full history, oldest first.
    async fn history(&self) -> StorageResult<Vec<PromotionRecord>>;

    /// The promotion of a staging id, if any.
    async fn find_by_staging_id(&self, id: &StagingId)
        -> StorageResult<Option<PromotionRecord>>;

    /// Promotions into one slot, newest first.
    async fn for_slot(
        &self,
        engine_code: &str,
        position: u32,
    ) -> StorageResult<Vec<PromotionRecord>> {
        let mut rows: Vec<_> = self
            .history()
            .await?
            .into_iter()
            .filter(|r| r.engine_code == engine_code && r.position == position)
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// Promotions of a label on an engine, newest first.
    async fn for_label(
        &self,
        engine_code: &str,
        label: &str,
    ) -> StorageResult<Vec<PromotionRecord>> {
        let mut rows: Vec<_> = self
            .history()
            .await?
            .into_iter()
            .filter(|r| r.engine_code == engine_code && r.label == label)
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// Most recent promotion on `engine_code` with this content hash.
    async fn latest_for_content(
        &self,
        engine_code: &str,
        hash: &ContentHash,
    ) -> StorageResult<Option<PromotionRecord>> {
        Ok(self
            .history()
            .await?
            .into_iter()
            .rev()
            .find(|r| r.engine_code == engine_code && &r.content_hash == hash))
    }
}
