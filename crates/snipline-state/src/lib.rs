//! snipline-state: persistence layer for the snipline promotion pipeline
//!
//! ## Key Components
//!
//! - `StagingStore`: staged candidates with compare-and-swap lifecycle
//!   transitions, with memory and JSON-lines backends
//! - `PromotionLedger`: append-only promotion history and eviction
//!   journal, with memory, JSON-lines and SurrealDB backends
//! - Record types shared by every layer (`Snippet`, `StagingRecord`,
//!   `PromotionRecord`, ...)

mod error;
pub mod jsonl_ledger;
pub mod jsonl_staging;
pub mod language;
pub mod memory;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use jsonl_ledger::JsonlPromotionLedger;
pub use jsonl_staging::JsonlStagingStore;
pub use language::{Language, ParseLanguageError};
pub use memory::{MemoryPromotionLedger, MemoryStagingStore};
pub use storage_traits::{
    ContentHash, EvictionRecord, PromotionLedger, PromotionRecord, Snippet, SnippetSpec,
    SpecResult, StagingId, StagingRecord, StagingState, StagingStore, StateCounts, StorageResult,
    VerificationRecord,
};
pub use surreal_ledger::SurrealPromotionLedger;

/// Result type for snipline-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
