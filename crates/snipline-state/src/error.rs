//! Error types for snipline-state

use thiserror::Error;

use crate::storage_traits::StagingState;

/// Errors raised while connecting to or preparing a database backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Filesystem error while opening a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("staging record not found: {staging_id}")]
    StagingNotFound { staging_id: String },

    #[error("staging id already in use: {staging_id}")]
    DuplicateStagingId { staging_id: String },

    #[error("illegal transition for {staging_id}: {from} -> {to}")]
    IllegalTransition {
        staging_id: String,
        from: StagingState,
        to: StagingState,
    },

    #[error("state mismatch for {staging_id}: expected {expected}, found {actual}")]
    StateMismatch {
        staging_id: String,
        expected: StagingState,
        actual: StagingState,
    },

    #[error("staging id {staging_id} already has a promotion record (seq {seq})")]
    DuplicatePromotion { staging_id: String, seq: u64 },

    #[error("invalid content hash: {hash}")]
    InvalidHash { hash: String },

    #[error("invalid staging id: {staging_id}")]
    InvalidStagingId { staging_id: String },

    #[error("corrupt ledger entry at line {line}: {reason}")]
    CorruptLedger { line: usize, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}
