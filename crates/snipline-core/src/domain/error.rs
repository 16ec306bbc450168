//! Pipeline error taxonomy.

use snipline_state::{StagingState, StorageError};

/// Errors produced by the promotion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed snippet, encoding, language or engine. Never staged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sandbox or toolchain unavailable. Never a FAILED verdict.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("spec failure for {staging_id}: {violations}")]
    SpecFailure {
        staging_id: String,
        violations: String,
    },

    #[error("engine {engine} has no free slot (capacity {capacity})")]
    CapacityExceeded { engine: String, capacity: u32 },

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: StagingState, to: StagingState },

    #[error("staging record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the failure is transient and the record was (or may be)
    /// requeued.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, PipelineError::Infrastructure(_))
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StagingNotFound { staging_id } => PipelineError::NotFound(staging_id),
            StorageError::IllegalTransition { from, to, .. } => {
                PipelineError::IllegalTransition { from, to }
            }
            other => PipelineError::Storage(other),
        }
    }
}

impl From<snipline_state::StateError> for PipelineError {
    fn from(err: snipline_state::StateError) -> Self {
        PipelineError::Storage(StorageError::Backend(err.to_string()))
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
