//! Error types for the sandbox module.

use crate::domain::PipelineError;

/// Errors produced by the sandbox layer.
///
/// Every variant is an infrastructure problem: a snippet that fails to
/// compile, crashes or runs too long still yields an `ExecutionOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no toolchain registered for {language}")]
    NoToolchain { language: String },

    #[error("toolchain program not found: {program}")]
    ToolchainMissing { program: String },

    #[error("scratch area unavailable: {0}")]
    Scratch(String),

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("execution failed after {attempts} attempt(s): {reason}")]
    ExecutionFailed { attempts: u32, reason: String },

    #[error(
        "circuit breaker open for engine {engine}: {consecutive_failures} consecutive failures (threshold {threshold})"
    )]
    CircuitBreakerOpen {
        engine: String,
        consecutive_failures: u32,
        threshold: u32,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SandboxError::CircuitBreakerOpen { .. } | SandboxError::NoToolchain { .. }
        )
    }
}

impl From<SandboxError> for PipelineError {
    fn from(err: SandboxError) -> Self {
        PipelineError::Infrastructure(err.to_string())
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
