//! Sandbox: isolated execution of one snippet under one engine.
//!
//! Backends implement [`SandboxBackend`]. A snippet that fails to compile,
//! crashes, or exceeds its wall-clock limit still produces an
//! [`ExecutionOutcome`]; only infrastructure problems are errors.
//! Execution controls (retry with backoff, circuit breaker) wrap backend
//! calls so a broken toolchain cannot turn into FAILED verdicts.
//!
//! # Modules
//!
//! - [`toolchain`] : per-language compile/run commands
//! - [`process`]   : `ProcessSandbox`, the default local-process backend
//! - [`execution`] : `RetryConfig`, `CircuitBreaker`, `execute_with_controls()`
//! - [`error`]     : `SandboxError` / `SandboxResult`

pub mod error;
pub mod execution;
pub mod process;
pub mod toolchain;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snipline_state::Snippet;

use crate::engine::Engine;

pub use error::{SandboxError, SandboxResult};
pub use execution::{execute_with_controls, CircuitBreaker, RetryConfig};
pub use process::ProcessSandbox;
pub use toolchain::Toolchain;

/// Resource limits applied to one execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock ceiling covering compile and run together.
    pub wall_time_ms: u64,
    /// Per-stream output cap; excess output is discarded.
    pub max_output_bytes: usize,
    /// Optional address-space cap for child processes.
    pub memory_limit_kb: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            wall_time_ms: 10_000,
            max_output_bytes: 1024 * 1024,
            memory_limit_kb: None,
        }
    }
}

impl ExecutionLimits {
    pub fn wall_time(&self) -> Duration {
        Duration::from_millis(self.wall_time_ms)
    }
}

/// What happened when a snippet ran.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or timed out.
    pub exit_status: Option<i32>,
    pub wall_time: Duration,
    pub timed_out: bool,
    /// Either stream hit `max_output_bytes`.
    pub output_truncated: bool,
}

/// An isolated executor for snippets.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        snippet: &Snippet,
        engine: &Engine,
        limits: &ExecutionLimits,
    ) -> SandboxResult<ExecutionOutcome>;
}
