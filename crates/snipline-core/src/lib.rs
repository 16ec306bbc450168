//! Snipline Core Library
//!
//! Staged snippet promotion: content hashing, engine registry, slot
//! allocation, sandboxed execution, spec verification and the promotion
//! controller that ties them together.

pub mod audit;
pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod hasher;
pub mod metrics;
pub mod obs;
pub mod render;
pub mod sandbox;
pub mod slots;
pub mod telemetry;
pub mod verifier;

pub use audit::{
    AuditEntry, AuditEventType, AuditSink, JsonlAuditSink, MemoryAuditSink, NullAuditSink,
};
pub use config::{
    DedupPolicy, EvictionConfig, LedgerBackend, LedgerConfig, PinnedSlot, PipelineConfig,
};
pub use controller::{PromotionController, PromotionControllerBuilder};
pub use domain::{PipelineError, PipelineSummary, Result, RunReport, SubmitRequest};
pub use engine::{Engine, EngineRegistry};
pub use render::{render_artifact, render_header, write_artifact};
pub use sandbox::{
    CircuitBreaker, ExecutionLimits, ExecutionOutcome, ProcessSandbox, RetryConfig,
    SandboxBackend, SandboxError, SandboxResult, Toolchain,
};
pub use slots::{
    EvictionPolicy, FixedAssignment, LeastRecentlyPromoted, Occupant, RejectOnFull,
    SlotAllocator, SlotAssignment,
};
pub use verifier::{verify, Verification};

pub use snipline_state::{
    ContentHash, Language, PromotionLedger, PromotionRecord, Snippet, SnippetSpec, SpecResult,
    StagingId, StagingRecord, StagingState, StagingStore,
};
