//! Promotion controller: stage -> execute -> verify -> allocate -> promote.
//!
//! The controller owns no lifecycle state of its own. Every decision is
//! taken against the staging store through compare-and-swap transitions,
//! so any number of workers can call [`PromotionController::run`] on the
//! same id and at most one of them executes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use snipline_state::{
    EvictionRecord, MemoryPromotionLedger, MemoryStagingStore, PromotionLedger, PromotionRecord,
    Snippet, SpecResult, StagingId, StagingRecord, StagingState, StagingStore, StorageError,
    VerificationRecord,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use crate::audit::{AuditEntry, AuditEventType, AuditSink, JsonlAuditSink, NullAuditSink};
use crate::config::{DedupPolicy, PipelineConfig};
use crate::domain::{PipelineError, PipelineSummary, Result, RunReport, SubmitRequest};
use crate::engine::{Engine, EngineRegistry};
use crate::hasher;
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::{
    execute_with_controls, CircuitBreaker, ExecutionLimits, ExecutionOutcome, RetryConfig,
    SandboxBackend,
};
use crate::slots::{EvictionPolicy, Occupant, RejectOnFull, SlotAllocator};
use crate::verifier;

/// Fresh ids tried before intake gives up on collisions.
const STAGE_ATTEMPTS: usize = 3;

/// Builder for [`PromotionController`].
pub struct PromotionControllerBuilder {
    sandbox: Arc<dyn SandboxBackend>,
    registry: EngineRegistry,
    policy: Arc<dyn EvictionPolicy>,
    store: Option<Arc<dyn StagingStore>>,
    ledger: Option<Arc<dyn PromotionLedger>>,
    audit: Arc<dyn AuditSink>,
    limits: ExecutionLimits,
    retry: RetryConfig,
    dedup: DedupPolicy,
    worker_pool_size: usize,
}

impl PromotionControllerBuilder {
    pub fn with_registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_eviction_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StagingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn PromotionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn build(self) -> PromotionController {
        let allocator = SlotAllocator::new(&self.registry, self.policy);
        let breakers = self
            .registry
            .engines()
            .map(|e| (e.code.clone(), CircuitBreaker::from_config(&self.retry)))
            .collect();
        PromotionController {
            allocator,
            breakers,
            registry: self.registry,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStagingStore::new())),
            ledger: self
                .ledger
                .unwrap_or_else(|| Arc::new(MemoryPromotionLedger::new())),
            sandbox: self.sandbox,
            audit: self.audit,
            limits: self.limits,
            retry: self.retry,
            dedup: self.dedup,
            workers: Arc::new(Semaphore::new(self.worker_pool_size.max(1))),
        }
    }
}

/// Result of the verify step for a record this worker moved to RUNNING.
struct Settled {
    record: StagingRecord,
    reused_verdict: bool,
}

/// Drives staged records through execution, verification and promotion.
pub struct PromotionController {
    registry: EngineRegistry,
    allocator: SlotAllocator,
    store: Arc<dyn StagingStore>,
    ledger: Arc<dyn PromotionLedger>,
    sandbox: Arc<dyn SandboxBackend>,
    audit: Arc<dyn AuditSink>,
    limits: ExecutionLimits,
    retry: RetryConfig,
    breakers: HashMap<String, CircuitBreaker>,
    dedup: DedupPolicy,
    workers: Arc<Semaphore>,
}

impl PromotionController {
    /// Standard registry, in-memory store and ledger, no audit trail.
    pub fn builder(sandbox: Arc<dyn SandboxBackend>) -> PromotionControllerBuilder {
        PromotionControllerBuilder {
            sandbox,
            registry: EngineRegistry::standard(),
            policy: Arc::new(RejectOnFull),
            store: None,
            ledger: None,
            audit: Arc::new(NullAuditSink),
            limits: ExecutionLimits::default(),
            retry: RetryConfig::default(),
            dedup: DedupPolicy::default(),
            worker_pool_size: 4,
        }
    }

    /// Controller wired from configuration, with slot occupancy restored
    /// from the ledger.
    pub async fn from_config(
        config: &PipelineConfig,
        sandbox: Arc<dyn SandboxBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = match config.capacity_override {
            Some(capacity) => EngineRegistry::standard().with_capacity_override(capacity),
            None => EngineRegistry::standard(),
        };
        let controller = Self::builder(sandbox)
            .with_registry(registry)
            .with_eviction_policy(config.eviction_policy())
            .with_store(config.open_store().await?)
            .with_ledger(config.open_ledger().await?)
            .with_audit(Arc::new(JsonlAuditSink::open(config.audit_path())?))
            .with_limits(config.limits.clone())
            .with_retry(config.retry.clone())
            .with_dedup(config.dedup)
            .with_worker_pool_size(config.worker_pool_size)
            .build();
        let restored = controller.restore_from_ledger().await?;
        info!(
            restored,
            ledger_backend = ?config.ledger.backend,
            staging_backend = ?config.staging.backend,
            eviction = controller.allocator.policy().name(),
            "promotion controller ready"
        );
        Ok(controller)
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    pub fn store(&self) -> &Arc<dyn StagingStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn PromotionLedger> {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Validate, hash and stage a candidate.
    pub async fn submit(&self, request: SubmitRequest) -> Result<StagingId> {
        hasher::validate_source(&request.source)?;
        hasher::validate_label(&request.label)?;
        let engine = self.engine_for(&request)?.clone();
        let content_hash = hasher::hash(request.language, &request.source);
        let snippet = Snippet {
            language: request.language,
            source: request.source,
            label: request.label,
        };

        let mut last_err = None;
        for _ in 0..STAGE_ATTEMPTS {
            let record = StagingRecord::new(
                StagingId::generate(),
                snippet.clone(),
                request.spec.clone(),
                content_hash.clone(),
                Some(engine.code.clone()),
            );
            match self.store.stage(record).await {
                Ok(id) => {
                    METRICS.inc_staged();
                    obs::emit_staged(
                        id.as_str(),
                        snippet.language.as_str(),
                        &engine.code,
                        &snippet.label,
                    );
                    self.record_audit(
                        AuditEventType::SnippetQueued,
                        Some(&id),
                        json!({
                            "language": snippet.language,
                            "engine": engine.code,
                            "label": snippet.label,
                            "content_hash": content_hash,
                        }),
                    )
                    .await;
                    return Ok(id);
                }
                Err(err @ StorageError::DuplicateStagingId { .. }) => {
                    debug!(error = %err, "staging id collision, retrying with a fresh id");
                    last_err = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(last_err
            .map(PipelineError::from)
            .unwrap_or_else(|| PipelineError::Storage(StorageError::Backend("staging failed".into()))))
    }

    /// Submit then run one candidate.
    pub async fn submit_and_run(&self, request: SubmitRequest) -> Result<RunReport> {
        let id = self.submit(request).await?;
        self.run(&id).await
    }

    fn engine_for(&self, request: &SubmitRequest) -> Result<&Engine> {
        match request.engine_code.as_deref() {
            Some(code) => {
                let engine = self.registry.get(code)?;
                if engine.language != request.language {
                    return Err(PipelineError::InvalidInput(format!(
                        "engine {} runs {}, not {}",
                        engine.code, engine.language, request.language
                    )));
                }
                Ok(engine)
            }
            None => self.default_engine(request.language),
        }
    }

    fn default_engine(&self, language: snipline_state::Language) -> Result<&Engine> {
        let code = self
            .registry
            .resolve(language)
            .into_iter()
            .next()
            .map(|e| e.code)
            .ok_or_else(|| PipelineError::InvalidInput(format!("no engine serves {language}")))?;
        self.registry.get(&code)
    }

    fn engine_of(&self, record: &StagingRecord) -> Result<&Engine> {
        match record.engine_code.as_deref() {
            Some(code) => self.registry.get(code),
            None => self.default_engine(record.snippet.language),
        }
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Advance one record as far as it can go.
    ///
    /// Terminal and RUNNING records are reported as observed. A PASSED
    /// record only retries the promotion step. A STAGED record is claimed,
    /// executed, verified and, on PASS, promoted. Infrastructure failures
    /// put the record back to STAGED and surface the error.
    pub async fn run(&self, id: &StagingId) -> Result<RunReport> {
        self.advance(id)
            .instrument(obs::staging_span(id.as_str()))
            .await
    }

    async fn advance(&self, id: &StagingId) -> Result<RunReport> {
        let record = self.store.get(id).await?;
        match record.state {
            StagingState::Failed | StagingState::Promoted | StagingState::Running => {
                debug!(state = %record.state, "nothing to do");
                return Ok(RunReport::observed(&record));
            }
            StagingState::Passed => return self.promote(record, false, false).await,
            StagingState::Staged => {}
        }

        let engine = self.engine_of(&record)?.clone();
        let record = match self
            .store
            .transition(id, StagingState::Staged, StagingState::Running)
            .await
        {
            Ok(record) => record,
            Err(StorageError::StateMismatch { actual, .. }) => {
                debug!(%actual, "lost claim race");
                return Ok(RunReport::observed(&self.store.get(id).await?));
            }
            Err(err) => return Err(err.into()),
        };

        let settled = match self.settle(&record, &engine).await {
            Ok(settled) => settled,
            Err(err) => {
                self.requeue(id, &err).await;
                return Err(err);
            }
        };

        let executed = !settled.reused_verdict;
        if settled.record.state == StagingState::Passed {
            return self
                .promote(settled.record, executed, settled.reused_verdict)
                .await;
        }
        Ok(RunReport {
            executed,
            ..RunReport::observed(&settled.record)
        })
    }

    /// Run many ids concurrently. Execution is bounded by the worker pool.
    pub async fn run_many(self: &Arc<Self>, ids: Vec<StagingId>) -> Vec<Result<RunReport>> {
        let tasks = ids.into_iter().map(|id| {
            let controller = Arc::clone(self);
            tokio::spawn(async move { controller.run(&id).await })
        });
        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(PipelineError::Infrastructure(format!("worker task failed: {e}")))
                })
            })
            .collect()
    }

    /// Produce and persist a verdict for a RUNNING record, moving it to
    /// PASSED or FAILED.
    async fn settle(&self, record: &StagingRecord, engine: &Engine) -> Result<Settled> {
        let id = &record.staging_id;

        if let Some(reused) = self.reusable_verdict(record, engine).await? {
            self.store.record_verification(id, reused).await?;
            let record = self
                .store
                .transition(id, StagingState::Running, StagingState::Passed)
                .await?;
            METRICS.inc_passed();
            self.record_audit(
                AuditEventType::VerdictReused,
                Some(id),
                json!({ "engine": engine.code, "content_hash": record.content_hash }),
            )
            .await;
            return Ok(Settled {
                record,
                reused_verdict: true,
            });
        }

        let outcome = self.execute(record, engine).await?;
        let verification = verifier::verify(&outcome, &record.spec);
        obs::emit_verdict(
            id.as_str(),
            verification.result.as_str(),
            verification.spec_time_secs(),
            verification.violations.len(),
        );
        self.store
            .record_verification(id, verification.to_record(&outcome))
            .await?;

        let record = if verification.passed() {
            let record = self
                .store
                .transition(id, StagingState::Running, StagingState::Passed)
                .await?;
            METRICS.inc_passed();
            self.record_audit(
                AuditEventType::VerdictPass,
                Some(id),
                json!({ "spec_time_secs": verification.spec_time_secs() }),
            )
            .await;
            record
        } else {
            let reason = verification.violations.join("; ");
            self.store.set_failure_reason(id, reason.clone()).await?;
            let record = self
                .store
                .transition(id, StagingState::Running, StagingState::Failed)
                .await?;
            METRICS.inc_failed();
            self.record_audit(
                AuditEventType::VerdictFail,
                Some(id),
                json!({
                    "spec_time_secs": verification.spec_time_secs(),
                    "violations": verification.violations,
                }),
            )
            .await;
            info!(staging_id = %id, reason = %reason, "snippet failed its spec");
            record
        };
        Ok(Settled {
            record,
            reused_verdict: false,
        })
    }

    /// A PASS carried over from an earlier promotion of the same content
    /// and spec on this engine, when the dedup policy allows it.
    async fn reusable_verdict(
        &self,
        record: &StagingRecord,
        engine: &Engine,
    ) -> Result<Option<VerificationRecord>> {
        if self.dedup != DedupPolicy::ReusePromotedVerdict {
            return Ok(None);
        }
        let digest = record.spec.digest()?;
        let prior = self
            .ledger
            .latest_for_content(&engine.code, &record.content_hash)
            .await?
            .filter(|p| p.spec_digest == digest);
        Ok(prior.map(|p| {
            debug!(seq = p.seq, from = %p.staging_id, "reusing promoted verdict");
            VerificationRecord {
                result: SpecResult::Pass,
                spec_time_secs: p.spec_time_secs,
                violations: Vec::new(),
                exit_status: Some(record.spec.exit_code()),
                timed_out: false,
                stdout_excerpt: String::new(),
                stderr_excerpt: String::new(),
                verified_at: Utc::now(),
            }
        }))
    }

    async fn execute(
        &self,
        record: &StagingRecord,
        engine: &Engine,
    ) -> Result<ExecutionOutcome> {
        let id = &record.staging_id;
        let breaker = self.breakers.get(&engine.code).ok_or_else(|| {
            PipelineError::InvalidInput(format!("unknown engine: {}", engine.code))
        })?;
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| PipelineError::Infrastructure(format!("worker pool closed: {e}")))?;

        obs::emit_execution_started(id.as_str(), &engine.code, self.sandbox.name());
        self.record_audit(
            AuditEventType::ExecutionStarted,
            Some(id),
            json!({ "engine": engine.code, "sandbox": self.sandbox.name() }),
        )
        .await;

        let result = execute_with_controls(&engine.code, &self.retry, breaker, || {
            self.sandbox.execute(&record.snippet, engine, &self.limits)
        })
        .await;

        match result {
            Ok((outcome, attempts)) => {
                METRICS.inc_executed();
                let wall_ms = outcome.wall_time.as_millis() as u64;
                obs::emit_execution_finished(
                    id.as_str(),
                    wall_ms,
                    outcome.exit_status,
                    outcome.timed_out,
                    attempts,
                );
                self.record_audit(
                    AuditEventType::ExecutionCompleted,
                    Some(id),
                    json!({
                        "wall_ms": wall_ms,
                        "exit_status": outcome.exit_status,
                        "timed_out": outcome.timed_out,
                        "output_truncated": outcome.output_truncated,
                        "attempts": attempts,
                    }),
                )
                .await;
                Ok(outcome)
            }
            Err(err) => {
                self.record_audit(
                    AuditEventType::ExecutionFailed,
                    Some(id),
                    json!({ "engine": engine.code, "error": err.to_string() }),
                )
                .await;
                Err(err.into())
            }
        }
    }

    /// Put a RUNNING record back to STAGED after a non-verdict failure.
    async fn requeue(&self, id: &StagingId, err: &PipelineError) {
        match self
            .store
            .transition(id, StagingState::Running, StagingState::Staged)
            .await
        {
            Ok(_) => {
                METRICS.inc_requeued();
                obs::emit_requeued(id.as_str(), err);
            }
            Err(requeue_err) => {
                warn!(staging_id = %id, error = %requeue_err, "failed to requeue record");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Promotion
    // -----------------------------------------------------------------------

    async fn promote(
        &self,
        record: StagingRecord,
        executed: bool,
        reused_verdict: bool,
    ) -> Result<RunReport> {
        let id = record.staging_id.clone();
        let engine = self.engine_of(&record)?.clone();

        // Ledger append succeeded on an earlier attempt but the record was
        // never marked.
        if let Some(existing) = self.ledger.find_by_staging_id(&id).await? {
            let promoted = self.finish_promotion(&id, &existing).await?;
            return Ok(RunReport {
                executed,
                reused_verdict,
                promotion: Some(existing),
                ..RunReport::observed(&promoted)
            });
        }

        let spec_time_secs = record
            .verification
            .as_ref()
            .map_or(0.0, |v| v.spec_time_secs);
        let spec_digest = record.spec.digest()?;
        let promoted_at = Utc::now();
        let occupant = Occupant {
            staging_id: id.clone(),
            label: record.snippet.label.clone(),
            content_hash: record.content_hash.clone(),
            promoted_at,
        };

        let assignment = match self.allocator.claim(&engine.code, occupant, None) {
            Ok(assignment) => assignment,
            Err(err) => {
                if let PipelineError::CapacityExceeded { capacity, .. } = &err {
                    obs::emit_capacity_exceeded(id.as_str(), &engine.code, *capacity);
                }
                self.record_audit(
                    AuditEventType::Error,
                    Some(&id),
                    json!({ "stage": "slot_claim", "error": err.to_string() }),
                )
                .await;
                return Err(err);
            }
        };
        let retired = assignment
            .retired(&record.snippet.label)
            .map(|o| o.staging_id.clone());

        let draft = PromotionRecord {
            seq: 0,
            staging_id: id.clone(),
            content_hash: record.content_hash.clone(),
            language: record.snippet.language,
            engine_code: engine.code.clone(),
            engine_name: engine.name.clone(),
            position: assignment.position,
            label: record.snippet.label.clone(),
            created_at: record.created_at,
            promoted_at,
            spec_time_secs,
            spec_result: SpecResult::Pass,
            spec_digest,
            retired: retired.clone(),
        };

        let stored = match self.ledger.append(draft).await {
            Ok(stored) => stored,
            Err(StorageError::DuplicatePromotion { .. }) => {
                debug!("promotion recorded by another worker");
                let existing = self.ledger.find_by_staging_id(&id).await?;
                // Same id in the same position means the slot already holds
                // the winner's occupant.
                if existing.as_ref().map(|p| p.position) != Some(assignment.position) {
                    self.allocator.revert(&assignment, &id)?;
                }
                return Ok(RunReport {
                    executed,
                    reused_verdict,
                    promotion: existing,
                    ..RunReport::observed(&self.store.get(&id).await?)
                });
            }
            Err(err) => {
                self.allocator.revert(&assignment, &id)?;
                return Err(err.into());
            }
        };

        let address = stored.address();
        self.record_audit(
            AuditEventType::SlotClaimed,
            Some(&id),
            json!({ "address": address, "label": stored.label }),
        )
        .await;
        if let Some(retired) = &retired {
            METRICS.inc_slots_retired();
            obs::emit_slot_retired(&address, retired.as_str(), id.as_str());
            self.record_audit(
                AuditEventType::SlotRetired,
                Some(retired),
                json!({ "address": address, "retired_by": id }),
            )
            .await;
        }

        let promoted = self.finish_promotion(&id, &stored).await?;
        Ok(RunReport {
            executed,
            reused_verdict,
            promotion: Some(stored),
            ..RunReport::observed(&promoted)
        })
    }

    /// Mark a ledgered promotion on the staging record.
    async fn finish_promotion(
        &self,
        id: &StagingId,
        promotion: &PromotionRecord,
    ) -> Result<StagingRecord> {
        let record = match self.store.mark_promoted(id, promotion.promoted_at).await {
            Ok(record) => record,
            Err(StorageError::StateMismatch {
                actual: StagingState::Promoted,
                ..
            }) => return Ok(self.store.get(id).await?),
            Err(err) => return Err(err.into()),
        };
        METRICS.inc_promoted();
        obs::emit_promoted(id.as_str(), &promotion.address(), promotion.seq);
        self.record_audit(
            AuditEventType::PromotionCompleted,
            Some(id),
            json!({
                "address": promotion.address(),
                "seq": promotion.seq,
                "spec_time_secs": promotion.spec_time_secs,
            }),
        )
        .await;
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Slots and history
    // -----------------------------------------------------------------------

    /// Operator eviction of one slot.
    ///
    /// The eviction is journaled in the ledger before it is reported, so a
    /// restarted controller keeps the slot empty. If the journal write
    /// fails the occupant is put back.
    pub async fn evict_slot(&self, engine_code: &str, position: u32) -> Result<Option<Occupant>> {
        let Some(occupant) = self.allocator.evict(engine_code, position)? else {
            return Ok(None);
        };
        let eviction = EvictionRecord {
            staging_id: occupant.staging_id.clone(),
            engine_code: engine_code.to_string(),
            position,
            label: occupant.label.clone(),
            evicted_at: Utc::now(),
        };
        if let Err(err) = self.ledger.record_eviction(eviction).await {
            if !self
                .allocator
                .reinstate(engine_code, position, occupant.clone())?
            {
                warn!(
                    address = %format!("{engine_code}{position}"),
                    "slot reclaimed before a failed eviction could be undone"
                );
            }
            return Err(err.into());
        }

        info!(
            address = %format!("{engine_code}{position}"),
            staging_id = %occupant.staging_id,
            label = %occupant.label,
            "slot evicted"
        );
        self.record_audit(
            AuditEventType::SlotEvicted,
            Some(&occupant.staging_id),
            json!({ "engine": engine_code, "position": position }),
        )
        .await;
        Ok(Some(occupant))
    }

    /// Rebuild slot occupancy and label affinity from the ledger.
    ///
    /// Promotions are replayed in `seq` order, then journaled evictions
    /// clear any slot still held by the evicted promotion. Returns how
    /// many promotions were applied.
    pub async fn restore_from_ledger(&self) -> Result<usize> {
        let history = self.ledger.history().await?;
        let applied = history
            .iter()
            .filter(|record| self.allocator.restore(record))
            .count();

        let evictions = self.ledger.evictions().await?;
        let mut cleared = 0usize;
        for eviction in &evictions {
            match self
                .allocator
                .release(&eviction.engine_code, eviction.position, &eviction.staging_id)
            {
                Ok(Some(_)) => cleared += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(address = %eviction.address(), error = %err, "skipping journaled eviction")
                }
            }
        }
        debug!(
            applied,
            cleared,
            total = history.len(),
            "slot occupancy restored"
        );
        Ok(applied)
    }

    pub async fn summary(&self) -> Result<PipelineSummary> {
        Ok(PipelineSummary {
            states: self.store.counts().await?,
            promotions: self.ledger.history().await?.len(),
            occupied_slots: self.allocator.occupied(),
        })
    }

    async fn record_audit(
        &self,
        event: AuditEventType,
        staging_id: Option<&StagingId>,
        details: serde_json::Value,
    ) {
        if let Err(err) = self
            .audit
            .record(&AuditEntry::new(event, staging_id, details))
            .await
        {
            warn!(event = ?event, error = %err, "failed to write audit entry");
        }
    }
}
