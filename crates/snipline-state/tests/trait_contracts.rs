//! Trait contract tests for StagingStore and PromotionLedger.
//!
//! The ledger contracts run against every backend: memory, JSON-lines and
//! in-memory SurrealDB. The JSON-lines staging store is checked for the
//! same compare-and-swap behavior as the memory store, plus persistence.

use chrono::Utc;
use snipline_state::storage_traits::*;
use snipline_state::{
    JsonlPromotionLedger, JsonlStagingStore, Language, MemoryPromotionLedger, MemoryStagingStore,
    StorageError, SurrealPromotionLedger,
};

fn staged(label: &str) -> StagingRecord {
    let snippet = Snippet {
        language: Language::C,
        source: format!("int main(void) {{ return 0; }} // {label}"),
        label: label.to_string(),
    };
    let hash = ContentHash::from_bytes(snippet.source.as_bytes());
    StagingRecord::new(
        StagingId::generate(),
        snippet,
        SnippetSpec::default(),
        hash,
        Some("m".into()),
    )
}

fn promotion(id: &StagingId, label: &str, position: u32) -> PromotionRecord {
    let now = Utc::now();
    PromotionRecord {
        seq: 0,
        staging_id: id.clone(),
        content_hash: ContentHash::from_bytes(label.as_bytes()),
        language: Language::C,
        engine_code: "m".into(),
        engine_name: "C".into(),
        position,
        label: label.into(),
        created_at: now,
        promoted_at: now,
        spec_time_secs: 0.25,
        spec_result: SpecResult::Pass,
        spec_digest: SnippetSpec::default().digest().unwrap(),
        retired: None,
    }
}

// ===========================================================================
// StagingStore contract tests
// ===========================================================================

#[tokio::test]
async fn stage_then_get_returns_staged_record() {
    let store = MemoryStagingStore::new();
    let record = staged("Factorial");
    let id = store.stage(record.clone()).await.unwrap();

    let fetched = store.get(&id).await.unwrap();
    assert_eq!(fetched.state, StagingState::Staged);
    assert_eq!(fetched.snippet, record.snippet);
}

#[tokio::test]
async fn stage_rejects_duplicate_id() {
    let store = MemoryStagingStore::new();
    let record = staged("Factorial");
    store.stage(record.clone()).await.unwrap();

    let err = store.stage(record).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateStagingId { .. }));
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let store = MemoryStagingStore::new();
    let err = store.get(&StagingId::generate()).await.unwrap_err();
    assert!(matches!(err, StorageError::StagingNotFound { .. }));
}

#[tokio::test]
async fn transition_is_compare_and_swap() {
    let store = MemoryStagingStore::new();
    let id = store.stage(staged("Fib")).await.unwrap();

    store
        .transition(&id, StagingState::Staged, StagingState::Running)
        .await
        .unwrap();

    // A second claimant observes the mismatch.
    let err = store
        .transition(&id, StagingState::Staged, StagingState::Running)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::StateMismatch {
            actual: StagingState::Running,
            ..
        }
    ));
}

#[tokio::test]
async fn transition_rejects_edges_outside_the_lifecycle() {
    let store = MemoryStagingStore::new();
    let id = store.stage(staged("Fib")).await.unwrap();

    let err = store
        .transition(&id, StagingState::Staged, StagingState::Promoted)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IllegalTransition { .. }));
    assert_eq!(store.get(&id).await.unwrap().state, StagingState::Staged);
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let store = std::sync::Arc::new(MemoryStagingStore::new());
    let id = store.stage(staged("Race")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store
                .transition(&id, StagingState::Staged, StagingState::Running)
                .await
                .is_ok()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn mark_promoted_requires_passed() {
    let store = MemoryStagingStore::new();
    let id = store.stage(staged("Fact")).await.unwrap();

    let err = store.mark_promoted(&id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, StorageError::StateMismatch { .. }));

    store
        .transition(&id, StagingState::Staged, StagingState::Running)
        .await
        .unwrap();
    store
        .transition(&id, StagingState::Running, StagingState::Passed)
        .await
        .unwrap();
    let promoted = store.mark_promoted(&id, Utc::now()).await.unwrap();
    assert_eq!(promoted.state, StagingState::Promoted);
    assert!(promoted.promoted_at.is_some());
}

#[tokio::test]
async fn list_filters_and_counts_by_state() {
    let store = MemoryStagingStore::new();
    let a = store.stage(staged("A")).await.unwrap();
    store.stage(staged("B")).await.unwrap();
    store
        .transition(&a, StagingState::Staged, StagingState::Running)
        .await
        .unwrap();

    let running = store.list(Some(StagingState::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].staging_id, a);
    assert_eq!(store.list(None).await.unwrap().len(), 2);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.staged, 1);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.total(), 2);
}

// ===========================================================================
// PromotionLedger contract tests
// ===========================================================================

async fn ledger_assigns_increasing_seq(ledger: &dyn PromotionLedger) {
    let a = ledger
        .append(promotion(&StagingId::generate(), "A", 1))
        .await
        .unwrap();
    let b = ledger
        .append(promotion(&StagingId::generate(), "B", 2))
        .await
        .unwrap();
    assert_eq!(a.seq, 1);
    assert_eq!(b.seq, 2);

    let history = ledger.history().await.unwrap();
    assert_eq!(history.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
}

async fn ledger_rejects_second_promotion_of_same_id(ledger: &dyn PromotionLedger) {
    let id = StagingId::generate();
    ledger.append(promotion(&id, "A", 1)).await.unwrap();
    let err = ledger.append(promotion(&id, "A", 1)).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicatePromotion { seq: 1, .. }));
    assert_eq!(ledger.history().await.unwrap().len(), 1);
}

async fn ledger_queries_by_slot_and_label(ledger: &dyn PromotionLedger) {
    let first = StagingId::generate();
    let second = StagingId::generate();
    ledger.append(promotion(&first, "Fact", 2)).await.unwrap();
    ledger.append(promotion(&StagingId::generate(), "Fib", 1)).await.unwrap();
    ledger.append(promotion(&second, "Fact", 2)).await.unwrap();

    let slot = ledger.for_slot("m", 2).await.unwrap();
    assert_eq!(slot.len(), 2);
    assert_eq!(slot[0].staging_id, second);

    let label = ledger.for_label("m", "Fib").await.unwrap();
    assert_eq!(label.len(), 1);
    assert_eq!(label[0].position, 1);

    let found = ledger.find_by_staging_id(&first).await.unwrap().unwrap();
    assert_eq!(found.seq, 1);
    assert!(ledger
        .find_by_staging_id(&StagingId::generate())
        .await
        .unwrap()
        .is_none());
}

async fn ledger_journals_evictions(ledger: &dyn PromotionLedger) {
    let id = StagingId::generate();
    ledger.append(promotion(&id, "Fact", 2)).await.unwrap();
    assert!(ledger.evictions().await.unwrap().is_empty());

    ledger
        .record_eviction(EvictionRecord {
            staging_id: id.clone(),
            engine_code: "m".into(),
            position: 2,
            label: "Fact".into(),
            evicted_at: Utc::now(),
        })
        .await
        .unwrap();

    let evictions = ledger.evictions().await.unwrap();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].staging_id, id);
    assert_eq!(evictions[0].address(), "m2");
    // The promotion itself stays in history.
    assert_eq!(ledger.history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn memory_ledger_contracts() {
    ledger_assigns_increasing_seq(&MemoryPromotionLedger::new()).await;
    ledger_rejects_second_promotion_of_same_id(&MemoryPromotionLedger::new()).await;
    ledger_queries_by_slot_and_label(&MemoryPromotionLedger::new()).await;
    ledger_journals_evictions(&MemoryPromotionLedger::new()).await;
}

#[tokio::test]
async fn jsonl_ledger_contracts() {
    let dir = tempfile::tempdir().unwrap();
    ledger_assigns_increasing_seq(&JsonlPromotionLedger::open(dir.path().join("a.jsonl")).unwrap())
        .await;
    ledger_rejects_second_promotion_of_same_id(
        &JsonlPromotionLedger::open(dir.path().join("b.jsonl")).unwrap(),
    )
    .await;
    ledger_queries_by_slot_and_label(
        &JsonlPromotionLedger::open(dir.path().join("c.jsonl")).unwrap(),
    )
    .await;
    ledger_journals_evictions(&JsonlPromotionLedger::open(dir.path().join("d.jsonl")).unwrap())
        .await;
}

#[tokio::test]
async fn surreal_ledger_contracts() {
    ledger_assigns_increasing_seq(&SurrealPromotionLedger::in_memory().await.unwrap()).await;
    ledger_rejects_second_promotion_of_same_id(&SurrealPromotionLedger::in_memory().await.unwrap())
        .await;
    ledger_queries_by_slot_and_label(&SurrealPromotionLedger::in_memory().await.unwrap()).await;
    ledger_journals_evictions(&SurrealPromotionLedger::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn jsonl_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger").join("promotions.jsonl");
    let id = StagingId::generate();
    {
        let ledger = JsonlPromotionLedger::open(&path).unwrap();
        ledger.append(promotion(&id, "Fact", 2)).await.unwrap();
    }

    let reopened = JsonlPromotionLedger::open(&path).unwrap();
    let history = reopened.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].staging_id, id);
    assert_eq!(history[0].address(), "m2");

    let next = reopened
        .append(promotion(&StagingId::generate(), "Fib", 1))
        .await
        .unwrap();
    assert_eq!(next.seq, 2);
}

#[tokio::test]
async fn jsonl_ledger_reports_corrupt_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("promotions.jsonl");
    std::fs::write(&path, "\n{not json}\n").unwrap();

    let err = JsonlPromotionLedger::open(&path).unwrap_err();
    assert!(matches!(err, StorageError::CorruptLedger { line: 2, .. }));
}

#[tokio::test]
async fn jsonl_ledger_replays_evictions_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("promotions.jsonl");
    let id = StagingId::generate();
    {
        let ledger = JsonlPromotionLedger::open(&path).unwrap();
        ledger.append(promotion(&id, "Fact", 2)).await.unwrap();
        ledger
            .record_eviction(EvictionRecord {
                staging_id: id.clone(),
                engine_code: "m".into(),
                position: 2,
                label: "Fact".into(),
                evicted_at: Utc::now(),
            })
            .await
            .unwrap();
        ledger
            .append(promotion(&StagingId::generate(), "Fib", 1))
            .await
            .unwrap();
    }

    let reopened = JsonlPromotionLedger::open(&path).unwrap();
    assert_eq!(reopened.history().await.unwrap().len(), 2);
    let evictions = reopened.evictions().await.unwrap();
    assert_eq!(evictions.len(), 1);
    assert_eq!(evictions[0].staging_id, id);
}

// ===========================================================================
// JSON-lines staging store
// ===========================================================================

#[tokio::test]
async fn jsonl_store_is_compare_and_swap() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(
        JsonlStagingStore::open(dir.path().join("staging.jsonl"))
            .await
            .unwrap(),
    );
    let id = store.stage(staged("Race")).await.unwrap();
    let err = store.stage(store.get(&id).await.unwrap()).await.unwrap_err();
    assert!(matches!(err, StorageError::DuplicateStagingId { .. }));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            store
                .transition(&id, StagingState::Staged, StagingState::Running)
                .await
                .is_ok()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let err = store
        .transition(&id, StagingState::Running, StagingState::Promoted)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IllegalTransition { .. }));
}

#[tokio::test]
async fn jsonl_store_keeps_failed_and_passed_records_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("staging.jsonl");
    let (failed, passed) = {
        let store = JsonlStagingStore::open(&path).await.unwrap();
        let failed = store.stage(staged("Broken")).await.unwrap();
        let passed = store.stage(staged("Blocked")).await.unwrap();
        for id in [&failed, &passed] {
            store
                .transition(id, StagingState::Staged, StagingState::Running)
                .await
                .unwrap();
        }
        store
            .set_failure_reason(&failed, "stdout mismatch".into())
            .await
            .unwrap();
        store
            .transition(&failed, StagingState::Running, StagingState::Failed)
            .await
            .unwrap();
        store
            .transition(&passed, StagingState::Running, StagingState::Passed)
            .await
            .unwrap();
        (failed, passed)
    };

    let reopened = JsonlStagingStore::open(&path).await.unwrap();
    let record = reopened.get(&failed).await.unwrap();
    assert_eq!(record.state, StagingState::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some("stdout mismatch"));
    assert_eq!(
        reopened.get(&passed).await.unwrap().state,
        StagingState::Passed
    );
    let counts = reopened.counts().await.unwrap();
    assert_eq!((counts.failed, counts.passed, counts.total()), (1, 1, 2));

    let promoted = reopened.mark_promoted(&passed, Utc::now()).await.unwrap();
    assert_eq!(promoted.state, StagingState::Promoted);
}

#[tokio::test]
async fn jsonl_store_requeues_records_left_running() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.jsonl");
    let id = {
        let store = JsonlStagingStore::open(&path).await.unwrap();
        let id = store.stage(staged("Crashed")).await.unwrap();
        store
            .transition(&id, StagingState::Staged, StagingState::Running)
            .await
            .unwrap();
        id
    };

    let reopened = JsonlStagingStore::open(&path).await.unwrap();
    assert_eq!(reopened.get(&id).await.unwrap().state, StagingState::Staged);
    assert_eq!(
        reopened.list(Some(StagingState::Staged)).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn jsonl_store_reports_corrupt_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.jsonl");
    std::fs::write(&path, "{\"staging_id\": 1}\n").unwrap();

    let err = JsonlStagingStore::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::CorruptLedger { line: 1, .. }));
}

#[test]
fn staging_state_parses_case_insensitively() {
    assert_eq!("failed".parse::<StagingState>().unwrap(), StagingState::Failed);
    assert_eq!("PASSED".parse::<StagingState>().unwrap(), StagingState::Passed);
    assert!("done".parse::<StagingState>().is_err());
}
