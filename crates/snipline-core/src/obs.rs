//! Structured observability hooks for the staging lifecycle.
//!
//! - `staging_span`: span tagging everything inside with `staging_id`;
//!   attach it to futures with `tracing::Instrument`
//! - `emit_*`: one `info!` (or `warn!`) per lifecycle event, keyed by an
//!   `event = "..."` field so log pipelines can filter on it

use tracing::{info, warn};

/// Span carrying `staging_id` for one record's lifecycle.
///
/// ```ignore
/// work.instrument(staging_span("stg-a91f714948af")).await
/// ```
pub fn staging_span(staging_id: &str) -> tracing::Span {
    tracing::info_span!("snipline.staging", staging_id = %staging_id)
}

pub fn emit_staged(staging_id: &str, language: &str, engine: &str, label: &str) {
    info!(
        event = "snippet.staged",
        staging_id = %staging_id,
        language = %language,
        engine = %engine,
        label = %label,
    );
}

pub fn emit_execution_started(staging_id: &str, engine: &str, sandbox: &str) {
    info!(event = "execution.started", staging_id = %staging_id, engine = %engine, sandbox = %sandbox);
}

pub fn emit_execution_finished(
    staging_id: &str,
    wall_ms: u64,
    exit_status: Option<i32>,
    timed_out: bool,
    attempts: u32,
) {
    info!(
        event = "execution.finished",
        staging_id = %staging_id,
        wall_ms = wall_ms,
        exit_status = ?exit_status,
        timed_out = timed_out,
        attempts = attempts,
    );
}

pub fn emit_verdict(staging_id: &str, result: &str, spec_time_secs: f64, violations: usize) {
    info!(
        event = "verdict",
        staging_id = %staging_id,
        result = %result,
        spec_time_secs = spec_time_secs,
        violations = violations,
    );
}

pub fn emit_promoted(staging_id: &str, address: &str, seq: u64) {
    info!(event = "promotion.completed", staging_id = %staging_id, address = %address, seq = seq);
}

pub fn emit_slot_retired(address: &str, retired: &str, by: &str) {
    info!(event = "slot.retired", address = %address, retired = %retired, by = %by);
}

pub fn emit_requeued(staging_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "execution.requeued", staging_id = %staging_id, error = %error);
}

pub fn emit_capacity_exceeded(staging_id: &str, engine: &str, capacity: u32) {
    warn!(
        event = "slot.capacity_exceeded",
        staging_id = %staging_id,
        engine = %engine,
        capacity = capacity,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_span_enters_without_subscriber() {
        let _entered = staging_span("stg-a91f714948af").entered();
        emit_verdict("stg-a91f714948af", "PASS", 0.5, 0);
    }
}
