//! Global atomic counters for pipeline activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    staged: AtomicU64,
    executed: AtomicU64,
    passed: AtomicU64,
    failed: AtomicU64,
    promoted: AtomicU64,
    slots_retired: AtomicU64,
    infra_retries: AtomicU64,
    requeued: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub staged: u64,
    pub executed: u64,
    pub passed: u64,
    pub failed: u64,
    pub promoted: u64,
    pub slots_retired: u64,
    pub infra_retries: u64,
    pub requeued: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            staged: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            promoted: AtomicU64::new(0),
            slots_retired: AtomicU64::new(0),
            infra_retries: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
        }
    }

    counter!(inc_staged, staged, staged);
    counter!(inc_executed, executed, executed);
    counter!(inc_passed, passed, passed);
    counter!(inc_failed, failed, failed);
    counter!(inc_promoted, promoted, promoted);
    counter!(inc_slots_retired, slots_retired, slots_retired);
    counter!(inc_infra_retries, infra_retries, infra_retries);
    counter!(inc_requeued, requeued, requeued);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            staged: self.staged(),
            executed: self.executed(),
            passed: self.passed(),
            failed: self.failed(),
            promoted: self.promoted(),
            slots_retired: self.slots_retired(),
            infra_retries: self.infra_retries(),
            requeued: self.requeued(),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            staged = s.staged,
            executed = s.executed,
            passed = s.passed,
            failed = s.failed,
            promoted = s.promoted,
            slots_retired = s.slots_retired,
            infra_retries = s.infra_retries,
            requeued = s.requeued,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.staged,
            &self.executed,
            &self.passed,
            &self.failed,
            &self.promoted,
            &self.slots_retired,
            &self.infra_retries,
            &self.requeued,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
