//! Spec verification: turns an execution outcome into a PASS/FAIL verdict.
//!
//! Every rule is evaluated and each failure is reported as a violation, so
//! a verdict explains itself. Verification is pure: re-running it on a
//! stored outcome reproduces the verdict.

use std::time::Duration;

use chrono::Utc;
use snipline_state::{SnippetSpec, SpecResult, VerificationRecord};

use crate::sandbox::ExecutionOutcome;

/// Longest stdout/stderr excerpt kept on a verification record.
pub const EXCERPT_CHARS: usize = 2048;

/// Verdict over one outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub result: SpecResult,
    /// Measured wall time of the execution.
    pub spec_time: Duration,
    pub violations: Vec<String>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.result == SpecResult::Pass
    }

    pub fn spec_time_secs(&self) -> f64 {
        self.spec_time.as_secs_f64()
    }

    /// Persistable form, with output excerpts from `outcome`.
    pub fn to_record(&self, outcome: &ExecutionOutcome) -> VerificationRecord {
        VerificationRecord {
            result: self.result,
            spec_time_secs: self.spec_time_secs(),
            violations: self.violations.clone(),
            exit_status: outcome.exit_status,
            timed_out: outcome.timed_out,
            stdout_excerpt: excerpt(&outcome.stdout, EXCERPT_CHARS),
            stderr_excerpt: excerpt(&outcome.stderr, EXCERPT_CHARS),
            verified_at: Utc::now(),
        }
    }
}

/// Compare an outcome against a spec.
pub fn verify(outcome: &ExecutionOutcome, spec: &SnippetSpec) -> Verification {
    let mut violations = Vec::new();

    if outcome.timed_out {
        violations.push(format!(
            "timed out after {:.3}s",
            outcome.wall_time.as_secs_f64()
        ));
    }

    let expected_exit = spec.exit_code();
    match outcome.exit_status {
        Some(code) if code == expected_exit => {}
        Some(code) => violations.push(format!(
            "exit status {code}, expected {expected_exit}"
        )),
        None if outcome.timed_out => {}
        None => violations.push("terminated without an exit status".to_string()),
    }

    if let Some(expected) = &spec.expected_stdout {
        let want = normalize_output(expected);
        let got = normalize_output(&outcome.stdout);
        if want != got {
            violations.push(format!(
                "stdout mismatch: expected {:?}, got {:?}",
                excerpt(&want, 120),
                excerpt(&got, 120)
            ));
        }
    }

    if let Some(budget_ms) = spec.time_budget_ms {
        let budget = Duration::from_millis(budget_ms);
        if outcome.wall_time > budget {
            violations.push(format!(
                "wall time {:.3}s exceeds budget {budget_ms}ms",
                outcome.wall_time.as_secs_f64()
            ));
        }
    }

    let result = if violations.is_empty() {
        SpecResult::Pass
    } else {
        SpecResult::Fail
    };
    Verification {
        result,
        spec_time: outcome.wall_time,
        violations,
    }
}

/// CRLF -> LF and trailing whitespace trimmed.
fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

/// First `max_chars` characters, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
