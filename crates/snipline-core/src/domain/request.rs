//! Intake requests and run reports.

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};
use snipline_state::{
    Language, PromotionRecord, SnippetSpec, StagingId, StagingRecord, StagingState, StateCounts,
    VerificationRecord,
};

/// A candidate delivered to intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub language: Language,
    pub source: String,
    pub label: String,
    #[serde(default)]
    pub spec: SnippetSpec,
    /// Pin the candidate to one engine instead of the language default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_code: Option<String>,
}

impl SubmitRequest {
    pub fn new(language: Language, source: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            label: label.into(),
            spec: SnippetSpec::default(),
            engine_code: None,
        }
    }

    pub fn with_spec(mut self, spec: SnippetSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn on_engine(mut self, code: impl Into<String>) -> Self {
        self.engine_code = Some(code.into());
        self
    }
}

/// Outcome of one `PromotionController::run` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub staging_id: StagingId,
    /// State observed when the call returned.
    pub state: StagingState,
    /// Whether this call executed the snippet.
    pub executed: bool,
    /// Whether the verdict was reused from an earlier promotion.
    pub reused_verdict: bool,
    pub verification: Option<VerificationRecord>,
    pub promotion: Option<PromotionRecord>,
}

impl RunReport {
    /// Report for a call that did no work on the record.
    pub fn observed(record: &StagingRecord) -> Self {
        Self {
            staging_id: record.staging_id.clone(),
            state: record.state,
            executed: false,
            reused_verdict: false,
            verification: record.verification.clone(),
            promotion: None,
        }
    }

    pub fn is_promoted(&self) -> bool {
        self.state == StagingState::Promoted
    }

    /// Turn a FAIL verdict into `PipelineError::SpecFailure`.
    pub fn require_pass(&self) -> Result<()> {
        if self.state != StagingState::Failed {
            return Ok(());
        }
        let violations = self
            .verification
            .as_ref()
            .map(|v| v.violations.join("; "))
            .unwrap_or_default();
        Err(PipelineError::SpecFailure {
            staging_id: self.staging_id.to_string(),
            violations,
        })
    }
}

/// Pipeline-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub states: StateCounts,
    pub promotions: usize,
    pub occupied_slots: usize,
}
