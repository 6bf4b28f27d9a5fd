//! Per-request pipeline state.
//!
//! [`PipelineContext`] is the envelope threaded through the orchestrator's
//! state machine: created at request entry, destroyed after report emission.
//! Placeholders minted along the way outlive it (their expiry is the vault's
//! business), everything else dies with the request.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use airlock_agent::{ProcessingMode, RiskAssessment, RiskLevel};
use airlock_detectors::GroundingRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::provider::ChatMessage;

/// Stages of the request state machine, for counting and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Context allocation.
    Init,
    /// Input risk scan.
    InputScan,
    /// Provider call.
    LlmCall,
    /// Query planning for a tool call.
    QueryPlan,
    /// Gated query execution.
    QueryRun,
    /// Result re-scan bookkeeping.
    DataScan,
    /// Output risk scan.
    OutputScan,
    /// Report assembly and audit emission.
    Report,
}

impl PipelineStage {
    /// Stable name used in stage counts.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Init => "init",
            PipelineStage::InputScan => "input_scan",
            PipelineStage::LlmCall => "llm_call",
            PipelineStage::QueryPlan => "query_plan",
            PipelineStage::QueryRun => "query_run",
            PipelineStage::DataScan => "data_scan",
            PipelineStage::OutputScan => "output_scan",
            PipelineStage::Report => "report",
        }
    }
}

/// One tool-loop iteration's trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTraceEntry {
    /// Iteration the entry belongs to.
    pub iteration: u32,
    /// Source the plan targeted.
    pub source: String,
    /// Planner's one-line summary.
    pub plan_summary: String,
    /// Execution wall-clock.
    pub elapsed_ms: u64,
    /// Rows released.
    pub row_count: usize,
    /// Level of the result re-scan, when it ran.
    pub result_level: Option<RiskLevel>,
    /// Failure tag for refused or failed executions.
    pub failure: Option<String>,
}

/// The per-request envelope.
#[derive(Debug)]
pub struct PipelineContext {
    /// Request id, also the owner of minted placeholders.
    pub request_id: String,
    /// Severity posture for the request.
    pub mode: ProcessingMode,
    /// Caller's block-gate override.
    pub max_risk: Option<f64>,
    /// Overall deadline.
    pub deadline: Instant,
    /// Tool-loop iteration counter; never exceeds `max_iterations`.
    pub iteration: u32,
    /// Iteration bound.
    pub max_iterations: u32,
    /// Working transcript (sanitized form).
    pub messages: Vec<ChatMessage>,
    /// Per-iteration tool trace.
    pub tool_trace: Vec<ToolTraceEntry>,
    /// Input-scan assessment.
    pub input_assessment: Option<RiskAssessment>,
    /// Output-scan assessment.
    pub output_assessment: Option<RiskAssessment>,
    /// Placeholders minted while sanitizing this request.
    pub tokens_minted: Vec<String>,
    /// Grounding accumulated from query results.
    pub data_results: Vec<GroundingRecord>,
    /// The released answer, once decided.
    pub final_answer: Option<String>,
    /// Stage entry counts for the audit record.
    pub stage_counts: BTreeMap<&'static str, u32>,
    /// Escalation tags accumulated across stages.
    pub escalations: Vec<String>,
    /// Highest score observed across all assessments.
    pub max_observed_score: f64,
}

impl PipelineContext {
    /// Allocates the envelope and starts the overall deadline.
    pub fn new(
        request_id: String,
        mode: ProcessingMode,
        max_risk: Option<f64>,
        budget: Duration,
        max_iterations: u32,
        messages: Vec<ChatMessage>,
    ) -> Self {
        let mut context = Self {
            request_id,
            mode,
            max_risk,
            deadline: Instant::now() + budget,
            iteration: 0,
            max_iterations,
            messages,
            tool_trace: Vec::new(),
            input_assessment: None,
            output_assessment: None,
            tokens_minted: Vec::new(),
            data_results: Vec::new(),
            final_answer: None,
            stage_counts: BTreeMap::new(),
            escalations: Vec::new(),
            max_observed_score: 0.0,
        };
        context.enter(PipelineStage::Init);
        context
    }

    /// Counts a stage entry.
    pub fn enter(&mut self, stage: PipelineStage) {
        *self.stage_counts.entry(stage.as_str()).or_insert(0) += 1;
    }

    /// Budget left before the overall deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the overall deadline has passed.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Records an escalation tag once.
    pub fn escalate(&mut self, tag: &str) {
        if !self.escalations.iter().any(|t| t == tag) {
            self.escalations.push(tag.to_string());
        }
    }

    /// Folds an assessment score into the running maximum.
    pub fn observe_score(&mut self, score: f64) {
        if score > self.max_observed_score {
            self.max_observed_score = score;
        }
    }

    /// Collects `‹KIND_n›` placeholders appearing in a sanitized text.
    pub fn note_tokens(&mut self, sanitized: &str) {
        let pattern =
            Regex::new("\u{2039}[A-Z_]+_\\d+\u{203a}").expect("static pattern compiles");
        for m in pattern.find_iter(sanitized) {
            let token = m.as_str().to_string();
            if !self.tokens_minted.contains(&token) {
                self.tokens_minted.push(token);
            }
        }
    }

    /// The most recent user message, which the input scan runs over.
    pub fn user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::provider::Role::User)
            .map(|m| m.content.as_str())
    }

    /// Replaces the most recent user message with its sanitized form.
    pub fn replace_user_text(&mut self, sanitized: &str) {
        if let Some(message) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == crate::provider::Role::User)
        {
            message.content = sanitized.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn context() -> PipelineContext {
        PipelineContext::new(
            "req-1".to_string(),
            ProcessingMode::Balanced,
            None,
            Duration::from_secs(30),
            4,
            vec![ChatMessage::user("hello")],
        )
    }

    #[test]
    fn test_stage_counting() {
        let mut ctx = context();
        ctx.enter(PipelineStage::LlmCall);
        ctx.enter(PipelineStage::LlmCall);
        assert_eq!(ctx.stage_counts["llm_call"], 2);
        assert_eq!(ctx.stage_counts["init"], 1);
    }

    #[test]
    fn test_user_text_roundtrip() {
        let mut ctx = context();
        assert_eq!(ctx.user_text(), Some("hello"));
        ctx.replace_user_text("sanitized");
        assert_eq!(ctx.user_text(), Some("sanitized"));
    }

    #[test]
    fn test_note_tokens() {
        let mut ctx = context();
        ctx.note_tokens("mail \u{2039}EMAIL_1\u{203a} and \u{2039}EMAIL_1\u{203a} again");
        assert_eq!(ctx.tokens_minted, vec!["\u{2039}EMAIL_1\u{203a}".to_string()]);
    }

    #[test]
    fn test_escalate_deduplicates() {
        let mut ctx = context();
        ctx.escalate("tool_budget_exhausted");
        ctx.escalate("tool_budget_exhausted");
        assert_eq!(ctx.escalations.len(), 1);
    }

    #[test]
    fn test_observe_score_keeps_max() {
        let mut ctx = context();
        ctx.observe_score(3.0);
        ctx.observe_score(1.0);
        assert_eq!(ctx.max_observed_score, 3.0);
    }
}
