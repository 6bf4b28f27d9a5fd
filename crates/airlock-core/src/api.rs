//! Request and response shapes the surrounding HTTP layer consumes.
//!
//! The HTTP surface itself (routing, authentication) is out of scope; these
//! types define the contract, including the status mapping: 200 for allowed
//! or sanitized results, 400 for blocked input, 422 for blocked output.

use std::collections::BTreeMap;

use airlock_agent::{
    HallucinationMetrics, Mitigation, ProcessingMode, RiskAssessment, RiskLevel,
};
use airlock_detectors::{Severity, Span};
use serde::{Deserialize, Serialize};

use crate::provider::ChatMessage;
use crate::report::RiskReport;

/// Chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to invoke; empty uses the gateway default.
    #[serde(default)]
    pub model: String,
    /// Conversation so far; the last user message is the scanned input.
    pub messages: Vec<ChatMessage>,
    /// Master switch for the risk pipeline.
    #[serde(default = "default_true")]
    pub enable_risk_detection: bool,
    /// Severity posture; the gateway default applies when absent.
    #[serde(default)]
    pub processing_mode: Option<ProcessingMode>,
    /// Block-gate override.
    #[serde(default)]
    pub max_risk_score: Option<f64>,
    /// Replace the user message with its sanitized form before the model
    /// sees it.
    #[serde(default = "default_true")]
    pub sanitize_input: bool,
    /// Release the sanitized form of the model output.
    #[serde(default = "default_true")]
    pub sanitize_output: bool,
    /// Allow the model to issue `query` tool calls.
    #[serde(default)]
    pub enable_data_access: bool,
    /// Default source for tool calls that do not name one.
    #[serde(default)]
    pub data_source_name: Option<String>,
    /// Optional natural-language hint forwarded to the planner.
    #[serde(default)]
    pub data_query: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ChatRequest {
    /// A minimal request around one user message.
    pub fn from_user_text(text: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            messages: vec![ChatMessage::user(text)],
            enable_risk_detection: true,
            processing_mode: None,
            max_risk_score: None,
            sanitize_input: true,
            sanitize_output: true,
            enable_data_access: false,
            data_source_name: None,
            data_query: None,
        }
    }
}

/// Risk metadata attached to every chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetadata {
    /// Maximum score across the request.
    pub overall_risk_score: f64,
    /// Level derived from the score.
    pub risk_level: RiskLevel,
    /// Mitigations applied anywhere in the pipeline.
    pub mitigation_applied: Vec<Mitigation>,
    /// Finding counts per subtype, input and output combined.
    pub findings_summary: BTreeMap<String, usize>,
    /// Hallucination metrics from the output scan, when it ran.
    pub hallucination: Option<HallucinationMetrics>,
}

/// Chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Request id, for audit correlation.
    pub id: String,
    /// Model that answered.
    pub model: String,
    /// The released assistant message.
    pub message: ChatMessage,
    /// Risk metadata for the caller's own policy decisions.
    pub risk_metadata: RiskMetadata,
}

/// Terminal status of a chat request, with its HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Allowed or sanitized result.
    Ok,
    /// Input was blocked before any provider call.
    BlockedInput,
    /// Output was blocked after generation.
    BlockedOutput,
    /// The request itself was unusable.
    Invalid,
    /// Provider failure or deadline expiry; a safe refusal was returned.
    Failed,
}

impl OutcomeStatus {
    /// The HTTP status the surrounding layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            OutcomeStatus::Ok => 200,
            OutcomeStatus::BlockedInput => 400,
            OutcomeStatus::BlockedOutput => 422,
            OutcomeStatus::Invalid => 400,
            OutcomeStatus::Failed => 502,
        }
    }
}

/// Everything a chat request resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    /// Terminal status.
    pub status: OutcomeStatus,
    /// The response body (canned safe message on blocks and failures).
    pub response: ChatResponse,
    /// The emitted risk report.
    pub report: RiskReport,
}

/// Direct risk analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeTextRequest {
    /// Text to analyze.
    pub text: String,
    /// Severity posture.
    #[serde(default)]
    pub processing_mode: Option<ProcessingMode>,
    /// Include the sanitized text in the response.
    #[serde(default = "default_true")]
    pub include_sanitized: bool,
    /// Include per-finding detail in the response.
    #[serde(default = "default_true")]
    pub include_detections: bool,
    /// Include original matched values. Requires an authenticated scope in
    /// the surrounding layer; the core honors whatever it is told.
    #[serde(default)]
    pub include_original_values: bool,
}

/// One finding, serialized for the analysis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingView {
    /// Detector family.
    pub kind: String,
    /// Subtype within the family.
    pub subtype: String,
    /// Code-point span.
    pub span: Span,
    /// Severity.
    pub severity: Severity,
    /// Confidence.
    pub confidence: f64,
    /// The matched text, only when the request is scoped for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
}

/// Direct risk analysis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeTextResponse {
    /// Aggregate score.
    pub overall_score: f64,
    /// Derived level.
    pub level: RiskLevel,
    /// Mitigations the agent decided.
    pub mitigations_applied: Vec<Mitigation>,
    /// Assessment fingerprint.
    pub fingerprint: String,
    /// Sanitized text, when requested and available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_text: Option<String>,
    /// Findings, when requested.
    pub findings: Vec<FindingView>,
}

impl AnalyzeTextResponse {
    /// Projects an assessment through the request's disclosure switches.
    pub fn from_assessment(assessment: &RiskAssessment, request: &AnalyzeTextRequest) -> Self {
        let findings = if request.include_detections {
            assessment
                .findings
                .iter()
                .map(|f| FindingView {
                    kind: format!("{:?}", f.kind).to_lowercase(),
                    subtype: f.subtype.clone(),
                    span: f.span,
                    severity: f.severity,
                    confidence: f.confidence,
                    original_value: request
                        .include_original_values
                        .then(|| f.original_value.clone()),
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            overall_score: assessment.overall_score,
            level: assessment.level,
            mitigations_applied: assessment.mitigations_applied.clone(),
            fingerprint: assessment.fingerprint.clone(),
            sanitized_text: if request.include_sanitized {
                assessment.sanitized_text.clone()
            } else {
                None
            },
            findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_defaults() {
        let json = r#"{ "messages": [ { "role": "user", "content": "hi" } ] }"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert!(request.enable_risk_detection);
        assert!(request.sanitize_input);
        assert!(request.sanitize_output);
        assert!(!request.enable_data_access);
        assert!(request.processing_mode.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OutcomeStatus::Ok.http_status(), 200);
        assert_eq!(OutcomeStatus::BlockedInput.http_status(), 400);
        assert_eq!(OutcomeStatus::BlockedOutput.http_status(), 422);
        assert_eq!(OutcomeStatus::Failed.http_status(), 502);
    }

    #[test]
    fn test_original_values_withheld_by_default() {
        let json = r#"{ "text": "mail a@b.io" }"#;
        let request: AnalyzeTextRequest = serde_json::from_str(json).unwrap();
        assert!(!request.include_original_values);
    }
}
