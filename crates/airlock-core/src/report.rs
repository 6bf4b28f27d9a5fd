//! Risk report assembly.

use std::collections::BTreeMap;

use airlock_agent::{HallucinationMetrics, Mitigation, ProcessingMode, RiskAssessment, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{PipelineContext, ToolTraceEntry};

/// Terminal action of a request, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAction {
    /// Nothing was touched.
    Allowed,
    /// Placeholders were substituted somewhere along the way.
    Sanitized,
    /// Input or output was refused.
    Blocked,
    /// A degradation or budget event needs human eyes.
    Escalated,
}

impl std::fmt::Display for GatewayAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayAction::Allowed => write!(f, "allowed"),
            GatewayAction::Sanitized => write!(f, "sanitized"),
            GatewayAction::Blocked => write!(f, "blocked"),
            GatewayAction::Escalated => write!(f, "escalated"),
        }
    }
}

/// Compact form of one assessment, for reports and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSummary {
    /// Aggregate score.
    pub overall_score: f64,
    /// Derived level.
    pub level: RiskLevel,
    /// Mitigations applied.
    pub mitigations: Vec<Mitigation>,
    /// Finding counts per subtype.
    pub findings: BTreeMap<String, usize>,
    /// Hallucination metrics, when the detector ran.
    pub hallucination: Option<HallucinationMetrics>,
}

impl From<&RiskAssessment> for AssessmentSummary {
    fn from(assessment: &RiskAssessment) -> Self {
        Self {
            overall_score: assessment.overall_score,
            level: assessment.level,
            mitigations: assessment.mitigations_applied.clone(),
            findings: assessment.findings_summary(),
            hallucination: assessment.hallucination,
        }
    }
}

/// The structured risk report emitted for every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Request id.
    pub request_id: String,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Model the request named.
    pub model: String,
    /// Mode the request ran under.
    pub mode: ProcessingMode,
    /// Terminal action.
    pub action: GatewayAction,
    /// Maximum score over all assessments in the request.
    pub overall_score: f64,
    /// Input-scan summary.
    pub input: Option<AssessmentSummary>,
    /// Output-scan summary.
    pub output: Option<AssessmentSummary>,
    /// Per-iteration tool trace.
    pub tool_trace: Vec<ToolTraceEntry>,
    /// Stage entry counts.
    pub stage_counts: BTreeMap<String, u32>,
    /// Escalation tags.
    pub escalations: Vec<String>,
}

impl RiskReport {
    /// Assembles the report from a finished (or abandoned) pipeline context.
    pub fn assemble(context: &PipelineContext, model: &str, blocked: bool) -> Self {
        let input = context.input_assessment.as_ref().map(AssessmentSummary::from);
        let output = context.output_assessment.as_ref().map(AssessmentSummary::from);

        let sanitized = [&input, &output].iter().any(|summary| {
            summary
                .as_ref()
                .map(|s| s.mitigations.contains(&Mitigation::Sanitize))
                .unwrap_or(false)
        }) || !context.tokens_minted.is_empty();

        let action = if blocked {
            GatewayAction::Blocked
        } else if !context.escalations.is_empty() {
            GatewayAction::Escalated
        } else if sanitized {
            GatewayAction::Sanitized
        } else {
            GatewayAction::Allowed
        };

        Self {
            request_id: context.request_id.clone(),
            timestamp: Utc::now(),
            model: model.to_string(),
            mode: context.mode,
            action,
            overall_score: context.max_observed_score,
            input,
            output,
            tool_trace: context.tool_trace.clone(),
            stage_counts: context
                .stage_counts
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            escalations: context.escalations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;
    use std::time::Duration;

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
    fn test_blocked_wins() {
        let mut ctx = context();
        ctx.escalate("anything");
        let report = RiskReport::assemble(&ctx, "model-x", true);
        assert_eq!(report.action, GatewayAction::Blocked);
    }

    #[test]
    fn test_escalated_beats_sanitized() {
        let mut ctx = context();
        ctx.escalate("tool_budget_exhausted");
        ctx.tokens_minted.push("\u{2039}EMAIL_1\u{203a}".to_string());
        let report = RiskReport::assemble(&ctx, "model-x", false);
        assert_eq!(report.action, GatewayAction::Escalated);
    }

    #[test]
    fn test_tokens_imply_sanitized() {
        let mut ctx = context();
        ctx.tokens_minted.push("\u{2039}EMAIL_1\u{203a}".to_string());
        let report = RiskReport::assemble(&ctx, "model-x", false);
        assert_eq!(report.action, GatewayAction::Sanitized);
    }

    #[test]
    fn test_clean_request_allowed() {
        let ctx = context();
        let report = RiskReport::assemble(&ctx, "model-x", false);
        assert_eq!(report.action, GatewayAction::Allowed);
        assert_eq!(report.overall_score, 0.0);
    }

    #[test]
    fn test_report_serialization() {
        let report = RiskReport::assemble(&context(), "model-x", false);
        let json = serde_json::to_string(&report).unwrap();
        let parsed: RiskReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, "req-1");
    }
}
