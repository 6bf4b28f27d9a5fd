//! # Chat Orchestrator
//!
//! The state machine that threads a single request through detection,
//! mitigation, the provider, the tool-call loop and post-processing, and
//! emits a risk report for every decision.
//!
//! ## State Machine
//!
//! ```text
//! INIT ─▶ INPUT_SCAN ─▶ {BLOCKED | LLM_CALL}
//!                            │
//!            ┌───────────────┴─────────────────┐
//!            ▼                                 │
//!        NEED_DATA ─▶ QUERY_PLAN ─▶ QUERY_RUN ─▶ DATA_SCAN ─▶ LLM_CALL
//!            │   (bounded by max_iterations)
//!            ▼
//!       OUTPUT_SCAN ─▶ {BLOCKED | REPORT} ─▶ DONE
//! ```
//!
//! ## Security Notes
//!
//! - A blocked input never reaches the provider; the refusal is canned and
//!   carries no original text.
//! - Downstream stages only ever see the sanitized form of upstream text.
//! - The iteration counter never exceeds its bound; exhaustion forces one
//!   final answer and an escalation record.
//! - Deadline expiry cancels in-flight work and short-circuits to REPORT
//!   with a partial report.

use std::sync::Arc;
use std::time::Duration;

use airlock_agent::{AgentConfig, AnalyzeRequest, Mitigation, Phase, RiskAgent};
use airlock_connector::{DataConnector, DataSourceConfig, QueryPlanner, SourceRegistry, SqlGenerator};
use airlock_detectors::DetectorRegistry;
use airlock_vault::TokenVault;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{
    AnalyzeTextRequest, AnalyzeTextResponse, ChatOutcome, ChatRequest, ChatResponse,
    OutcomeStatus, RiskMetadata,
};
use crate::audit::AuditLog;
use crate::config::GatewayConfig;
use crate::pipeline::{PipelineContext, PipelineStage, ToolTraceEntry};
use crate::provider::{ChatMessage, LlmError, LlmProvider, LlmReply, ToolCallRequest};
use crate::report::RiskReport;
use crate::Result;

/// Canned refusal for blocked inputs.
const REFUSAL_BLOCKED_INPUT: &str =
    "This request was declined by the security policy and was not processed.";

/// Canned refusal for blocked outputs.
const REFUSAL_BLOCKED_OUTPUT: &str =
    "The generated answer was withheld by the security policy.";

/// Canned refusal for provider failures and deadline expiry.
const REFUSAL_UNAVAILABLE: &str =
    "The request could not be completed safely. Please try again.";

/// Canned answer when the model keeps asking for tools past the budget.
const REFUSAL_TOOL_BUDGET: &str =
    "I could not complete the required data lookups within the allotted budget.";

/// The gateway: one orchestrator instance serves all requests.
pub struct Gateway {
    agent: Arc<RiskAgent>,
    connector: Arc<DataConnector>,
    planner: QueryPlanner,
    provider: Arc<dyn LlmProvider>,
    audit: Arc<AuditLog>,
    config: GatewayConfig,
}

impl Gateway {
    /// Builds a gateway from ready components.
    pub fn new(
        agent: Arc<RiskAgent>,
        connector: Arc<DataConnector>,
        provider: Arc<dyn LlmProvider>,
        audit: Arc<AuditLog>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            agent,
            connector,
            planner: QueryPlanner::new(),
            provider,
            audit,
            config,
        }
    }

    /// Builds a gateway (vault, agent, audit, empty source registry) from
    /// process configuration.
    pub fn from_config(config: GatewayConfig, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        let secret = config.vault_secret.as_bytes();
        let vault = match &config.vault_path {
            Some(path) => TokenVault::open(path, secret)?,
            None => TokenVault::temporary(secret)?,
        };
        let agent_config = AgentConfig {
            default_mode: config.default_mode,
            pii_confidence_override: config.pii_confidence_override,
            bias_confidence_override: config.bias_confidence_override,
            ..AgentConfig::default()
        };
        let registry = DetectorRegistry::with_enabled(&agent_config.enabled_detectors);
        let agent = RiskAgent::new(registry, vault, agent_config);
        let audit = match &config.audit_path {
            Some(path) => AuditLog::open(path)?,
            None => AuditLog::temporary()?,
        };
        let connector = DataConnector::new(SourceRegistry::new());
        info!(mode = %config.default_mode, "gateway initialized");
        Ok(Self::new(
            Arc::new(agent),
            Arc::new(connector),
            provider,
            Arc::new(audit),
            config,
        ))
    }

    /// The risk agent (shared, immutable).
    pub fn agent(&self) -> &RiskAgent {
        &self.agent
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The data connector.
    pub fn connector(&self) -> &DataConnector {
        &self.connector
    }

    /// Administration: registers or replaces a data source.
    pub fn upsert_source(&self, source: DataSourceConfig) {
        self.connector.upsert_source(source);
    }

    /// Administration: lists registered sources (credential handles only).
    pub fn list_sources(&self) -> Vec<Arc<DataSourceConfig>> {
        self.connector.list_sources()
    }

    /// Direct risk analysis (interface 2).
    pub async fn analyze_text(&self, request: &AnalyzeTextRequest) -> AnalyzeTextResponse {
        let mode = request.processing_mode.unwrap_or(self.config.default_mode);
        let request_id = Uuid::new_v4().to_string();
        let analyze = AnalyzeRequest::new(mode, &request_id);
        let assessment = self.agent.analyze(&request.text, Phase::Input, &analyze).await;
        AnalyzeTextResponse::from_assessment(&assessment, request)
    }

    /// Spawns the maintenance task: vault sweep plus audit flush on a timer.
    ///
    /// The handle should be aborted on shutdown.
    pub fn start_maintenance(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let vault = self.agent.vault().clone();
        let audit = self.audit.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = vault.sweep() {
                    warn!(error = %e, "vault sweep failed");
                }
                if let Err(e) = audit.flush() {
                    warn!(error = %e, "audit flush failed");
                }
            }
        })
    }

    /// Runs one chat request through the full pipeline (interface 1).
    pub async fn run_chat(&self, request: ChatRequest) -> ChatOutcome {
        let request_id = Uuid::new_v4().to_string();
        let mode = request.processing_mode.unwrap_or(self.config.default_mode);
        let max_risk = request.max_risk_score.or(self.config.default_max_risk);
        let model = if request.model.is_empty() {
            self.config.model.clone()
        } else {
            request.model.clone()
        };

        let mut context = PipelineContext::new(
            request_id,
            mode,
            max_risk,
            self.config.budget(),
            self.config.max_iterations,
            request.messages.clone(),
        );
        debug!(request_id = %context.request_id, mode = %mode, "request accepted");

        let user_text = match context.user_text() {
            Some(text) => text.to_string(),
            None => {
                return self.finish(
                    context,
                    &model,
                    OutcomeStatus::Invalid,
                    REFUSAL_UNAVAILABLE.to_string(),
                    false,
                )
            }
        };

        // INPUT_SCAN
        context.enter(PipelineStage::InputScan);
        if request.enable_risk_detection {
            let analyze = self.scan_request(&context);
            let assessment = self.agent.analyze(&user_text, Phase::Input, &analyze).await;
            context.observe_score(assessment.overall_score);
            let blocked = assessment.is_blocked();
            if let Some(sanitized) = assessment.sanitized_text.as_deref() {
                context.note_tokens(sanitized);
                if request.sanitize_input && assessment.is_sanitized() {
                    context.replace_user_text(sanitized);
                }
            }
            if assessment.mitigations_applied.contains(&Mitigation::Escalate) {
                context.escalate("input_scan_escalated");
            }
            context.input_assessment = Some(assessment);
            if blocked {
                warn!(request_id = %context.request_id, "input blocked");
                return self.finish(
                    context,
                    &model,
                    OutcomeStatus::BlockedInput,
                    REFUSAL_BLOCKED_INPUT.to_string(),
                    true,
                );
            }
        }

        // LLM_CALL and the bounded tool loop.
        let mut budget_exhausted = false;
        let answer = loop {
            if context.expired() {
                context.escalate("deadline_exceeded");
                return self.finish(
                    context,
                    &model,
                    OutcomeStatus::Failed,
                    REFUSAL_UNAVAILABLE.to_string(),
                    false,
                );
            }

            context.enter(PipelineStage::LlmCall);
            let reply = match self.call_with_retry(&context).await {
                Ok(reply) => reply,
                Err(error) => {
                    if context.expired() {
                        context.escalate("deadline_exceeded");
                    } else {
                        context.escalate(match error {
                            LlmError::Transient(_) => "llm_transient_exhausted",
                            LlmError::Fatal(_) => "llm_non_transient",
                        });
                    }
                    warn!(request_id = %context.request_id, error = %error, "provider failed");
                    return self.finish(
                        context,
                        &model,
                        OutcomeStatus::Failed,
                        REFUSAL_UNAVAILABLE.to_string(),
                        false,
                    );
                }
            };

            match reply {
                LlmReply::Text(text) => break text,
                LlmReply::ToolCall(call) => {
                    if budget_exhausted {
                        // The model ignored the exhaustion notice; its tool
                        // call is not honored and the canned answer stands.
                        break REFUSAL_TOOL_BUDGET.to_string();
                    }
                    if request.enable_data_access {
                        self.handle_tool_call(&mut context, &request, call).await;
                    } else {
                        context.messages.push(ChatMessage::tool(
                            "tool error: data access is disabled for this request",
                        ));
                    }
                    context.iteration += 1;
                    if context.iteration >= context.max_iterations {
                        budget_exhausted = true;
                        context.escalate("tool_budget_exhausted");
                        context.messages.push(ChatMessage::system(
                            "The tool budget for this request is exhausted. \
                             Answer with the information already retrieved.",
                        ));
                    }
                }
            }
        };

        // OUTPUT_SCAN
        context.enter(PipelineStage::OutputScan);
        let mut released = answer.clone();
        if request.enable_risk_detection {
            let grounding = context.data_results.clone();
            let mut analyze = self.scan_request(&context);
            if !grounding.is_empty() {
                analyze = analyze.with_grounding(&grounding, &user_text);
            }
            let assessment = self.agent.analyze(&answer, Phase::Output, &analyze).await;
            context.observe_score(assessment.overall_score);
            let blocked = assessment.is_blocked();
            if let Some(sanitized) = assessment.sanitized_text.as_deref() {
                context.note_tokens(sanitized);
                if request.sanitize_output && assessment.is_sanitized() {
                    released = sanitized.to_string();
                }
            }
            if assessment.mitigations_applied.contains(&Mitigation::Escalate) {
                context.escalate("output_scan_escalated");
            }
            context.output_assessment = Some(assessment);
            if blocked {
                warn!(request_id = %context.request_id, "output blocked");
                return self.finish(
                    context,
                    &model,
                    OutcomeStatus::BlockedOutput,
                    REFUSAL_BLOCKED_OUTPUT.to_string(),
                    true,
                );
            }
        }

        // Restore-before-release is policy-gated and normally off.
        if self.config.restore_on_release {
            released = self.restore_placeholders(&released);
        }

        context.final_answer = Some(released.clone());
        self.finish(context, &model, OutcomeStatus::Ok, released, false)
    }

    /// One tool-call iteration: QUERY_PLAN, QUERY_RUN, DATA_SCAN.
    async fn handle_tool_call(
        &self,
        context: &mut PipelineContext,
        request: &ChatRequest,
        call: ToolCallRequest,
    ) {
        context.enter(PipelineStage::QueryPlan);
        let source_name = if call.source.is_empty() {
            request.data_source_name.clone().unwrap_or_default()
        } else {
            call.source.clone()
        };
        let question = if call.question.is_empty() {
            request.data_query.clone().unwrap_or_default()
        } else {
            call.question.clone()
        };

        context.messages.push(ChatMessage::assistant(format!(
            "[tool call] query source={} question={}",
            source_name, question
        )));

        let source = match self.connector.get_source(&source_name) {
            Some(source) => source,
            None => {
                context.tool_trace.push(ToolTraceEntry {
                    iteration: context.iteration,
                    source: source_name.clone(),
                    plan_summary: String::new(),
                    elapsed_ms: 0,
                    row_count: 0,
                    result_level: None,
                    failure: Some("query_plan_violation: unknown source".to_string()),
                });
                context.messages.push(ChatMessage::tool(format!(
                    "tool error: unknown source '{}'",
                    source_name
                )));
                return;
            }
        };

        let gate = context
            .max_risk
            .unwrap_or_else(|| context.mode.policy().max_risk_score);
        let generator = ProviderSqlGenerator {
            provider: self.provider.as_ref(),
        };
        let plan = self
            .planner
            .plan(&question, &source, gate, Some(&generator))
            .await;

        if !plan.is_executable() {
            context.tool_trace.push(ToolTraceEntry {
                iteration: context.iteration,
                source: source_name,
                plan_summary: plan.summary(),
                elapsed_ms: 0,
                row_count: 0,
                result_level: None,
                failure: Some("query_plan_violation".to_string()),
            });
            context
                .messages
                .push(ChatMessage::tool(format!("tool error: {}", plan.summary())));
            return;
        }

        context.enter(PipelineStage::QueryRun);
        let result = self
            .connector
            .run(&plan, &self.agent, context.mode, &context.request_id)
            .await;

        context.enter(PipelineStage::DataScan);
        if let Some(assessment) = &result.result_assessment {
            context.observe_score(assessment.overall_score);
            if assessment.mitigations_applied.contains(&Mitigation::Escalate) {
                context.escalate("data_scan_escalated");
            }
        }
        context.data_results.extend(result.grounding_records());
        context.tool_trace.push(ToolTraceEntry {
            iteration: context.iteration,
            source: source_name,
            plan_summary: plan.summary(),
            elapsed_ms: result.elapsed_ms,
            row_count: result.row_count,
            result_level: result.result_assessment.as_ref().map(|a| a.level),
            failure: result.failure.clone(),
        });

        let message = if let Some(failure) = &result.failure {
            format!("tool error: {}", failure)
        } else if !result.is_safe {
            "tool result withheld by policy".to_string()
        } else {
            format_rows(&result.columns, &result.rows)
        };
        context.messages.push(ChatMessage::tool(message));
    }

    /// Provider call with bounded retries on transient failures.
    ///
    /// Backoff is exponential and clipped to the remaining request budget,
    /// so a slow provider cannot push the request past its deadline.
    async fn call_with_retry(&self, context: &PipelineContext) -> std::result::Result<LlmReply, LlmError> {
        let mut attempt = 0u32;
        loop {
            let remaining = context.remaining();
            if remaining.is_zero() {
                return Err(LlmError::Transient("request deadline exceeded".to_string()));
            }
            match tokio::time::timeout(remaining, self.provider.complete(&context.messages)).await
            {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(LlmError::Transient(error))) if attempt < 2 => {
                    attempt += 1;
                    debug!(attempt, error = %error, "retrying transient provider failure");
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff.min(context.remaining())).await;
                }
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    return Err(LlmError::Transient(
                        "provider call exceeded the request deadline".to_string(),
                    ))
                }
            }
        }
    }

    /// Request-scoped analyze parameters.
    fn scan_request<'a>(&self, context: &'a PipelineContext) -> AnalyzeRequest<'a> {
        let mut request = AnalyzeRequest::new(context.mode, &context.request_id);
        request.max_risk_score = context.max_risk;
        request
    }

    /// Resolves placeholders back to originals (policy-gated).
    fn restore_placeholders(&self, text: &str) -> String {
        let pattern =
            Regex::new("\u{2039}([A-Z_]+)_\\d+\u{203a}").expect("static pattern compiles");
        let mut restored = text.to_string();
        for caps in pattern.captures_iter(text) {
            let placeholder = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let kind = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            match self.agent.vault().resolve(placeholder, kind) {
                Ok(original) => restored = restored.replace(placeholder, &original),
                Err(e) => debug!(placeholder = %placeholder, error = %e, "placeholder not restored"),
            }
        }
        restored
    }

    /// REPORT and DONE: assemble, audit, answer.
    fn finish(
        &self,
        mut context: PipelineContext,
        model: &str,
        status: OutcomeStatus,
        text: String,
        blocked: bool,
    ) -> ChatOutcome {
        context.enter(PipelineStage::Report);
        let report = RiskReport::assemble(&context, model, blocked);
        self.audit.record(report.clone());
        if let Err(e) = self.audit.flush() {
            warn!(error = %e, "audit flush failed at DONE");
        }
        info!(
            request_id = %context.request_id,
            action = %report.action,
            score = report.overall_score,
            "request finished"
        );

        let mut findings_summary = std::collections::BTreeMap::new();
        let mut mitigations: Vec<Mitigation> = Vec::new();
        for summary in [&report.input, &report.output].into_iter().flatten() {
            for (subtype, count) in &summary.findings {
                *findings_summary.entry(subtype.clone()).or_insert(0) += count;
            }
            for mitigation in &summary.mitigations {
                if !mitigations.contains(mitigation) {
                    mitigations.push(*mitigation);
                }
            }
        }

        let response = ChatResponse {
            id: context.request_id.clone(),
            model: model.to_string(),
            message: ChatMessage::assistant(text),
            risk_metadata: RiskMetadata {
                overall_risk_score: report.overall_score,
                risk_level: airlock_agent::RiskLevel::from_score(report.overall_score),
                mitigation_applied: mitigations,
                findings_summary,
                hallucination: report.output.as_ref().and_then(|o| o.hallucination),
            },
        };

        ChatOutcome {
            status,
            response,
            report,
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Adapts the provider into the planner's generation seam.
struct ProviderSqlGenerator<'a> {
    provider: &'a dyn LlmProvider,
}

#[async_trait]
impl SqlGenerator for ProviderSqlGenerator<'_> {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, String> {
        match self.provider.complete(&[ChatMessage::user(prompt)]).await {
            Ok(LlmReply::Text(text)) => Ok(text),
            Ok(LlmReply::ToolCall(_)) => Err("generator answered with a tool call".to_string()),
            Err(error) => Err(error.to_string()),
        }
    }
}

/// Renders released rows for the transcript, preserving cell boundaries.
fn format_rows(columns: &[String], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "query result: 0 rows".to_string();
    }
    let mut out = format!("query result: {} rows\n", rows.len());
    for row in rows {
        let rendered: Vec<String> = columns
            .iter()
            .zip(row.iter())
            .map(|(column, cell)| format!("{}: {}", column, cell))
            .collect();
        out.push_str(&rendered.join("\n"));
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rows() {
        let columns = vec!["id".to_string(), "status".to_string()];
        let rows = vec![vec!["ORD-1".to_string(), "in_transit".to_string()]];
        let rendered = format_rows(&columns, &rows);
        assert!(rendered.starts_with("query result: 1 rows"));
        assert!(rendered.contains("status: in_transit"));
    }

    #[test]
    fn test_format_rows_empty() {
        assert_eq!(format_rows(&[], &[]), "query result: 0 rows");
    }
}
