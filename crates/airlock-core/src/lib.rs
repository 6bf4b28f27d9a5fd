//! # Airlock Core
//!
//! Policy-enforcing gateway between chat applications and LLM providers.
//! Every request runs a multi-stage pipeline: classify risk in the input,
//! redact or block as policy dictates, invoke the model, answer `query`
//! tool calls through the secure data connector, re-classify retrieved
//! data, verify the final answer against its grounding, and emit a
//! structured risk report.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Gateway                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  request ──▶ INPUT_SCAN ──▶ LLM_CALL ◀──────────┐             │
//! │                  │             │                │             │
//! │                  ▼             ▼                │             │
//! │              RiskAgent     tool call? ──▶ QueryPlanner        │
//! │                  │             │                │             │
//! │                  │             ▼                ▼             │
//! │              TokenVault   OUTPUT_SCAN ◀── DataConnector       │
//! │                                │                              │
//! │                                ▼                              │
//! │                       RiskReport ──▶ AuditLog                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Notes
//!
//! - Pipeline decisions are fail-safe: blocked inputs never reach the
//!   provider and blocked outputs never reach the caller.
//! - Downstream stages always see the sanitized form of upstream text.
//! - Every request emits a risk report to the audit sink, including
//!   partial reports for requests that die on the deadline.

mod api;
mod audit;
mod config;
mod error;
mod orchestrator;
mod pipeline;
mod provider;
mod report;

pub use api::{
    AnalyzeTextRequest, AnalyzeTextResponse, ChatOutcome, ChatRequest, ChatResponse,
    FindingView, OutcomeStatus, RiskMetadata,
};
pub use audit::AuditLog;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use orchestrator::Gateway;
pub use pipeline::{PipelineContext, PipelineStage, ToolTraceEntry};
pub use provider::{
    ChatMessage, HttpProvider, LlmError, LlmProvider, LlmReply, Role, ScriptedProvider,
    ToolCallRequest,
};
pub use report::{AssessmentSummary, GatewayAction, RiskReport};

// Re-export the component types the surrounding layer configures.
pub use airlock_agent::{
    AgentConfig, AnalyzeRequest, Mitigation, Phase, ProcessingMode, RiskAgent, RiskAssessment,
    RiskLevel,
};
pub use airlock_connector::{
    ColumnSchema, DataConnector, DataSourceConfig, MemoryAdapter, QueryPlanner, SourceKind,
    SourceRegistry, SourceSchema, TableSchema,
};
pub use airlock_vault::TokenVault;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
