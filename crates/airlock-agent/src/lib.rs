//! # Airlock Risk Agent
//!
//! Composable risk classification for the Airlock gateway. The agent fans
//! out over the detector registry, aggregates findings into one score and
//! level, decides a mitigation for the request's mode, and assembles the
//! sanitized text with vault placeholders.
//!
//! ## Decision Ladder
//!
//! 1. Any critical adversarial finding ⇒ **block**.
//! 2. Overall score at or above the gate ⇒ **block**.
//! 3. Any finding at or above the mode's sanitize threshold ⇒ **sanitize**
//!    (PII becomes placeholders; bias and hallucination escalate instead).
//! 4. Otherwise ⇒ **allow**.
//!
//! ## Security Notes
//!
//! - The agent is created once at process init and shared by immutable
//!   reference; tests supply their own with an in-memory vault.
//! - Mode arrives as a value in each analyze call. The agent has no
//!   dependency on the orchestrator, in either direction.
//! - Identical inputs produce identical fingerprints; the fingerprint is a
//!   stable hash over sorted finding keys and the sanitized text.

mod agent;
mod assessment;
mod config;
mod sanitize;

pub use agent::{AnalyzeRequest, Phase, RiskAgent};
pub use assessment::{HallucinationMetrics, Mitigation, RiskAssessment, RiskLevel};
pub use config::{AgentConfig, ModePolicy, ProcessingMode};
pub use sanitize::{apply_replacements, plan_replacements, Replacement};

// Re-export the finding vocabulary so downstream crates take one dependency.
pub use airlock_detectors::{
    Finding, FindingKind, GroundingRecord, Severity, Span,
};
