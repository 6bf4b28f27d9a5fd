//! Configuration types for the risk agent.

use airlock_detectors::Severity;
use serde::{Deserialize, Serialize};

/// Request-scoped severity posture.
///
/// The mode shifts confidence thresholds, the sanitize severity floor and
/// the block gate. It travels *down* into every analyze call as a value; the
/// agent never asks anything upstream for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Lowest thresholds, earliest sanitization.
    Strict,
    /// Production default.
    Balanced,
    /// Highest thresholds; only critical findings are sanitized.
    Permissive,
}

impl Default for ProcessingMode {
    fn default() -> Self {
        ProcessingMode::Balanced
    }
}

impl ProcessingMode {
    /// The threshold set this mode implies.
    pub fn policy(&self) -> ModePolicy {
        match self {
            ProcessingMode::Strict => ModePolicy {
                pii_confidence_threshold: 0.6,
                bias_confidence_threshold: 0.6,
                sanitize_threshold: Severity::Medium,
                max_risk_score: 7.0,
            },
            ProcessingMode::Balanced => ModePolicy {
                pii_confidence_threshold: 0.7,
                bias_confidence_threshold: 0.7,
                sanitize_threshold: Severity::High,
                max_risk_score: 8.5,
            },
            ProcessingMode::Permissive => ModePolicy {
                pii_confidence_threshold: 0.85,
                bias_confidence_threshold: 0.85,
                sanitize_threshold: Severity::Critical,
                max_risk_score: 9.5,
            },
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::Strict => write!(f, "strict"),
            ProcessingMode::Balanced => write!(f, "balanced"),
            ProcessingMode::Permissive => write!(f, "permissive"),
        }
    }
}

/// Resolved thresholds for one analyze call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModePolicy {
    /// PII findings below this confidence are dropped.
    pub pii_confidence_threshold: f64,
    /// Bias findings below this confidence are dropped.
    pub bias_confidence_threshold: f64,
    /// Findings at or above this severity are sanitized.
    pub sanitize_threshold: Severity,
    /// Overall scores at or above this block the text.
    pub max_risk_score: f64,
}

/// Process-level agent configuration.
///
/// Request-scoped values (mode, gate override) arrive with each analyze
/// call; this struct holds what is fixed at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when a request does not name one.
    pub default_mode: ProcessingMode,
    /// Run the hallucination detector on output phases with grounding.
    pub enable_hallucination: bool,
    /// Per-detector deadline in milliseconds.
    pub detector_deadline_ms: u64,
    /// Enabled detector names; enablement is data, not code.
    pub enabled_detectors: Vec<String>,
    /// Environment override for the mode's PII confidence threshold.
    pub pii_confidence_override: Option<f64>,
    /// Environment override for the mode's bias confidence threshold.
    pub bias_confidence_override: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: ProcessingMode::Balanced,
            enable_hallucination: true,
            detector_deadline_ms: 300,
            enabled_detectors: vec![
                "pii".to_string(),
                "bias".to_string(),
                "adversarial".to_string(),
            ],
            pii_confidence_override: None,
            bias_confidence_override: None,
        }
    }
}
