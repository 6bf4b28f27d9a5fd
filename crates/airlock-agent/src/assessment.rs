//! Risk assessment types: the aggregated output of one analyze call.

use std::collections::BTreeMap;

use airlock_detectors::Finding;
use serde::{Deserialize, Serialize};

/// Risk level derived from the overall score by fixed thresholds (2, 4, 6, 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Score below 2.
    Safe,
    /// Score in [2, 4).
    Low,
    /// Score in [4, 6).
    Medium,
    /// Score in [6, 8).
    High,
    /// Score 8 and above.
    Critical,
}

impl RiskLevel {
    /// Maps an overall score onto the fixed level thresholds.
    pub fn from_score(score: f64) -> Self {
        if score < 2.0 {
            RiskLevel::Safe
        } else if score < 4.0 {
            RiskLevel::Low
        } else if score < 6.0 {
            RiskLevel::Medium
        } else if score < 8.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Action the agent derived from an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mitigation {
    /// Text passes through unchanged.
    Allow,
    /// Sensitive spans were replaced with placeholders.
    Sanitize,
    /// Text must not proceed.
    Block,
    /// A degradation occurred that a human should see in the report.
    Escalate,
}

/// Aggregated finding set for one text.
///
/// `sanitized_text` is `Some` exactly when every finding at or above the
/// mode's sanitize threshold has a non-overlapping replacement applied (for
/// allow decisions that set is empty, so the original text qualifies).
/// Blocked texts carry no sanitized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// All findings, deduplicated, in span order.
    pub findings: Vec<Finding>,
    /// Aggregate score in [0, 10].
    pub overall_score: f64,
    /// Level derived from the score.
    pub level: RiskLevel,
    /// The releasable form of the text, absent on block.
    pub sanitized_text: Option<String>,
    /// Mitigations applied, in application order.
    pub mitigations_applied: Vec<Mitigation>,
    /// Stable hash over (sorted finding keys, sanitized text).
    pub fingerprint: String,
    /// Hallucination metrics when the detector ran.
    pub hallucination: Option<HallucinationMetrics>,
}

/// Hallucination metrics carried into reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HallucinationMetrics {
    /// 0-10 hallucination score.
    pub score: f64,
    /// supported / total claims.
    pub factual_accuracy: f64,
}

impl RiskAssessment {
    /// An empty assessment for a text no detector objected to.
    pub fn allow(text: &str, fingerprint: String) -> Self {
        Self {
            findings: Vec::new(),
            overall_score: 0.0,
            level: RiskLevel::Safe,
            sanitized_text: Some(text.to_string()),
            mitigations_applied: vec![Mitigation::Allow],
            fingerprint,
            hallucination: None,
        }
    }

    /// True if the decision is block.
    pub fn is_blocked(&self) -> bool {
        self.mitigations_applied.contains(&Mitigation::Block)
    }

    /// True if spans were replaced.
    pub fn is_sanitized(&self) -> bool {
        self.mitigations_applied.contains(&Mitigation::Sanitize)
    }

    /// Finding counts per subtype, for the report rollup.
    pub fn findings_summary(&self) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for finding in &self.findings {
            *summary.entry(finding.subtype.clone()).or_insert(0) += 1;
        }
        summary
    }
}
