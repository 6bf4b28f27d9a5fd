//! # Core Types for Risk Detection
//!
//! This module defines the fundamental data types shared by every detector:
//! findings, severities, spans, and the risk classes assigned to recognized
//! entity kinds.
//!
//! ## Design Principles
//!
//! 1. **Immutable findings** - A [`Finding`] is never mutated after creation;
//!    downstream stages merge, dedupe and rank but do not edit.
//! 2. **Code-point spans** - Spans index the scanned text by Unicode code
//!    point, not by byte, so replacements computed on one side of a channel
//!    boundary remain valid on the other.
//! 3. **Confidence calibration** - Every finding carries a confidence score
//!    (0.0-1.0) so thresholds can be tuned per processing mode.
//! 4. **Serializable** - All types derive Serde traits for reports and audit
//!    trails.
//!
//! ## References
//!
//! - OWASP LLM Top 10: <https://owasp.org/www-project-top-10-for-large-language-model-applications/>
//! - NIST SP 800-122 (PII confidentiality impact levels)

use serde::{Deserialize, Serialize};

/// Severity of a single finding.
///
/// Ordered so that thresholds can be expressed as comparisons:
/// `finding.severity >= config.sanitize_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no action required.
    Low,
    /// Worth sanitizing in strict postures.
    Medium,
    /// Sensitive; sanitized in the default posture.
    High,
    /// Always acted on, regardless of posture.
    Critical,
}

/// Detector family a finding belongs to.
///
/// The family determines which severity-to-score weight table applies
/// during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    /// Personally identifiable information.
    Pii,
    /// Biased or discriminatory framing.
    Bias,
    /// Prompt injection, jailbreak and related adversarial content.
    Adversarial,
    /// Output claims unsupported by or contradicting grounding data.
    Hallucination,
    /// Degradation events (detector timeouts, unavailable components).
    Operational,
}

/// A half-open span `[start, end)` in code-point offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    /// First code point covered by the span.
    pub start: usize,
    /// One past the last code point covered.
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of code points covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns true for an empty span.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if the two spans share at least one code point.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest span covering both inputs.
    pub fn union(&self, other: &Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Converts a byte range produced by the regex engine into a code-point span.
///
/// The regex crate reports byte offsets; the rest of the pipeline works in
/// code points so spans survive serialization to systems that index text
/// differently.
pub fn span_from_bytes(text: &str, byte_start: usize, byte_end: usize) -> Span {
    let start = text[..byte_start].chars().count();
    let len = text[byte_start..byte_end].chars().count();
    Span::new(start, start + len)
}

/// Maps a code-point span back to the byte range it covers in `text`.
///
/// Out-of-range spans are clamped to the end of the text.
pub fn span_to_byte_range(text: &str, span: &Span) -> std::ops::Range<usize> {
    let mut indices = text.char_indices().map(|(i, _)| i);
    let start = indices.nth(span.start).unwrap_or(text.len());
    let end = if span.is_empty() {
        start
    } else {
        text.char_indices()
            .map(|(i, _)| i)
            .nth(span.end)
            .unwrap_or(text.len())
    };
    start..end
}

/// A single detector observation.
///
/// Findings are the only unit of communication between detectors and the
/// aggregation layer. They are immutable after creation.
///
/// # Example
///
/// ```rust
/// use airlock_detectors::{Finding, FindingKind, Severity, Span};
///
/// let finding = Finding::new(
///     FindingKind::Pii,
///     "email",
///     Span::new(12, 29),
///     "alice@example.com",
///     0.98,
///     Severity::High,
///     "rules",
/// );
/// assert_eq!(finding.kind_label(), "EMAIL");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Detector family.
    pub kind: FindingKind,
    /// Specific subtype within the family (e.g. "email", "prompt_injection").
    pub subtype: String,
    /// Code-point span in the scanned text.
    pub span: Span,
    /// The matched text, verbatim.
    pub original_value: String,
    /// Confidence that the match is a true positive (0.0-1.0).
    pub confidence: f64,
    /// Severity classification.
    pub severity: Severity,
    /// Replacement suggested by the detector, of the form `‹KIND_n›`.
    pub suggested_replacement: Option<String>,
    /// Identifier of the detector strategy that produced this finding.
    pub detector_id: String,
}

impl Finding {
    /// Creates a new finding with no suggested replacement.
    pub fn new(
        kind: FindingKind,
        subtype: impl Into<String>,
        span: Span,
        original_value: impl Into<String>,
        confidence: f64,
        severity: Severity,
        detector_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            subtype: subtype.into(),
            span,
            original_value: original_value.into(),
            confidence,
            severity,
            suggested_replacement: None,
            detector_id: detector_id.into(),
        }
    }

    /// Sets the suggested replacement.
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.suggested_replacement = Some(replacement.into());
        self
    }

    /// Uppercase subtype label used when minting placeholders,
    /// e.g. `email` becomes `EMAIL`.
    pub fn kind_label(&self) -> String {
        self.subtype.to_uppercase()
    }

    /// Key used for deduplication across detectors.
    pub fn dedupe_key(&self) -> (FindingKind, String, Span) {
        (self.kind, self.subtype.clone(), self.span)
    }

    /// Builds a degradation finding for a detector that missed its deadline.
    ///
    /// Detection degrades, it does not fail the pipeline; the timeout is
    /// recorded as a low-severity operational finding instead.
    pub fn detector_timeout(detector_id: impl Into<String>) -> Self {
        Finding::new(
            FindingKind::Operational,
            "detector_timeout",
            Span::new(0, 0),
            "",
            1.0,
            Severity::Low,
            detector_id,
        )
    }

    /// Builds a degradation finding for a detector that crashed or is
    /// otherwise unavailable.
    pub fn detector_unavailable(detector_id: impl Into<String>) -> Self {
        Finding::new(
            FindingKind::Operational,
            "detector_unavailable",
            Span::new(0, 0),
            "",
            1.0,
            Severity::Low,
            detector_id,
        )
    }
}

/// Risk class the anonymization analyzer assigns to a recognized entity kind.
///
/// The class decides the severity of PII findings and feeds the placeholder
/// policy: higher classes are sanitized in more permissive postures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    /// Public or near-public identifiers (URLs, organization names).
    Low,
    /// Indirect identifiers (IP addresses, person names).
    Medium,
    /// Direct contact identifiers (email, phone, IBAN).
    High,
    /// Credentials and government identifiers (cards, SSNs, API keys).
    Critical,
}

impl RiskClass {
    /// Severity a finding of this class carries.
    pub fn severity(&self) -> Severity {
        match self {
            RiskClass::Low => Severity::Low,
            RiskClass::Medium => Severity::Medium,
            RiskClass::High => Severity::High,
            RiskClass::Critical => Severity::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_overlap() {
        let a = Span::new(0, 5);
        let b = Span::new(4, 9);
        let c = Span::new(5, 9);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.union(&b), Span::new(0, 9));
    }

    #[test]
    fn test_span_from_bytes_multibyte() {
        let text = "héllo alice@example.com";
        let byte_start = text.find("alice").unwrap();
        let span = span_from_bytes(text, byte_start, byte_start + "alice@example.com".len());
        // "héllo " is 6 code points but 7 bytes
        assert_eq!(span.start, 6);
        assert_eq!(span.len(), "alice@example.com".chars().count());
    }

    #[test]
    fn test_span_byte_roundtrip() {
        let text = "héllo wörld";
        let span = Span::new(6, 11);
        let range = span_to_byte_range(text, &span);
        assert_eq!(&text[range], "wörld");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_kind_label() {
        let f = Finding::new(
            FindingKind::Pii,
            "email",
            Span::new(0, 5),
            "x",
            0.9,
            Severity::High,
            "rules",
        );
        assert_eq!(f.kind_label(), "EMAIL");
    }

    #[test]
    fn test_finding_serialization() {
        let f = Finding::new(
            FindingKind::Adversarial,
            "prompt_injection",
            Span::new(0, 10),
            "ignore all",
            0.95,
            Severity::Critical,
            "adversarial.patterns",
        );
        let json = serde_json::to_string(&f).unwrap();
        let parsed: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(f, parsed);
    }
}
