//! # Bias Detector
//!
//! Flags biased or discriminatory framing in text. Two strategies run over
//! every input:
//!
//! 1. **Lexicon matcher** - known biased framings and explicit hostility.
//! 2. **Quantifier heuristic** - absolute quantifiers bound to demographic
//!    terms ("all X are...", "only Y should...").
//!
//! Bias findings are advisory or blocking, never replacements: rewriting a
//! biased sentence would change its meaning, so the detector leaves the text
//! alone and lets the mitigation layer decide.
//!
//! Severity calibration: `critical` for hate, `high` for explicit
//! discrimination, `medium` otherwise.

use regex::Regex;
use tracing::debug;

use crate::finding::{span_from_bytes, Finding, FindingKind, Severity};
use crate::registry::Detector;

const LEXICON_ID: &str = "bias.lexicon";
const QUANTIFIER_ID: &str = "bias.quantifier";

struct BiasPattern {
    pattern: Regex,
    subtype: &'static str,
    confidence: f64,
    severity: Severity,
}

/// Demographic noun groups the quantifier heuristic binds to.
///
/// Alternation fragment, kept lowercase; patterns compile with `(?i)`.
const DEMOGRAPHIC_TERMS: &str = "women|men|girls|boys|immigrants|foreigners|refugees|muslims|christians|jews|hindus|buddhists|atheists|asians|africans|europeans|americans|elderly|old people|young people|teenagers|millennials|boomers|disabled people|poor people|rich people";

/// The bias detector.
pub struct BiasDetector {
    patterns: Vec<BiasPattern>,
}

impl BiasDetector {
    /// Compiles the lexicon and heuristic patterns.
    pub fn new() -> Self {
        let mut patterns = Vec::new();

        // Lexicon: explicit hostility toward a group is hate (critical).
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\b(?:i\s+)?hate\s+(?:all\s+)?(?:{terms})\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "hate",
            confidence: 0.9,
            severity: Severity::Critical,
        });
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\b(?:{terms})\s+(?:should\s+be\s+(?:banned|deported|excluded)|don'?t\s+deserve)\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "hate",
            confidence: 0.9,
            severity: Severity::Critical,
        });

        // Lexicon: explicit discrimination in decisions (high).
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\b(?:never|don'?t|refuse\s+to)\s+(?:hire|promote|serve|trust)\s+(?:{terms})\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "stereotyping",
            confidence: 0.85,
            severity: Severity::High,
        });

        // Heuristic: absolute quantifier bound to a demographic term (medium).
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\b(?:all|every|no)\s+(?:{terms})\s+(?:are|is|do|can'?t|cannot|always|never)\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "stereotyping",
            confidence: 0.75,
            severity: Severity::Medium,
        });
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\bonly\s+(?:{terms})\s+(?:should|can|deserve|belong)\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "stereotyping",
            confidence: 0.75,
            severity: Severity::Medium,
        });
        patterns.push(BiasPattern {
            pattern: Regex::new(&format!(
                r"(?i)\btypical\s+(?:{terms})\b",
                terms = DEMOGRAPHIC_TERMS
            ))
            .unwrap(),
            subtype: "stereotyping",
            confidence: 0.65,
            severity: Severity::Medium,
        });

        Self { patterns }
    }

    /// Refines a generic subtype to the demographic axis the match touches.
    fn classify_axis(matched: &str) -> &'static str {
        let lower = matched.to_lowercase();
        if ["women", "men", "girls", "boys"]
            .iter()
            .any(|t| lower.contains(t))
        {
            "gender"
        } else if ["muslims", "christians", "jews", "hindus", "buddhists", "atheists"]
            .iter()
            .any(|t| lower.contains(t))
        {
            "religious"
        } else if ["asians", "africans", "europeans", "americans"]
            .iter()
            .any(|t| lower.contains(t))
        {
            "racial"
        } else if [
            "elderly",
            "old people",
            "young people",
            "teenagers",
            "millennials",
            "boomers",
        ]
        .iter()
        .any(|t| lower.contains(t))
        {
            "age"
        } else if ["immigrants", "foreigners", "refugees"]
            .iter()
            .any(|t| lower.contains(t))
        {
            "cultural"
        } else {
            "stereotyping"
        }
    }
}

impl Default for BiasDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for BiasDetector {
    fn id(&self) -> &'static str {
        "bias"
    }

    fn scan(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for bias in &self.patterns {
            for m in bias.pattern.find_iter(text) {
                let span = span_from_bytes(text, m.start(), m.end());
                // Hate stays hate; other matches are refined to the axis.
                let subtype = if bias.subtype == "hate" {
                    "hate"
                } else {
                    Self::classify_axis(m.as_str())
                };
                let detector_id = if bias.confidence >= 0.85 {
                    LEXICON_ID
                } else {
                    QUANTIFIER_ID
                };
                findings.push(Finding::new(
                    FindingKind::Bias,
                    subtype,
                    span,
                    m.as_str(),
                    bias.confidence,
                    bias.severity,
                    detector_id,
                ));
            }
        }
        findings.sort_by_key(|f| (f.span.start, f.span.end));
        findings.dedup_by(|a, b| a.span.overlaps(&b.span) && a.severity <= b.severity);
        debug!(count = findings.len(), "bias scan complete");
        findings
    }

    fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => 2.0,
            Severity::Medium => 4.0,
            Severity::High => 7.0,
            Severity::Critical => 9.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<Finding> {
        BiasDetector::new().scan(text)
    }

    #[test]
    fn test_neutral_text_clean() {
        assert!(scan("The weather is nice today").is_empty());
        assert!(scan("All servers are down for maintenance").is_empty());
    }

    #[test]
    fn test_absolute_quantifier_flagged() {
        let findings = scan("All women are bad drivers");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subtype, "gender");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_only_quantifier_flagged() {
        let findings = scan("Only men should lead companies");
        assert_eq!(findings[0].subtype, "gender");
    }

    #[test]
    fn test_hate_is_critical() {
        let findings = scan("I hate immigrants");
        assert_eq!(findings[0].subtype, "hate");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_discrimination_is_high() {
        let findings = scan("We never hire old people here");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_age_axis() {
        let findings = scan("all boomers are out of touch");
        assert_eq!(findings[0].subtype, "age");
    }

    #[test]
    fn test_religious_axis() {
        let findings = scan("every muslims are the same");
        assert_eq!(findings[0].subtype, "religious");
    }

    #[test]
    fn test_never_mutates() {
        let findings = scan("typical millennials complaining again");
        assert!(findings
            .iter()
            .all(|f| f.suggested_replacement.is_none()));
    }
}
