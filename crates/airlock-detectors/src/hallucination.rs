//! # Hallucination Detector
//!
//! Verifies model *outputs* against the grounding records retrieved during
//! the tool-call loop. Unlike the text detectors this one needs context, so
//! it is dispatched separately by the risk agent on the output phase and is
//! not part of the scan registry.
//!
//! ## Method
//!
//! 1. Split the output into candidate claims (one per declarative sentence)
//!    and extract a rough subject/predicate/object tuple per claim.
//! 2. Verify each claim against the grounding records:
//!    - **supported**: the claim mentions a grounding value verbatim
//!      (after normalization).
//!    - **contradicted**: the claim asserts an alternative from the same
//!      closed vocabulary as a grounding value (e.g. "delivered" when the
//!      grounding says `in_transit`), or a date that differs from every
//!      grounded date.
//!    - **unverifiable**: neither of the above.
//! 3. `factual_accuracy = supported / (supported + contradicted + unverifiable)`.
//! 4. The 0-10 score rises with contradicted mass and with the fraction of
//!    unverifiable claims that are *about* grounded entities:
//!    `score = min(10, 8·contradicted_frac + 4·unverifiable_known_frac)`.
//!
//! The closed status vocabulary is the calibration surface here; claims
//! outside any known vocabulary degrade to unverifiable rather than
//! contradicted, which keeps false contradictions rare.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::finding::{Finding, FindingKind, Severity, Span};

const DETECTOR_ID: &str = "hallucination.claims";

/// One grounded fact: a key/value pair from a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingRecord {
    /// Column or field name.
    pub key: String,
    /// Cell value, verbatim.
    pub value: String,
}

impl GroundingRecord {
    /// Creates a grounding record.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Verification status of one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    /// The claim matches grounded data.
    Supported,
    /// The claim conflicts with grounded data.
    Contradicted,
    /// No grounded data speaks to the claim.
    Unverifiable,
}

/// A claim extracted from the model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Rough grammatical subject.
    pub subject: String,
    /// Rough predicate (main verb phrase).
    pub predicate: String,
    /// Rough object (remainder).
    pub object: String,
    /// The full sentence the claim was extracted from.
    pub text: String,
    /// Span of the sentence in the output, code-point offsets.
    pub span: Span,
    /// Verification status.
    pub status: ClaimStatus,
    /// Grounding key that decided the status, if any.
    pub evidence: Option<String>,
    /// True if the claim mentions a grounded entity at all.
    pub about_grounding: bool,
}

/// Result of verifying one output against grounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationReport {
    /// All extracted claims with their statuses.
    pub claims: Vec<Claim>,
    /// Findings for contradicted and unverifiable claims.
    pub findings: Vec<Finding>,
    /// supported / total, 1.0 for an output with no claims.
    pub factual_accuracy: f64,
    /// 0-10 hallucination score.
    pub score: f64,
}

/// The hallucination detector.
///
/// # Example
///
/// ```rust
/// use airlock_detectors::{GroundingRecord, HallucinationDetector};
///
/// let detector = HallucinationDetector::new();
/// let grounding = vec![
///     GroundingRecord::new("status", "in_transit"),
///     GroundingRecord::new("id", "ORD-1"),
/// ];
/// let report = detector.verify("Order ORD-1 is in transit", &grounding, "where is my order?");
/// assert_eq!(report.factual_accuracy, 1.0);
/// assert_eq!(report.score, 0.0);
/// ```
pub struct HallucinationDetector {
    /// Closed vocabularies of mutually exclusive states. A grounded value in
    /// one of these contradicts any *other* member asserted by a claim.
    vocabularies: Vec<Vec<&'static str>>,
    date_pattern: Regex,
    verb_pattern: Regex,
}

impl HallucinationDetector {
    /// Builds the detector with the default state vocabularies.
    pub fn new() -> Self {
        Self {
            vocabularies: vec![
                // Fulfillment lifecycle.
                vec![
                    "pending",
                    "processing",
                    "shipped",
                    "in transit",
                    "out for delivery",
                    "delivered",
                    "cancelled",
                    "returned",
                    "delayed",
                ],
                // Account / record states.
                vec!["active", "inactive", "suspended", "closed"],
                // Payment states.
                vec!["paid", "unpaid", "refunded", "overdue"],
                // Availability.
                vec!["in stock", "out of stock", "backordered"],
            ],
            date_pattern: Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap(),
            verb_pattern: Regex::new(
                r"(?i)\b(is|are|was|were|has|have|had|will|arrived|shipped|delivered|departed|remains?|became?)\b",
            )
            .unwrap(),
        }
    }

    /// Verifies `output` against `grounding`.
    ///
    /// `question` is used only to discard sentences that merely echo the
    /// user's question; interrogative sentences are never claims.
    pub fn verify(
        &self,
        output: &str,
        grounding: &[GroundingRecord],
        question: &str,
    ) -> HallucinationReport {
        let claims = self.extract_claims(output, grounding, question);

        let total = claims.len();
        let supported = claims
            .iter()
            .filter(|c| c.status == ClaimStatus::Supported)
            .count();
        let contradicted = claims
            .iter()
            .filter(|c| c.status == ClaimStatus::Contradicted)
            .count();
        let unverifiable_known = claims
            .iter()
            .filter(|c| c.status == ClaimStatus::Unverifiable && c.about_grounding)
            .count();

        let factual_accuracy = if total == 0 {
            1.0
        } else {
            supported as f64 / total as f64
        };
        let score = if total == 0 {
            0.0
        } else {
            let contradicted_frac = contradicted as f64 / total as f64;
            let unverifiable_frac = unverifiable_known as f64 / total as f64;
            (8.0 * contradicted_frac + 4.0 * unverifiable_frac).min(10.0)
        };

        let findings = claims
            .iter()
            .filter_map(|claim| match claim.status {
                ClaimStatus::Contradicted => Some(
                    Finding::new(
                        FindingKind::Hallucination,
                        "contradiction",
                        claim.span,
                        claim.text.clone(),
                        0.85,
                        Severity::High,
                        DETECTOR_ID,
                    ),
                ),
                ClaimStatus::Unverifiable if claim.about_grounding => Some(Finding::new(
                    FindingKind::Hallucination,
                    "unverifiable",
                    claim.span,
                    claim.text.clone(),
                    0.7,
                    Severity::Medium,
                    DETECTOR_ID,
                )),
                _ => None,
            })
            .collect();

        debug!(
            total,
            supported, contradicted, score, "hallucination verification complete"
        );

        HallucinationReport {
            claims,
            findings,
            factual_accuracy,
            score,
        }
    }

    /// Splits the output into declarative sentences and verifies each.
    fn extract_claims(
        &self,
        output: &str,
        grounding: &[GroundingRecord],
        question: &str,
    ) -> Vec<Claim> {
        let question_norm = normalize(question);
        let chars: Vec<char> = output.chars().collect();
        let mut claims = Vec::new();
        let mut start = 0usize;

        for end in 0..=chars.len() {
            let at_boundary =
                end == chars.len() || matches!(chars[end], '.' | '!' | '?' | '\n');
            if !at_boundary {
                continue;
            }
            let sentence: String = chars[start..end].iter().collect();
            let is_question = end < chars.len() && chars[end] == '?';
            let trimmed = sentence.trim();
            let lead = sentence.chars().take_while(|c| c.is_whitespace()).count();
            if trimmed.split_whitespace().count() >= 3
                && !is_question
                && !question_norm.contains(&normalize(trimmed))
            {
                let span = Span::new(start + lead, start + lead + trimmed.chars().count());
                claims.push(self.verify_claim(trimmed, span, grounding));
            }
            start = end + 1;
        }
        claims
    }

    /// Builds and verifies a single claim from a sentence.
    fn verify_claim(&self, sentence: &str, span: Span, grounding: &[GroundingRecord]) -> Claim {
        let norm = normalize(sentence);
        let (subject, predicate, object) = self.split_tuple(sentence);

        let mut status = ClaimStatus::Unverifiable;
        let mut evidence = None;
        let mut about_grounding = false;

        // Pass 1: direct value support and closed-vocabulary contradiction.
        for record in grounding {
            let value_norm = normalize(&record.value);
            if value_norm.is_empty() {
                continue;
            }
            if norm.contains(&value_norm) {
                about_grounding = true;
                if status != ClaimStatus::Contradicted {
                    status = ClaimStatus::Supported;
                    evidence.get_or_insert_with(|| record.key.clone());
                }
                continue;
            }
            if let Some(vocab) = self.vocabulary_of(&value_norm) {
                // The grounded value belongs to a closed vocabulary the claim
                // does not repeat; an alternative member is a contradiction.
                if vocab
                    .iter()
                    .any(|alt| *alt != value_norm && norm.contains(alt))
                {
                    status = ClaimStatus::Contradicted;
                    evidence = Some(record.key.clone());
                    about_grounding = true;
                }
            }
            if norm.contains(&normalize(&record.key)) {
                about_grounding = true;
            }
        }

        // Pass 2: dates asserted by the claim must appear in grounding.
        if status != ClaimStatus::Contradicted {
            let grounded_dates: Vec<&str> = grounding
                .iter()
                .flat_map(|r| self.date_pattern.find_iter(&r.value))
                .map(|m| m.as_str())
                .collect();
            for claimed in self.date_pattern.find_iter(sentence) {
                if grounded_dates.is_empty() {
                    continue;
                }
                if !grounded_dates.contains(&claimed.as_str()) {
                    status = ClaimStatus::Contradicted;
                    evidence = Some("date".to_string());
                    about_grounding = true;
                }
            }
        }

        Claim {
            subject,
            predicate,
            object,
            text: sentence.to_string(),
            span,
            status,
            evidence,
            about_grounding,
        }
    }

    /// Rough subject/predicate/object split around the first verb.
    ///
    /// Heuristic by construction; the tuple is reporting detail, the
    /// verification itself works on the whole sentence.
    fn split_tuple(&self, sentence: &str) -> (String, String, String) {
        if let Some(m) = self.verb_pattern.find(sentence) {
            let subject = sentence[..m.start()].trim().to_string();
            let predicate = m.as_str().to_string();
            let object = sentence[m.end()..].trim().to_string();
            (subject, predicate, object)
        } else {
            let mut words = sentence.split_whitespace();
            let subject = words.next().unwrap_or("").to_string();
            let rest: Vec<&str> = words.collect();
            let (predicate, object) = match rest.split_first() {
                Some((p, o)) => (p.to_string(), o.join(" ")),
                None => (String::new(), String::new()),
            };
            (subject, predicate, object)
        }
    }

    /// The closed vocabulary a normalized value belongs to, if any.
    fn vocabulary_of(&self, value_norm: &str) -> Option<&Vec<&'static str>> {
        self.vocabularies
            .iter()
            .find(|vocab| vocab.contains(&value_norm))
    }
}

impl Default for HallucinationDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases and folds separators so `in_transit`, `In Transit` and
/// `in-transit` compare equal.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '_' | '-' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
