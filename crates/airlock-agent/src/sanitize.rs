//! Span merging and replacement application.
//!
//! Replacements are applied in reverse span order so earlier offsets stay
//! valid while later spans are rewritten. Overlapping spans from different
//! detectors are first merged into one replacement using the union span and
//! the higher severity's kind for naming.

use airlock_detectors::{span_to_byte_range, Finding, Span};

/// One planned replacement: a span and the severity/kind that names it.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// Union span to replace, code-point offsets.
    pub span: Span,
    /// Kind label that names the placeholder (e.g. "EMAIL").
    pub kind_label: String,
    /// The original text under the union span.
    pub original: String,
}

/// Merges sanitize-eligible findings into non-overlapping replacements.
///
/// Findings must not be empty-span (operational findings are filtered by the
/// caller). On overlap the union span is kept and the higher severity's kind
/// wins the name.
pub fn plan_replacements(text: &str, findings: &[&Finding]) -> Vec<Replacement> {
    let mut sorted: Vec<&Finding> = findings
        .iter()
        .copied()
        .filter(|f| !f.span.is_empty())
        .collect();
    sorted.sort_by_key(|f| (f.span.start, f.span.end));

    let mut planned: Vec<(Span, &Finding)> = Vec::new();
    for finding in sorted {
        match planned.last_mut() {
            Some((span, named_by)) if span.overlaps(&finding.span) => {
                *span = span.union(&finding.span);
                if finding.severity > named_by.severity {
                    *named_by = finding;
                }
            }
            _ => planned.push((finding.span, finding)),
        }
    }

    planned
        .into_iter()
        .map(|(span, named_by)| {
            let range = span_to_byte_range(text, &span);
            Replacement {
                span,
                kind_label: named_by.kind_label(),
                original: text[range].to_string(),
            }
        })
        .collect()
}

/// Applies `(span, replacement)` pairs to `text` in reverse span order.
///
/// Spans must be non-overlapping and sorted ascending; `plan_replacements`
/// guarantees both.
pub fn apply_replacements(text: &str, replacements: &[(Span, String)]) -> String {
    let mut result = text.to_string();
    for (span, replacement) in replacements.iter().rev() {
        let range = span_to_byte_range(&result, span);
        result.replace_range(range, replacement);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_detectors::{FindingKind, Severity};

    fn finding(subtype: &str, start: usize, end: usize, severity: Severity) -> Finding {
        Finding::new(
            FindingKind::Pii,
            subtype,
            Span::new(start, end),
            "",
            0.9,
            severity,
            "pii.rules",
        )
    }

    #[test]
    fn test_apply_in_reverse_order() {
        let text = "mail a@b.io and c@d.io";
        let replacements = vec![
            (Span::new(5, 11), "\u{2039}EMAIL_1\u{203a}".to_string()),
            (Span::new(16, 22), "\u{2039}EMAIL_2\u{203a}".to_string()),
        ];
        let result = apply_replacements(text, &replacements);
        assert_eq!(result, "mail \u{2039}EMAIL_1\u{203a} and \u{2039}EMAIL_2\u{203a}");
    }

    #[test]
    fn test_overlap_union_keeps_higher_severity_kind() {
        let text = "0123456789abcdef";
        let a = finding("email", 2, 8, Severity::High);
        let b = finding("ssn", 6, 12, Severity::Critical);
        let planned = plan_replacements(text, &[&a, &b]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].span, Span::new(2, 12));
        assert_eq!(planned[0].kind_label, "SSN");
        assert_eq!(planned[0].original, "23456789ab");
    }

    #[test]
    fn test_disjoint_spans_kept_separate() {
        let text = "0123456789";
        let a = finding("email", 0, 3, Severity::High);
        let b = finding("phone", 5, 8, Severity::High);
        let planned = plan_replacements(text, &[&a, &b]);
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn test_multibyte_text_replacement() {
        let text = "héllo a@b.io wörld";
        let span = Span::new(6, 12);
        let result = apply_replacements(text, &[(span, "\u{2039}EMAIL_1\u{203a}".to_string())]);
        assert_eq!(result, "héllo \u{2039}EMAIL_1\u{203a} wörld");
    }

    #[test]
    fn test_empty_span_findings_filtered() {
        let text = "abc";
        let op = Finding::detector_timeout("pii");
        let planned = plan_replacements(text, &[&op]);
        assert!(planned.is_empty());
    }
}
