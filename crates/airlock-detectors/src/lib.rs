//! # Airlock Detectors
//!
//! Stateless risk scanners for the Airlock gateway. Each detector is a pure
//! function from text to a set of typed [`Finding`]s with code-point spans,
//! confidence scores and severities.
//!
//! ## Detector Families
//!
//! | Detector | Phase | Threats Covered |
//! |----------|-------|-----------------|
//! | PII | input, output, data | Identifier leakage (email, cards, keys, names) |
//! | Bias | input, output | Discriminatory framing, hate, stereotyping |
//! | Adversarial | input | Prompt injection, jailbreaks, extraction probes |
//! | Hallucination | output only | Claims unsupported by retrieved grounding |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  DetectorRegistry                    │
//! │   ┌─────────┐   ┌─────────┐   ┌──────────────┐       │
//! │   │   PII   │   │  Bias   │   │ Adversarial  │       │
//! │   └─────────┘   └─────────┘   └──────────────┘       │
//! │        text ──▶ scan() ──▶ Vec<Finding>              │
//! └──────────────────────────────────────────────────────┘
//!          ┌────────────────────────────────┐
//!          │    HallucinationDetector       │   (context-bound,
//!          │ output + grounding ──▶ report  │    dispatched separately)
//!          └────────────────────────────────┘
//! ```
//!
//! ## Security Notes
//!
//! - Detectors never mutate text; sanitization is the risk agent's job.
//! - Detectors are deterministic: identical input yields identical findings,
//!   which the aggregate fingerprint depends on.
//! - The registry is immutable after process start; enablement is data.

mod adversarial;
mod bias;
mod finding;
mod hallucination;
mod pii;
mod registry;

pub use adversarial::AdversarialDetector;
pub use bias::BiasDetector;
pub use finding::{
    span_from_bytes, span_to_byte_range, Finding, FindingKind, RiskClass, Severity, Span,
};
pub use hallucination::{
    Claim, ClaimStatus, GroundingRecord, HallucinationDetector, HallucinationReport,
};
pub use pii::PiiDetector;
pub use registry::{Detector, DetectorRegistry};
