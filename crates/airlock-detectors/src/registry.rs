//! Detector capability trait and the process-wide registry.
//!
//! Detectors are selected by *data*, not code: the registry is built once at
//! process start from a list of enabled names and is immutable afterwards, so
//! reads never take a lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::adversarial::AdversarialDetector;
use crate::bias::BiasDetector;
use crate::finding::{Finding, Severity};
use crate::pii::PiiDetector;

/// Capability set every registered detector implements.
///
/// A detector is a pure function over text: same input, same findings. State
/// (compiled patterns, lexicons) is constructed up front and read-only during
/// scans, which is what makes the concurrent fan-out in the risk agent safe
/// without locks.
pub trait Detector: Send + Sync {
    /// Stable identifier, also used as the registry key.
    fn id(&self) -> &'static str;

    /// Scans `text` and returns all findings, in span order.
    fn scan(&self, text: &str) -> Vec<Finding>;

    /// Score contributed by a finding of the given severity.
    ///
    /// Each family calibrates its own table; adversarial findings weigh
    /// heavier than PII at the same severity because a single hit can
    /// compromise the whole exchange.
    fn weight(&self, severity: Severity) -> f64;
}

/// Immutable registry of enabled detectors, keyed by id.
///
/// # Example
///
/// ```rust
/// use airlock_detectors::DetectorRegistry;
///
/// let registry = DetectorRegistry::with_defaults();
/// assert!(registry.get("pii").is_some());
/// assert_eq!(registry.len(), 3);
/// ```
#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: BTreeMap<&'static str, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Builds an empty registry.
    pub fn new() -> Self {
        Self {
            detectors: BTreeMap::new(),
        }
    }

    /// Builds the standard text-detector set: PII, bias, adversarial.
    ///
    /// The hallucination detector is not part of the scan registry; it needs
    /// grounding context and is dispatched separately on the output phase.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PiiDetector::new()));
        registry.register(Arc::new(BiasDetector::new()));
        registry.register(Arc::new(AdversarialDetector::new()));
        registry
    }

    /// Builds a registry containing only the named detectors.
    ///
    /// Unknown names are ignored; enablement is configuration data, and a
    /// typo should not take the process down.
    pub fn with_enabled(names: &[String]) -> Self {
        let full = Self::with_defaults();
        let mut registry = Self::new();
        for name in names {
            if let Some(d) = full.get(name) {
                registry.detectors.insert(d.id(), d);
            } else {
                debug!("ignoring unknown detector name: {}", name);
            }
        }
        registry
    }

    /// Registers a detector under its own id.
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.id(), detector);
    }

    /// Looks a detector up by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(id).cloned()
    }

    /// All registered detectors, in id order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn Detector>> + '_ {
        self.detectors.values().cloned()
    }

    /// Number of registered detectors.
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Returns true if no detector is registered.
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Registered detector ids, in order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.detectors.keys().copied().collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.ids())
            .finish()
    }
}
