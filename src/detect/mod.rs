//! Entity detection.
//!
//! # Architecture
//!
//! - [`EntityDetector`]: async trait implemented by every detector
//! - [`PatternDetector`]: in-process pattern families, always available
//! - [`RemoteDetector`]: HTTP detector services (legal NER, PII)
//! - [`DetectorSet`]: runs detectors over one text and isolates failures
//!
//! A failing detector never fails the run. Its contribution for that call
//! is empty and the failure is reported in [`DetectorOutcome::failure`].

pub mod confidence;
pub mod pattern;
pub mod remote;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cache::DetectionCache;
use crate::error::DetectError;

pub use confidence::{ConfidenceModel, DefaultConfidenceModel};
pub use pattern::PatternDetector;
pub use remote::{Dialect, RemoteDetector};

/// Coarse entity class. Drives redaction placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Person,
    Organization,
    Location,
    Financial,
    Date,
    CaseRef,
    LegalRole,
    Legislation,
    Email,
    Phone,
    IdNumber,
    Other,
}

impl Category {
    /// Replacement text used by [`crate::redact::redact`].
    pub fn placeholder(self) -> &'static str {
        match self {
            Category::Person => "[PERSON]",
            Category::Organization => "[ORGANIZATION]",
            Category::Location => "[LOCATION]",
            Category::Financial => "[FINANCIAL_AMOUNT]",
            Category::Date => "[DATE]",
            Category::CaseRef => "[CASE_REFERENCE]",
            Category::Email => "[EMAIL]",
            Category::Phone => "[PHONE]",
            Category::LegalRole
            | Category::Legislation
            | Category::IdNumber
            | Category::Other => "[REDACTED]",
        }
    }

    /// Whether spans of this category are removed from output text.
    ///
    /// Roles ("Solicitor") and statute names identify nobody.
    pub fn is_sensitive(self) -> bool {
        !matches!(self, Category::LegalRole | Category::Legislation)
    }
}

/// One detection over a text. Offsets are char offsets, `start < end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    /// Canonical upper-case label, e.g. `PERSON`, `FINANCIAL_AMOUNT`.
    pub label: String,
    pub category: Category,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub confidence: f32,
    /// Name of the detector that produced the span.
    pub source: String,
}

impl EntitySpan {
    /// Length in chars.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Shift offsets by `base` (chunk-local → document-global).
    #[must_use]
    pub fn shifted(mut self, base: usize) -> Self {
        self.start += base;
        self.end += base;
        self
    }
}

/// A source of entity spans.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    /// Detector name, used as span `source` (e.g. "pattern", "legal").
    fn name(&self) -> &str;

    /// Probe the detector. Called once per run; unavailable detectors are
    /// skipped for that run.
    async fn is_available(&self) -> bool;

    /// Largest input this detector accepts, if bounded.
    fn max_input_chars(&self) -> Option<usize> {
        None
    }

    /// Detect entities in `text`. Offsets are relative to `text`.
    async fn detect(&self, text: &str) -> Result<Vec<EntitySpan>, DetectError>;
}

/// Result of one detector over one text.
#[derive(Debug)]
pub struct DetectorOutcome {
    pub detector: String,
    pub spans: Vec<EntitySpan>,
    /// Set when the call failed; `spans` is then empty.
    pub failure: Option<String>,
}

/// The detectors configured for a pipeline.
pub struct DetectorSet {
    detectors: Vec<Arc<dyn EntityDetector>>,
    model: Arc<dyn ConfidenceModel>,
    cache: Option<Mutex<DetectionCache>>,
}

impl DetectorSet {
    pub fn new(detectors: Vec<Arc<dyn EntityDetector>>, model: Arc<dyn ConfidenceModel>) -> Self {
        Self {
            detectors,
            model,
            cache: None,
        }
    }

    /// Reuse results for texts seen before.
    #[must_use]
    pub fn with_cache(mut self, cache: DetectionCache) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    pub fn model(&self) -> &Arc<dyn ConfidenceModel> {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Names of all configured detectors, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Probe every detector and return those that answered.
    pub async fn available(&self) -> Vec<Arc<dyn EntityDetector>> {
        let probes = join_all(self.detectors.iter().map(|d| d.is_available())).await;
        self.detectors
            .iter()
            .zip(probes)
            .filter_map(|(detector, up)| {
                if !up {
                    tracing::warn!(detector = detector.name(), "detector unavailable, skipping");
                }
                up.then(|| Arc::clone(detector))
            })
            .collect()
    }

    /// Smallest input ceiling among `active`, if any detector has one.
    pub fn input_ceiling(active: &[Arc<dyn EntityDetector>]) -> Option<usize> {
        active.iter().filter_map(|d| d.max_input_chars()).min()
    }

    /// Run `active` detectors over `text` concurrently.
    ///
    /// Outcomes come back in detector order. Confidences are normalised by
    /// the set's [`ConfidenceModel`] and spans with broken offsets discard
    /// that detector's whole response.
    pub async fn detect_all(
        &self,
        active: &[Arc<dyn EntityDetector>],
        text: &str,
    ) -> Vec<DetectorOutcome> {
        let calls = active.iter().map(|detector| self.detect_one(detector.as_ref(), text));
        join_all(calls).await
    }

    async fn detect_one(&self, detector: &dyn EntityDetector, text: &str) -> DetectorOutcome {
        let name = detector.name().to_string();

        if let Some(spans) = self.cached(&name, text) {
            tracing::trace!(detector = %name, "detection cache hit");
            return DetectorOutcome {
                detector: name,
                spans,
                failure: None,
            };
        }

        let result = detector
            .detect(text)
            .await
            .and_then(|spans| self.normalise(&name, text, spans));

        match result {
            Ok(spans) => {
                self.store(&name, text, &spans);
                DetectorOutcome {
                    detector: name,
                    spans,
                    failure: None,
                }
            }
            Err(e) => {
                tracing::warn!(detector = %name, outage = e.is_outage(), "detector failed: {e}");
                DetectorOutcome {
                    detector: name,
                    spans: Vec::new(),
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    fn normalise(
        &self,
        name: &str,
        text: &str,
        spans: Vec<EntitySpan>,
    ) -> Result<Vec<EntitySpan>, DetectError> {
        let len = crate::text::char_len(text);
        spans
            .into_iter()
            .map(|mut span| {
                if span.start >= span.end || span.end > len {
                    return Err(DetectError::MalformedResponse {
                        detector: name.to_string(),
                        reason: format!(
                            "span [{}, {}) outside text of {len} chars",
                            span.start, span.end
                        ),
                    });
                }
                span.confidence = self.model.normalize(span.confidence);
                span.source = name.to_string();
                Ok(span)
            })
            .collect()
    }

    fn cached(&self, name: &str, text: &str) -> Option<Vec<EntitySpan>> {
        let cache = self.cache.as_ref()?;
        let mut guard = cache.lock().ok()?;
        guard.get(name, text)
    }

    fn store(&self, name: &str, text: &str, spans: &[EntitySpan]) {
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(name, text, spans.to_vec());
            }
        }
    }
}
