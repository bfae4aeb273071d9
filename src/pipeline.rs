//! Per-document analysis run.
//!
//! A run moves through a fixed sequence of stages:
//!
//! ```text
//! Pending → LayoutAnalysis → EntityDetection → Reconciliation
//!         → [ChunkMerge] → RiskScoring → Complete
//! ```
//!
//! `ChunkMerge` only happens for documents split into several chunks.
//! Empty or unreadable input goes straight to `Error` with a blocked
//! verdict. Detector failures and cancellation never reach `Error`; they
//! show up as coverage gaps and risk notes.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::DetectionCache;
use crate::chunk::{CancelFlag, ChunkDispatcher, ChunkPlanner};
use crate::config::EngineConfig;
use crate::detect::{
    ConfidenceModel, DefaultConfidenceModel, DetectorSet, Dialect, EntityDetector,
    PatternDetector, RemoteDetector,
};
use crate::error::ConfigError;
use crate::layout::{
    detect_tables, group_rows, rows_to_text, PageIndex, PositionedToken, TableRegion,
};
use crate::reconcile::{ChunkBounds, ReconciledEntity, Reconciler};
use crate::redact::redact;
use crate::risk::{RiskAssessment, RiskInputs, RiskScorer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    LayoutAnalysis,
    EntityDetection,
    Reconciliation,
    ChunkMerge,
    RiskScoring,
    Complete,
    Error,
}

fn advance(stage: &mut Stage, to: Stage) {
    debug!(from = ?*stage, to = ?to, "stage transition");
    *stage = to;
}

/// A document submitted for analysis.
///
/// `text` is the extracted plain text. When it is empty but `tokens` are
/// present, text is rebuilt from the token rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<PositionedToken>,
    /// Text derived from the document (e.g. a summary) that will leave the
    /// system alongside the redacted output.
    #[serde(default)]
    pub derived_summary: Option<String>,
    /// Page count reported by the extractor, checked against token pages.
    #[serde(default)]
    pub page_count: Option<u32>,
}

impl DocumentInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: Vec<PositionedToken>) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.derived_summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = Some(pages);
        self
    }

    /// Disagreement between the reported page count and the token pages.
    fn page_count_mismatch(&self) -> Option<String> {
        let reported = self.page_count?;
        let seen = self.tokens.iter().map(|t| t.page).max()?;
        (seen >= reported).then(|| {
            format!(
                "page count mismatch: {reported} reported, tokens reach page {}",
                seen + 1
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Coverage {
    pub chunks_total: usize,
    pub chunks_processed: usize,
    /// Detectors that were unavailable or failed on at least one chunk.
    pub detectors_failed: Vec<String>,
    pub cancelled: bool,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.chunks_processed == self.chunks_total && !self.cancelled
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    pub stage: Stage,
    pub entities: Vec<ReconciledEntity>,
    pub tables: Vec<TableRegion>,
    pub redacted_text: String,
    pub risk: RiskAssessment,
    pub coverage: Coverage,
}

/// Layout, detection, reconciliation and scoring for one configuration.
pub struct IntakePipeline {
    config: EngineConfig,
    detectors: Arc<DetectorSet>,
    reconciler: Reconciler,
    scorer: RiskScorer,
}

impl IntakePipeline {
    pub fn new(config: EngineConfig, detectors: DetectorSet) -> Self {
        let model = Arc::clone(detectors.model());
        Self {
            reconciler: Reconciler::new(Arc::clone(&model)),
            scorer: RiskScorer::new(config.risk.clone(), PatternDetector::new(model)),
            detectors: Arc::new(detectors),
            config,
        }
    }

    /// Pattern detector plus whichever remote services `config` names.
    pub fn with_local_defaults(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let model: Arc<dyn ConfidenceModel> = Arc::new(DefaultConfidenceModel);
        let timeout = Duration::from_secs(config.detectors.timeout_secs);

        let mut detectors: Vec<Arc<dyn EntityDetector>> =
            vec![Arc::new(PatternDetector::new(Arc::clone(&model)))];

        if let Some(url) = &config.detectors.legal_url {
            let legal = RemoteDetector::new("legal", url, Dialect::Legal, timeout)
                .map_err(|e| ConfigError::Invalid(format!("legal detector: {e}")))?;
            detectors.push(Arc::new(legal));
        }
        if let Some(url) = &config.detectors.pii_url {
            let pii = RemoteDetector::new("pii", url, Dialect::Pii, timeout)
                .map_err(|e| ConfigError::Invalid(format!("pii detector: {e}")))?
                .with_max_input_chars(config.detectors.pii_max_chars);
            detectors.push(Arc::new(pii));
        }

        let mut set = DetectorSet::new(detectors, model);
        if config.cache.capacity > 0 {
            set = set.with_cache(DetectionCache::new(
                config.cache.capacity,
                Duration::from_secs(config.cache.ttl_secs),
            ));
        }
        Ok(Self::new(config, set))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn analyze(&self, input: &DocumentInput) -> AnalysisOutput {
        self.analyze_with_cancel(input, &CancelFlag::new()).await
    }

    /// Analyse `input`, stopping chunk dispatch once `cancel` is set.
    #[instrument(skip_all, fields(chars = input.text.len(), tokens = input.tokens.len()))]
    pub async fn analyze_with_cancel(
        &self,
        input: &DocumentInput,
        cancel: &CancelFlag,
    ) -> AnalysisOutput {
        let mut stage = Stage::Pending;

        advance(&mut stage, Stage::LayoutAnalysis);
        let rows = group_rows(&input.tokens, self.config.layout.row_tolerance);
        let tables = detect_tables(&rows, &self.config.table);
        let (text, pages): (Cow<'_, str>, PageIndex) =
            if input.text.trim().is_empty() && !rows.is_empty() {
                let (rebuilt, pages) = rows_to_text(&rows);
                (Cow::Owned(rebuilt), pages)
            } else {
                (
                    Cow::Borrowed(&input.text),
                    PageIndex::from_form_feeds(&input.text),
                )
            };
        let page_mismatch = input.page_count_mismatch();
        if let Some(note) = &page_mismatch {
            warn!(reported = ?input.page_count, "{note}");
        }

        if text.trim().is_empty() {
            advance(&mut stage, Stage::Error);
            info!("rejecting empty document");
            return AnalysisOutput {
                stage,
                entities: Vec::new(),
                tables,
                redacted_text: String::new(),
                risk: RiskAssessment::blocked("empty or unreadable input"),
                coverage: Coverage::default(),
            };
        }

        advance(&mut stage, Stage::EntityDetection);
        let active = self.detectors.available().await;
        let mut failed: BTreeMap<String, usize> = self
            .detectors
            .names()
            .into_iter()
            .filter(|name| active.iter().all(|d| d.name() != *name))
            .map(|name| (name.to_string(), 0))
            .collect();
        let unavailable: Vec<String> = failed.keys().cloned().collect();

        let planner = ChunkPlanner::from_config(
            &self.config.chunking,
            DetectorSet::input_ceiling(&active),
        );
        let chunks = planner.plan(&text);
        let report = ChunkDispatcher::from_config(&self.config.chunking)
            .dispatch(chunks, Arc::clone(&self.detectors), Arc::new(active), cancel)
            .await;

        advance(&mut stage, Stage::Reconciliation);
        let mut entities = Vec::new();
        let mut bounds = Vec::with_capacity(report.results.len());
        for result in &report.results {
            entities.extend(self.reconciler.merge_batch(&result.spans, result.index));
            bounds.push(ChunkBounds {
                index: result.index,
                start: result.start,
                end: result.end,
            });
            for (detector, _) in &result.failures {
                *failed.entry(detector.clone()).or_default() += 1;
            }
        }

        if report.chunks_total > 1 {
            advance(&mut stage, Stage::ChunkMerge);
            entities = self.reconciler.dedup_across_chunks(entities, &bounds);
        }
        assign_pages(&pages, &mut entities);

        let redacted_text = redact(&text, &entities);

        advance(&mut stage, Stage::RiskScoring);
        let mut notes: Vec<String> = page_mismatch.into_iter().collect();
        for name in &unavailable {
            notes.push(format!("detector {name} unavailable"));
        }
        for (name, count) in failed.iter().filter(|(_, n)| **n > 0) {
            notes.push(format!(
                "detector {name} failed on {count} of {} chunks",
                report.chunks_total
            ));
        }
        if report.chunks_processed() < report.chunks_total {
            notes.push(format!(
                "partial coverage: {} of {} chunks analysed{}",
                report.chunks_processed(),
                report.chunks_total,
                if report.cancelled { " (cancelled)" } else { "" }
            ));
        }

        let risk = self.scorer.assess(&RiskInputs {
            redacted_text: &redacted_text,
            entity_count: entities.len(),
            table_count: tables.len(),
            derived_summary: input.derived_summary.as_deref(),
            notes,
        });

        advance(&mut stage, Stage::Complete);
        info!(
            entities = entities.len(),
            tables = tables.len(),
            chunks = report.chunks_total,
            tier = ?risk.tier,
            "analysis complete"
        );

        AnalysisOutput {
            stage,
            entities,
            tables,
            redacted_text,
            risk,
            coverage: Coverage {
                chunks_total: report.chunks_total,
                chunks_processed: report.chunks_processed(),
                detectors_failed: failed.into_keys().collect(),
                cancelled: report.cancelled,
            },
        }
    }
}

/// Attribute entities to the page their first char sits on.
fn assign_pages(pages: &PageIndex, entities: &mut [ReconciledEntity]) {
    if pages.is_empty() {
        return;
    }
    for entity in entities {
        entity.page = pages.page_at(entity.start);
    }
}
