//! Output risk scoring.
//!
//! Scores start at 1.0 and lose fixed penalties:
//!
//! | Check                                   | Penalty | Hard |
//! |-----------------------------------------|---------|------|
//! | Residual PII pattern in redacted output | 0.3     | strict mode |
//! | Derived summary still names someone     | 0.5     | always |
//! | Output shorter than `min_output_chars`  | 0.1     | no |
//! | No entities detected at all             | 0.2     | no |
//!
//! A hard failure blocks. Otherwise a score under the threshold blocks in
//! strict mode and asks for review in lenient mode.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::RiskConfig;
use crate::detect::{Category, PatternDetector};

const RESIDUAL_PENALTY: f32 = 0.3;
const SUMMARY_PENALTY: f32 = 0.5;
const SHORT_OUTPUT_PENALTY: f32 = 0.1;
const NO_ENTITIES_PENALTY: f32 = 0.2;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Z_]+\]").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Review,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub score: f32,
    pub tier: RiskTier,
    pub notes: Vec<String>,
}

impl RiskAssessment {
    /// Verdict for input that could not be analysed at all.
    pub fn blocked(note: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            tier: RiskTier::Blocked,
            notes: vec![note.into()],
        }
    }
}

/// What the scorer looks at.
#[derive(Debug, Default)]
pub struct RiskInputs<'a> {
    pub redacted_text: &'a str,
    pub entity_count: usize,
    pub table_count: usize,
    /// Any text derived from the document that leaves the system.
    pub derived_summary: Option<&'a str>,
    /// Notes from earlier stages (detector failures, partial coverage).
    pub notes: Vec<String>,
}

pub struct RiskScorer {
    config: RiskConfig,
    patterns: PatternDetector,
}

impl RiskScorer {
    pub fn new(config: RiskConfig, patterns: PatternDetector) -> Self {
        Self { config, patterns }
    }

    pub fn assess(&self, inputs: &RiskInputs<'_>) -> RiskAssessment {
        let mut score: f32 = 1.0;
        let mut hard_fail = false;
        let mut notes = inputs.notes.clone();

        let residual = self.residual_entities(inputs.redacted_text);
        if !residual.is_empty() {
            score -= RESIDUAL_PENALTY;
            hard_fail |= self.config.strict;
            notes.push(format!(
                "residual PII patterns in redacted output: {}",
                residual.join(", ")
            ));
        }

        if let Some(summary) = inputs.derived_summary {
            let named = self
                .patterns
                .scan(&strip_placeholders(summary))
                .into_iter()
                .any(|s| {
                    matches!(
                        s.category,
                        Category::Person | Category::Financial | Category::Date
                    )
                });
            if named {
                score -= SUMMARY_PENALTY;
                hard_fail = true;
                notes.push("derived summary contains non-anonymous content".to_string());
            }
        }

        if inputs.redacted_text.chars().count() < self.config.min_output_chars {
            score -= SHORT_OUTPUT_PENALTY;
            notes.push(format!(
                "output shorter than {} chars",
                self.config.min_output_chars
            ));
        }

        if inputs.entity_count == 0 {
            score -= NO_ENTITIES_PENALTY;
            notes.push("no entities detected".to_string());
        }

        let score = score.max(0.0);
        let tier = if hard_fail {
            RiskTier::Blocked
        } else if score < self.config.threshold {
            if self.config.strict {
                RiskTier::Blocked
            } else {
                RiskTier::Review
            }
        } else {
            RiskTier::Safe
        };

        tracing::debug!(
            score,
            ?tier,
            tables = inputs.table_count,
            "risk assessed"
        );

        RiskAssessment { score, tier, notes }
    }

    /// Labels of sensitive pattern matches left after redaction.
    fn residual_entities(&self, redacted: &str) -> Vec<String> {
        let mut labels: Vec<String> = self
            .patterns
            .scan(&strip_placeholders(redacted))
            .into_iter()
            .filter(|s| s.category.is_sensitive())
            .map(|s| s.label)
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}

/// Blank out placeholders so they cannot glue neighbours into matches.
fn strip_placeholders(text: &str) -> String {
    PLACEHOLDER.replace_all(text, " ").into_owned()
}
