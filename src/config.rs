//! Engine configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) yields a
//! working local-only engine. Remote detectors are enabled by setting
//! their base URL.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layout: LayoutConfig,
    pub table: TableConfig,
    pub chunking: ChunkingConfig,
    pub detectors: DetectorConfig,
    pub risk: RiskConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Max vertical distance (points) for two tokens to share a row.
    pub row_tolerance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Token x-positions closer than this merge into one column slot.
    pub slot_merge_threshold: f32,
    /// Max distance from a token to the slot it is assigned to.
    pub slot_assign_tolerance: f32,
    /// Max x drift for a row to count as aligned with a neighbour.
    pub alignment_tolerance: f32,
    /// Regions scoring below this are dropped.
    pub min_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    /// Fraction of the window a soft boundary may sit behind its end.
    pub backtrack_ratio: f32,
    /// Concurrent chunk dispatches.
    pub max_in_flight: usize,
    pub dispatch_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Base URL of the legal entity service (`None` disables it).
    pub legal_url: Option<String>,
    /// Base URL of the PII service (`None` disables it).
    pub pii_url: Option<String>,
    pub timeout_secs: u64,
    /// Input ceiling enforced by the PII service.
    pub pii_max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Strict mode blocks below threshold; lenient mode asks for review.
    pub strict: bool,
    pub threshold: f32,
    pub min_output_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Zero disables the detection cache.
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { row_tolerance: 2.5 }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            slot_merge_threshold: 15.0,
            slot_assign_tolerance: 20.0,
            alignment_tolerance: 5.0,
            min_confidence: 0.5,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 30_000,
            overlap_chars: 500,
            backtrack_ratio: 0.2,
            max_in_flight: 4,
            dispatch_delay_ms: 50,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            legal_url: None,
            pii_url: None,
            timeout_secs: 12,
            pii_max_chars: 30_000,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            strict: true,
            threshold: 0.7,
            min_output_chars: 20,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid engine config in {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override selected keys from `LEXGUARD_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("LEXGUARD_MAX_CHUNK_CHARS") {
            self.chunking.max_chunk_chars = v;
        }
        if let Some(v) = env_parse::<usize>("LEXGUARD_OVERLAP_CHARS") {
            self.chunking.overlap_chars = v;
        }
        if let Ok(v) = std::env::var("LEXGUARD_STRICT") {
            self.risk.strict = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("LEXGUARD_LEGAL_URL") {
            self.detectors.legal_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("LEXGUARD_PII_URL") {
            self.detectors.pii_url = Some(v).filter(|s| !s.is_empty());
        }
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.layout.row_tolerance <= 0.0 {
            return invalid("layout.row_tolerance must be positive");
        }
        if self.table.slot_merge_threshold <= 0.0
            || self.table.slot_assign_tolerance <= 0.0
            || self.table.alignment_tolerance <= 0.0
        {
            return invalid("table tolerances must be positive");
        }
        if !(0.0..=1.0).contains(&self.table.min_confidence) {
            return invalid("table.min_confidence must be within [0, 1]");
        }
        if self.chunking.max_chunk_chars == 0 {
            return invalid("chunking.max_chunk_chars must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.chunking.backtrack_ratio) {
            return invalid("chunking.backtrack_ratio must be within [0, 1]");
        }
        if self.chunking.max_in_flight == 0 {
            return invalid("chunking.max_in_flight must be at least 1");
        }
        if self.detectors.timeout_secs == 0 {
            return invalid("detectors.timeout_secs must be at least 1");
        }
        if self.detectors.pii_max_chars == 0 {
            return invalid("detectors.pii_max_chars must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.risk.threshold) {
            return invalid("risk.threshold must be within [0, 1]");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
