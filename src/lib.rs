//! `lexguard` - Entity reconciliation and redaction for legal document intake
//!
//! # Features
//!
//! - **Layout**: Row grouping and table region detection from positioned text
//! - **Detection**: Pattern families plus remote legal/PII services that fail soft
//! - **Chunking**: Overlapping, boundary-aware chunks with bounded concurrency
//! - **Reconciliation**: Confidence-ranked merge, corroboration boosts, cross-chunk dedup
//! - **Risk**: Residual-PII checks and a safe/review/blocked verdict
//!
//! # Example
//!
//! ```rust,no_run
//! use lexguard::{DocumentInput, EngineConfig, IntakePipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = IntakePipeline::with_local_defaults(EngineConfig::default())?;
//!     let output = pipeline
//!         .analyze(&DocumentInput::from_text("John Smith owes £50,000"))
//!         .await;
//!     println!("{} ({:?})", output.redacted_text, output.risk.tier);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chunk;
pub mod config;
pub mod detect;
pub mod error;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod reconcile;
pub mod redact;
pub mod risk;
pub mod text;

pub use cache::{Clock, DetectionCache, ManualClock, SystemClock};
pub use chunk::{CancelFlag, Chunk, ChunkDispatcher, ChunkPlanner};
pub use config::EngineConfig;
pub use detect::{
    Category, ConfidenceModel, DefaultConfidenceModel, DetectorOutcome, DetectorSet, Dialect,
    EntityDetector, EntitySpan, PatternDetector, RemoteDetector,
};
pub use error::{ConfigError, DetectError};
pub use layout::{
    detect_tables, group_rows, PageIndex, PositionedToken, Row, TableKind, TableRegion,
};
pub use logging::init_tracing;
pub use pipeline::{AnalysisOutput, Coverage, DocumentInput, IntakePipeline, Stage};
pub use reconcile::{ReconciledEntity, Reconciler};
pub use redact::redact;
pub use risk::{RiskAssessment, RiskInputs, RiskScorer, RiskTier};

/// Version of lexguard
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
