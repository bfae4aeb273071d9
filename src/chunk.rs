//! Chunk planning and bounded-concurrency dispatch.
//!
//! Long documents are split into overlapping chunks no larger than the
//! smallest detector input ceiling. Each chunk ends on a soft boundary
//! (sentence end, then newline, then space) when one exists in the last
//! `backtrack_ratio` of the window, so entities are rarely cut in half.
//! The overlap lets a cut entity appear whole in the next chunk, where
//! cross-chunk dedup keeps one copy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::ChunkingConfig;
use crate::detect::{DetectorSet, EntityDetector, EntitySpan};
use crate::text::{slice_chars, CharMap};

/// A window over the document. Offsets are document char offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Rewrite chunk-local spans into document offsets.
    pub fn globalize(&self, spans: Vec<EntitySpan>) -> Vec<EntitySpan> {
        spans.into_iter().map(|s| s.shifted(self.start)).collect()
    }
}

/// Splits text into overlapping, boundary-aware chunks.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    max_chars: usize,
    overlap: usize,
    backtrack_ratio: f32,
}

impl ChunkPlanner {
    pub fn new(max_chars: usize, overlap: usize, backtrack_ratio: f32) -> Self {
        Self {
            max_chars: max_chars.max(1),
            overlap,
            backtrack_ratio: backtrack_ratio.clamp(0.0, 1.0),
        }
    }

    /// Planner for `config`, capped at a detector input ceiling.
    pub fn from_config(config: &ChunkingConfig, ceiling: Option<usize>) -> Self {
        let max = ceiling.map_or(config.max_chunk_chars, |c| c.min(config.max_chunk_chars));
        Self::new(max, config.overlap_chars, config.backtrack_ratio)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Plan chunks covering `text`.
    ///
    /// A document within `max_chars` is a single chunk. Otherwise each
    /// chunk starts `overlap` chars before the previous end, unless that
    /// would not advance past the previous start, in which case it starts
    /// at the previous end.
    pub fn plan(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let map = CharMap::new(text);
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let window_end = (start + self.max_chars).min(total);
            let end = if window_end < total {
                self.soft_boundary(&chars, start, window_end)
                    .unwrap_or(window_end)
            } else {
                total
            };

            chunks.push(Chunk {
                index: chunks.len(),
                start,
                end,
                text: text[map.to_byte(start)..map.to_byte(end)].to_string(),
            });

            if end >= total {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        tracing::debug!(
            chunks = chunks.len(),
            chars = total,
            max = self.max_chars,
            "planned chunks"
        );
        chunks
    }

    /// Cut position after the best soft boundary in the backtrack window.
    fn soft_boundary(&self, chars: &[char], start: usize, window_end: usize) -> Option<usize> {
        let window = window_end - start;
        let backtrack = (window as f32 * self.backtrack_ratio) as usize;
        let floor = (window_end - backtrack).max(start + 1);

        // Sentence end: terminator followed by whitespace.
        last_cut(floor, window_end, |i| {
            matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
        })
        .or_else(|| last_cut(floor, window_end, |i| chars[i] == '\n'))
        .or_else(|| last_cut(floor, window_end, |i| chars[i].is_whitespace()))
    }
}

/// Largest cut in `[floor, window_end]` whose preceding char satisfies `pred`.
fn last_cut(floor: usize, window_end: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (floor..=window_end).rev().find(|&cut| pred(cut - 1))
}

/// Cooperative cancellation shared with callers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Detector output for one chunk, in document offsets.
#[derive(Debug)]
pub struct ChunkResult {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub spans: Vec<EntitySpan>,
    /// `(detector, reason)` for each failed call.
    pub failures: Vec<(String, String)>,
}

/// Outcome of dispatching a chunk plan.
#[derive(Debug)]
pub struct DispatchReport {
    /// Completed chunks, ordered by index.
    pub results: Vec<ChunkResult>,
    pub chunks_total: usize,
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn chunks_processed(&self) -> usize {
        self.results.len()
    }
}

/// Runs detectors over chunks with at most `max_in_flight` concurrent
/// chunks and a fixed delay between dispatches.
#[derive(Debug, Clone)]
pub struct ChunkDispatcher {
    max_in_flight: usize,
    delay: Duration,
}

impl ChunkDispatcher {
    pub fn new(max_in_flight: usize, delay: Duration) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            delay,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(
            config.max_in_flight,
            Duration::from_millis(config.dispatch_delay_ms),
        )
    }

    /// Dispatch every chunk through `active` detectors.
    ///
    /// `cancel` is checked before each dispatch. Chunks already in flight
    /// run to completion; undispatched chunks are skipped.
    pub async fn dispatch(
        &self,
        chunks: Vec<Chunk>,
        detectors: Arc<DetectorSet>,
        active: Arc<Vec<Arc<dyn EntityDetector>>>,
        cancel: &CancelFlag,
    ) -> DispatchReport {
        let chunks_total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut handles: Vec<JoinHandle<ChunkResult>> = Vec::with_capacity(chunks_total);
        let mut cancelled = false;

        for chunk in chunks {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if chunk.index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            // Waiting for a permit can take a while; re-check.
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let detectors = Arc::clone(&detectors);
            let active = Arc::clone(&active);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_chunk(&detectors, &active, chunk).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!("chunk task failed: {e}"),
            }
        }
        results.sort_by_key(|r| r.index);

        if cancelled {
            tracing::info!(
                processed = results.len(),
                total = chunks_total,
                "dispatch cancelled"
            );
        }

        DispatchReport {
            results,
            chunks_total,
            cancelled,
        }
    }
}

async fn run_chunk(
    detectors: &DetectorSet,
    active: &[Arc<dyn EntityDetector>],
    chunk: Chunk,
) -> ChunkResult {
    let outcomes = detectors.detect_all(active, &chunk.text).await;

    let mut spans = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        if let Some(reason) = outcome.failure {
            failures.push((outcome.detector, reason));
        }
        spans.extend(chunk.globalize(outcome.spans));
    }

    for span in &mut spans {
        span.text = slice_chars(&chunk.text, span.start - chunk.start, span.end - chunk.start)
            .to_string();
    }

    tracing::debug!(
        chunk = chunk.index,
        spans = spans.len(),
        failures = failures.len(),
        "chunk analysed"
    );

    ChunkResult {
        index: chunk.index,
        start: chunk.start,
        end: chunk.end,
        spans,
        failures,
    }
}
