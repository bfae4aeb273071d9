//! Span reconciliation.
//!
//! Two passes turn raw detector spans into a canonical entity list:
//!
//! 1. [`Reconciler::merge_batch`] within one chunk: overlapping spans
//!    collapse to the highest-confidence one, and every other detector that
//!    overlapped it adds a corroboration boost.
//! 2. [`Reconciler::dedup_across_chunks`] between adjacent chunks: an
//!    entity seen twice in the shared overlap region is kept once.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::detect::{Category, ConfidenceModel, EntitySpan};

/// Shorter span must be covered beyond this fraction to count as a
/// cross-chunk duplicate.
const DUPLICATE_OVERLAP: f32 = 0.8;

/// A reconciled entity in document offsets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntity {
    pub text: String,
    pub label: String,
    pub category: Category,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Confidence after corroboration.
    pub confidence: f32,
    /// Confidence of the winning detection alone.
    pub base_confidence: f32,
    /// Every detector that contributed, sorted.
    pub sources: Vec<String>,
    /// At least one other detector agreed.
    pub verified: bool,
    /// Chunk the entity was reconciled in.
    #[serde(skip)]
    pub chunk: usize,
}

impl ReconciledEntity {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Back to a raw span carrying the reconciled confidence.
    pub fn to_span(&self) -> EntitySpan {
        EntitySpan {
            text: self.text.clone(),
            label: self.label.clone(),
            category: self.category,
            start: self.start,
            end: self.end,
            page: self.page,
            confidence: self.confidence,
            source: self.sources.first().cloned().unwrap_or_default(),
        }
    }
}

/// Chunk position used for cross-chunk dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// `[start, end)` ranges intersect.
pub fn overlaps(a: &EntitySpan, b: &EntitySpan) -> bool {
    a.start < b.end && b.start < a.end
}

fn overlap_len(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> usize {
    a_end.min(b_end).saturating_sub(a_start.max(b_start))
}

pub struct Reconciler {
    model: Arc<dyn ConfidenceModel>,
}

impl Reconciler {
    pub fn new(model: Arc<dyn ConfidenceModel>) -> Self {
        Self { model }
    }

    /// Reconcile all raw spans of one chunk.
    ///
    /// Spans are accepted in descending confidence order; on a tie the one
    /// that arrived first wins. A span overlapping an accepted one is
    /// discarded and only corroborates. Each accepted span gains one boost
    /// per distinct other source that overlapped it, capped at the model's
    /// ceiling. Output is ordered by position.
    pub fn merge_batch(&self, raw: &[EntitySpan], chunk: usize) -> Vec<ReconciledEntity> {
        let mut order: Vec<usize> = (0..raw.len()).collect();
        order.sort_by(|&a, &b| {
            raw[b]
                .confidence
                .partial_cmp(&raw[a].confidence)
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut accepted: Vec<usize> = Vec::new();
        for i in order {
            if accepted.iter().all(|&a| !overlaps(&raw[a], &raw[i])) {
                accepted.push(i);
            }
        }
        accepted.sort_by_key(|&i| (raw[i].start, raw[i].end));

        accepted
            .into_iter()
            .map(|a| {
                let winner = &raw[a];
                let corroborators: BTreeSet<&str> = raw
                    .iter()
                    .enumerate()
                    .filter(|&(j, s)| j != a && s.source != winner.source && overlaps(s, winner))
                    .map(|(_, s)| s.source.as_str())
                    .collect();

                let mut sources: BTreeSet<String> =
                    corroborators.iter().map(|s| (*s).to_string()).collect();
                sources.insert(winner.source.clone());

                ReconciledEntity {
                    text: winner.text.clone(),
                    label: winner.label.clone(),
                    category: winner.category,
                    start: winner.start,
                    end: winner.end,
                    page: winner.page,
                    confidence: self
                        .model
                        .corroborated(winner.confidence, corroborators.len()),
                    base_confidence: winner.confidence,
                    sources: sources.into_iter().collect(),
                    verified: !corroborators.is_empty(),
                    chunk,
                }
            })
            .collect()
    }

    /// Drop duplicates found in the overlap of adjacent chunks.
    ///
    /// For each pair of consecutive chunks, entities of the later chunk that
    /// touch the shared region are compared with every surviving entity of
    /// earlier chunks touching it. Same label plus overlap above 80% of
    /// the shorter span means duplicate: the higher confidence survives,
    /// then the longer span, then the earlier chunk. The survivor inherits
    /// the loser's sources.
    pub fn dedup_across_chunks(
        &self,
        mut entities: Vec<ReconciledEntity>,
        chunks: &[ChunkBounds],
    ) -> Vec<ReconciledEntity> {
        let mut dropped = vec![false; entities.len()];

        for pair in chunks.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let (region_start, region_end) = (next.start, prev.end);
            if next.index != prev.index + 1 || region_start >= region_end {
                continue;
            }

            let in_region = |keep: &dyn Fn(usize) -> bool| -> Vec<usize> {
                entities
                    .iter()
                    .enumerate()
                    .filter(|(i, e)| {
                        !dropped[*i]
                            && keep(e.chunk)
                            && overlap_len(e.start, e.end, region_start, region_end) > 0
                    })
                    .map(|(i, _)| i)
                    .collect()
            };
            // Survivors of earlier pairs stand in for the copies they absorbed.
            let left = in_region(&|chunk| chunk <= prev.index);
            let right = in_region(&|chunk| chunk == next.index);

            for &l in &left {
                for &r in &right {
                    if dropped[l] || dropped[r] || !is_duplicate(&entities[l], &entities[r]) {
                        continue;
                    }
                    let (winner, loser) = if prefer_left(&entities[l], &entities[r]) {
                        (l, r)
                    } else {
                        (r, l)
                    };
                    dropped[loser] = true;
                    absorb(&mut entities, winner, loser);
                    tracing::trace!(
                        label = %entities[winner].label,
                        start = entities[winner].start,
                        "dropped cross-chunk duplicate"
                    );
                }
            }
        }

        let mut kept: Vec<ReconciledEntity> = entities
            .into_iter()
            .zip(dropped)
            .filter_map(|(e, gone)| (!gone).then_some(e))
            .collect();
        kept.sort_by_key(|e| (e.start, e.end));
        kept
    }
}

fn is_duplicate(a: &ReconciledEntity, b: &ReconciledEntity) -> bool {
    if a.label != b.label {
        return false;
    }
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return false;
    }
    let shared = overlap_len(a.start, a.end, b.start, b.end);
    shared as f32 > DUPLICATE_OVERLAP * shorter as f32
}

/// Whether `left` (earlier chunk) survives against `right`.
fn prefer_left(left: &ReconciledEntity, right: &ReconciledEntity) -> bool {
    match left.confidence.partial_cmp(&right.confidence) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Less) => false,
        _ => left.len() >= right.len(),
    }
}

fn absorb(entities: &mut [ReconciledEntity], winner: usize, loser: usize) {
    let extra: Vec<String> = entities[loser]
        .sources
        .iter()
        .filter(|s| !entities[winner].sources.contains(s))
        .cloned()
        .collect();
    if extra.is_empty() {
        return;
    }
    let target = &mut entities[winner];
    target.sources.extend(extra);
    target.sources.sort();
    target.verified = true;
}
