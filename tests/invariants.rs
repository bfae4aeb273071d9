use std::sync::Arc;

use lexguard::{
    redact, Category, ChunkPlanner, DefaultConfidenceModel, EntitySpan, Reconciler,
};
use proptest::prelude::*;

fn raw_span(start: usize, len: usize, conf: f32, source: usize, label: usize) -> EntitySpan {
    let labels = ["PERSON", "DATE", "ORGANIZATION"];
    let categories = [Category::Person, Category::Date, Category::Organization];
    EntitySpan {
        text: "x".repeat(len),
        label: labels[label].to_string(),
        category: categories[label],
        start,
        end: start + len,
        page: None,
        confidence: conf,
        source: format!("detector-{source}"),
    }
}

fn span_strategy() -> impl Strategy<Value = EntitySpan> {
    (0usize..200, 1usize..20, 0.0f32..0.99, 0usize..3, 0usize..3)
        .prop_map(|(start, len, conf, source, label)| raw_span(start, len, conf, source, label))
}

proptest! {
    #[test]
    fn chunks_cover_text_without_gaps(
        text in "[a-z .\n]{0,600}",
        max in 5usize..120,
        overlap in 0usize..60,
    ) {
        let chunks = ChunkPlanner::new(max, overlap, 0.2).plan(&text);
        let len = text.chars().count();

        if len == 0 {
            prop_assert!(chunks.is_empty());
        } else {
            prop_assert_eq!(chunks[0].start, 0);
            prop_assert_eq!(chunks.last().map(|c| c.end), Some(len));
        }
        for chunk in &chunks {
            prop_assert!(chunk.start < chunk.end);
            prop_assert!(chunk.len() <= max);
            prop_assert_eq!(chunk.text.chars().count(), chunk.len());
        }
        for pair in chunks.windows(2) {
            prop_assert!(pair[1].start > pair[0].start);
            prop_assert!(pair[1].start <= pair[0].end);
            prop_assert!(pair[1].start + overlap >= pair[0].end);
        }
    }

    #[test]
    fn merged_spans_never_overlap_and_stay_bounded(spans in prop::collection::vec(span_strategy(), 0..25)) {
        let merged = Reconciler::new(Arc::new(DefaultConfidenceModel)).merge_batch(&spans, 0);

        for pair in merged.windows(2) {
            prop_assert!(pair[0].end <= pair[1].start);
        }
        for entity in &merged {
            prop_assert!(entity.confidence >= entity.base_confidence);
            prop_assert!(entity.confidence <= 0.99 + 1e-6);
        }
    }

    #[test]
    fn redaction_removes_every_entity_region(spans in prop::collection::vec(span_strategy(), 1..10)) {
        let text = "a".repeat(230);
        let merged = Reconciler::new(Arc::new(DefaultConfidenceModel)).merge_batch(&spans, 0);
        let redacted = redact(&text, &merged);

        let covered: usize = merged.iter().map(|e| e.len()).sum();
        let placeholders: usize = merged.iter().map(|e| e.category.placeholder().len()).sum();
        prop_assert_eq!(redacted.len(), text.len() - covered + placeholders);
    }
}
