use std::sync::Arc;

use async_trait::async_trait;
use lexguard::{
    CancelFlag, Category, DefaultConfidenceModel, DetectError, DetectorSet, DocumentInput,
    EngineConfig, EntityDetector, EntitySpan, IntakePipeline, PatternDetector, PositionedToken,
    RiskTier, Stage, TableKind,
};

const SENTENCE: &str = "John Smith signed the agreement on 01/02/2023 for £50,000";

fn local(config: EngineConfig) -> IntakePipeline {
    IntakePipeline::with_local_defaults(config).unwrap()
}

#[tokio::test]
async fn sentence_is_redacted_end_to_end() {
    let out = local(EngineConfig::default())
        .analyze(&DocumentInput::from_text(SENTENCE))
        .await;

    assert_eq!(out.stage, Stage::Complete);
    let found: Vec<(&str, usize, usize)> = out
        .entities
        .iter()
        .map(|e| (e.label.as_str(), e.start, e.end))
        .collect();
    assert_eq!(
        found,
        vec![("PERSON", 0, 10), ("DATE", 35, 45), ("FINANCIAL_AMOUNT", 50, 57)]
    );
    assert_eq!(
        out.redacted_text,
        "[PERSON] signed the agreement on [DATE] for [FINANCIAL_AMOUNT]"
    );
    assert_eq!(out.risk.tier, RiskTier::Safe);
}

#[tokio::test]
async fn entity_in_chunk_overlap_is_reported_once() {
    let mut config = EngineConfig::default();
    config.chunking.max_chunk_chars = 100;
    config.chunking.overlap_chars = 30;
    config.chunking.dispatch_delay_ms = 0;

    // "John Smith" sits at 70..80, inside both of the first two chunks.
    let text = format!("{} John Smith {}", "a".repeat(69), "b".repeat(200));
    let out = local(config).analyze(&DocumentInput::from_text(text)).await;

    assert!(out.coverage.chunks_total >= 2);
    let people: Vec<_> = out.entities.iter().filter(|e| e.label == "PERSON").collect();
    assert_eq!(people.len(), 1);
    assert_eq!((people[0].start, people[0].end), (70, 80));
    assert!(out.redacted_text.contains(" [PERSON] "));
}

#[tokio::test]
async fn entity_in_three_overlapping_chunks_is_reported_once() {
    let mut config = EngineConfig::default();
    config.chunking.max_chunk_chars = 40;
    config.chunking.overlap_chars = 30;
    config.chunking.backtrack_ratio = 0.0;
    config.chunking.dispatch_delay_ms = 0;

    // Chunks 0..40, 10..50 and 20..60 all hold "John Smith" at 25..35.
    let text = format!("{} John Smith {}", "a".repeat(24), "b".repeat(100));
    let out = local(config).analyze(&DocumentInput::from_text(text)).await;

    assert!(out.coverage.chunks_total >= 3);
    let people: Vec<(usize, usize)> = out
        .entities
        .iter()
        .filter(|e| e.label == "PERSON")
        .map(|e| (e.start, e.end))
        .collect();
    assert_eq!(people, vec![(25, 35)]);
    assert_eq!(out.redacted_text.matches("[PERSON]").count(), 1);
}

#[tokio::test]
async fn hard_cut_through_a_name_keeps_the_full_span() {
    let mut config = EngineConfig::default();
    config.chunking.max_chunk_chars = 40;
    config.chunking.overlap_chars = 15;
    config.chunking.backtrack_ratio = 0.0;
    config.chunking.dispatch_delay_ms = 0;

    // The first chunk ends at 40, between "Sm" and "ith".
    let text = format!("{} John Smith {}", "a".repeat(32), "b".repeat(100));
    let out = local(config).analyze(&DocumentInput::from_text(text)).await;

    assert!(out.coverage.chunks_total > 1);
    let people: Vec<_> = out.entities.iter().filter(|e| e.label == "PERSON").collect();
    assert_eq!(people.len(), 1);
    assert_eq!((people[0].start, people[0].end), (33, 43));
    assert_eq!(people[0].text, "John Smith");
    assert_eq!(
        out.redacted_text,
        format!("{} [PERSON] {}", "a".repeat(32), "b".repeat(100))
    );
}

#[tokio::test]
async fn party_and_role_labels_do_not_hide_names() {
    let pipeline = local(EngineConfig::default());

    let out = pipeline
        .analyze(&DocumentInput::from_text(
            "The Claimant John Smith was present at the hearing today.",
        ))
        .await;
    assert_eq!(
        out.redacted_text,
        "The Claimant [PERSON] was present at the hearing today."
    );
    assert!(out.entities.iter().any(|e| e.text == "John Smith"));

    let out = pipeline
        .analyze(&DocumentInput::from_text(
            "The contract was signed by Solicitor John Smith yesterday.",
        ))
        .await;
    assert_eq!(
        out.redacted_text,
        "The contract was signed by Solicitor [PERSON] yesterday."
    );
    assert!(out.entities.iter().any(|e| e.label == "LEGAL_ROLE"));
}

#[tokio::test]
async fn offsets_stay_inside_long_documents() {
    let mut config = EngineConfig::default();
    config.chunking.max_chunk_chars = 120;
    config.chunking.overlap_chars = 25;
    config.chunking.dispatch_delay_ms = 0;

    let text = "On 3rd March 2024 Mrs Jane Doe paid £1,250 to Acme Holdings Ltd. ".repeat(12);
    let len = text.chars().count();
    let out = local(config).analyze(&DocumentInput::from_text(text.clone())).await;

    assert!(out.coverage.chunks_total > 1);
    assert!(out.entities.iter().all(|e| e.start < e.end && e.end <= len));
    for pair in out.entities.windows(2) {
        assert!(pair[0].end <= pair[1].start, "entities overlap: {pair:?}");
    }
    // Every repetition of each entity survives exactly once.
    let people = out.entities.iter().filter(|e| e.category == Category::Person).count();
    assert_eq!(people, 12);
    assert!(!out.redacted_text.contains("Jane Doe"));
}

#[tokio::test]
async fn tables_are_reported_with_entities() {
    let cell = |text: &str, x: f32, y: f32| PositionedToken {
        text: text.to_string(),
        x,
        y,
        width: text.chars().count() as f32 * 5.0,
        height: 10.0,
        page: 0,
    };
    let tokens = vec![
        cell("Item", 10.0, 700.0),
        cell("Amount", 200.0, 700.0),
        cell("Court fee", 10.0, 685.0),
        cell("£1,200", 200.0, 685.0),
        cell("Counsel", 10.0, 670.0),
        cell("£4,500", 200.0, 670.0),
    ];
    let input = DocumentInput::from_text("Item Amount\nCourt fee £1,200\nCounsel £4,500")
        .with_tokens(tokens);
    let out = local(EngineConfig::default()).analyze(&input).await;

    assert_eq!(out.tables.len(), 1);
    assert_eq!(out.tables[0].kind, TableKind::Financial);
    assert_eq!(out.tables[0].rows.len(), 2);
    assert_eq!(
        out.entities.iter().filter(|e| e.label == "FINANCIAL_AMOUNT").count(),
        2
    );
}

/// Sets the cancel flag during its first call.
struct CancelOnFirstCall {
    cancel: CancelFlag,
}

#[async_trait]
impl EntityDetector for CancelOnFirstCall {
    fn name(&self) -> &str {
        "canceller"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn detect(&self, _text: &str) -> Result<Vec<EntitySpan>, DetectError> {
        self.cancel.cancel();
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn cancellation_returns_partial_result() {
    let cancel = CancelFlag::new();
    let detectors = DetectorSet::new(
        vec![
            Arc::new(PatternDetector::default()),
            Arc::new(CancelOnFirstCall {
                cancel: cancel.clone(),
            }),
        ],
        Arc::new(DefaultConfidenceModel),
    );

    let mut config = EngineConfig::default();
    config.chunking.max_chunk_chars = 50;
    config.chunking.overlap_chars = 0;
    config.chunking.max_in_flight = 1;
    config.chunking.dispatch_delay_ms = 0;
    let pipeline = IntakePipeline::new(config, detectors);

    let text = "John Smith signed. ".repeat(20);
    let out = pipeline
        .analyze_with_cancel(&DocumentInput::from_text(text), &cancel)
        .await;

    assert_eq!(out.stage, Stage::Complete);
    assert!(out.coverage.cancelled);
    assert_eq!(out.coverage.chunks_processed, 1);
    assert!(out.coverage.chunks_total > 1);
    assert!(out.risk.notes.iter().any(|n| n.contains("partial coverage")));
    assert!(!out.entities.is_empty());
}

#[tokio::test]
async fn rerun_is_stable() {
    let pipeline = local(EngineConfig::default());
    let input = DocumentInput::from_text(SENTENCE);
    let first = pipeline.analyze(&input).await;
    let second = pipeline.analyze(&input).await;
    assert_eq!(first.entities, second.entities);
    assert_eq!(first.redacted_text, second.redacted_text);
}

#[tokio::test]
async fn chunk_size_above_length_matches_default_run() {
    let text = "Between Acme Holdings Ltd and Mr John Smith, dated 3rd March 2024.";
    let mut tight = EngineConfig::default();
    tight.chunking.max_chunk_chars = text.chars().count() + 1;

    let input = DocumentInput::from_text(text);
    let default_run = local(EngineConfig::default()).analyze(&input).await;
    let tight_run = local(tight).analyze(&input).await;

    assert_eq!(tight_run.coverage.chunks_total, 1);
    assert_eq!(default_run.entities, tight_run.entities);
}

#[tokio::test]
async fn empty_document_is_blocked() {
    let out = local(EngineConfig::default())
        .analyze(&DocumentInput::default())
        .await;
    assert_eq!(out.stage, Stage::Error);
    assert_eq!(out.risk.tier, RiskTier::Blocked);
    assert_eq!(out.coverage.chunks_total, 0);
}
