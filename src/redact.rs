//! Placeholder redaction.

use crate::reconcile::ReconciledEntity;
use crate::text::CharMap;

/// Replace every sensitive entity in `text` with its category placeholder.
///
/// Entities are applied right-to-left so earlier offsets stay valid.
/// Overlapping entities collapse to the one that starts first (longest on
/// a tie). Non-sensitive categories and out-of-range spans are left alone.
pub fn redact(text: &str, entities: &[ReconciledEntity]) -> String {
    let map = CharMap::new(text);
    let len = map.char_len();

    let mut targets: Vec<&ReconciledEntity> = entities
        .iter()
        .filter(|e| e.category.is_sensitive() && e.start < e.end && e.end <= len)
        .collect();
    targets.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut kept: Vec<&ReconciledEntity> = Vec::with_capacity(targets.len());
    for entity in targets {
        if kept.last().is_some_and(|prev| entity.start < prev.end) {
            continue;
        }
        kept.push(entity);
    }

    let mut out = text.to_string();
    for entity in kept.iter().rev() {
        let range = map.to_byte(entity.start)..map.to_byte(entity.end);
        out.replace_range(range, entity.category.placeholder());
    }
    out
}
