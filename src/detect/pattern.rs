//! In-process pattern detector.
//!
//! Regex families for the entity kinds legal intake cares about. Each match
//! gets the family's base confidence from the [`ConfidenceModel`], so bare
//! capitalised names (0.6) lose to the same text matched by a stronger
//! family or a remote model.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::confidence::{ConfidenceModel, DefaultConfidenceModel};
use super::{Category, EntityDetector, EntitySpan};
use crate::error::DetectError;
use crate::text::CharMap;

/// Pattern family. Each maps to one label and base confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternFamily {
    Email,
    NiNumber,
    Currency,
    NumericDate,
    LongDate,
    NeutralCitation,
    CaseNumber,
    Organization,
    TitledName,
    LegalRole,
    Phone,
    Postcode,
    CapitalisedName,
}

impl PatternFamily {
    fn label(self) -> &'static str {
        match self {
            PatternFamily::Email => "EMAIL",
            PatternFamily::NiNumber => "NI_NUMBER",
            PatternFamily::Currency => "FINANCIAL_AMOUNT",
            PatternFamily::NumericDate | PatternFamily::LongDate => "DATE",
            PatternFamily::NeutralCitation | PatternFamily::CaseNumber => "CASE_REFERENCE",
            PatternFamily::Organization => "ORGANIZATION",
            PatternFamily::TitledName | PatternFamily::CapitalisedName => "PERSON",
            PatternFamily::LegalRole => "LEGAL_ROLE",
            PatternFamily::Phone => "PHONE",
            PatternFamily::Postcode => "POSTCODE",
        }
    }

    fn category(self) -> Category {
        match self {
            PatternFamily::Email => Category::Email,
            PatternFamily::NiNumber => Category::IdNumber,
            PatternFamily::Currency => Category::Financial,
            PatternFamily::NumericDate | PatternFamily::LongDate => Category::Date,
            PatternFamily::NeutralCitation | PatternFamily::CaseNumber => Category::CaseRef,
            PatternFamily::Organization => Category::Organization,
            PatternFamily::TitledName | PatternFamily::CapitalisedName => Category::Person,
            PatternFamily::LegalRole => Category::LegalRole,
            PatternFamily::Phone => Category::Phone,
            PatternFamily::Postcode => Category::Location,
        }
    }
}

const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

static FAMILIES: LazyLock<Vec<(PatternFamily, Regex)>> = LazyLock::new(|| {
    let table = [
        (
            PatternFamily::Email,
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}".to_string(),
        ),
        (
            PatternFamily::NiNumber,
            r"\b[A-CEGHJ-PR-TW-Z][A-CEGHJ-NPR-TW-Z] ?\d{2} ?\d{2} ?\d{2} ?[A-D]\b".to_string(),
        ),
        (
            PatternFamily::Currency,
            r"(?:[£$€]\s?|\b(?:GBP|USD|EUR)\s?)(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?(?:\s?(?:million|billion|bn)\b|m\b)?"
                .to_string(),
        ),
        (
            PatternFamily::NumericDate,
            r"\b\d{1,2}[/.-]\d{1,2}[/.-](?:\d{4}|\d{2})\b".to_string(),
        ),
        (
            PatternFamily::LongDate,
            format!(
                r"\b(?:\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{MONTHS})\s+\d{{4}}|(?:{MONTHS})\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}})\b"
            ),
        ),
        (
            PatternFamily::NeutralCitation,
            r"\[\d{4}\]\s+[A-Z]{2,6}(?:\s+(?:Civ|Crim|Admin|Ch|QB|KB|Fam|Comm|TCC|IPEC|Pat))?\s+\d+(?:\s+\([A-Za-z]+\))?"
                .to_string(),
        ),
        (PatternFamily::CaseNumber, r"\b[A-Z]{2,4}\d{4}/\d+\b".to_string()),
        (
            PatternFamily::Organization,
            r"\b(?:[A-Z][A-Za-z&'-]*[ \t]+){1,4}(?:Ltd|Limited|LLP|PLC|plc|Inc|Corporation|Corp)\b\.?"
                .to_string(),
        ),
        (
            PatternFamily::TitledName,
            r"\b(?:Mr|Mrs|Ms|Miss|Dr|Sir|Dame|Lord|Lady|Justice)\.?[ \t]+[A-Z][a-z]+(?:[-'][A-Z][a-z]+)?(?:[ \t]+[A-Z][a-z]+(?:[-'][A-Z][a-z]+)?)?"
                .to_string(),
        ),
        (
            PatternFamily::LegalRole,
            format!(r"\b(?:{})\b", ROLE_WORDS.join("|")),
        ),
        (
            PatternFamily::Phone,
            r"(?:\+44\s?(?:\(0\)\s?)?\d{2,4}|\(?\b0\d{2,4}\)?)[\s-]?\d{3,4}[\s-]?\d{3,4}\b".to_string(),
        ),
        (
            PatternFamily::Postcode,
            r"\b[A-Z]{1,2}\d[A-Z\d]?[ \t]*\d[A-Z]{2}\b".to_string(),
        ),
        (
            PatternFamily::CapitalisedName,
            r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)+\b".to_string(),
        ),
    ];

    table
        .into_iter()
        .map(|(family, pattern)| (family, Regex::new(&pattern).expect("static regex")))
        .collect()
});

/// Roles matched by [`PatternFamily::LegalRole`]. Never part of a name.
const ROLE_WORDS: &[&str] = &["QC", "KC", "Solicitor", "Barrister", "Judge"];

/// Bare names are two or three words.
const NAME_WORDS: std::ops::RangeInclusive<usize> = 2..=3;

/// Words that start sentences or headings, or titles handled by
/// [`PatternFamily::TitledName`].
const LEADING_STOPWORDS: &[&str] = &[
    "A", "An", "And", "As", "At", "But", "By", "Between", "Dame", "Dated", "Dear", "Dr", "For",
    "From", "If", "In", "Justice", "Lady", "Lord", "Miss", "Mr", "Mrs", "Ms", "Of", "On", "Or",
    "Per", "Pursuant", "Re", "Signed", "Sir", "The", "This", "That", "These", "Those", "To",
    "Under", "Upon", "When", "Where", "Whereas", "With",
];

/// Words that mark a capitalised run as a place, document or party label.
const NON_NAME_WORDS: &[&str] = &[
    "Act", "Agreement", "Amount", "Appeal", "Avenue", "Bank", "Chambers", "Claimant", "Clause",
    "Court", "Defendant", "Division", "England", "Fee", "Holdings", "House", "Item", "Kingdom",
    "Lane", "Limited", "Ltd", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
    "Sunday", "Order", "Part", "Road", "Schedule", "Section", "Street", "Total", "Tribunal",
    "United", "Wales",
];

/// Regex entity detector. Always available, unbounded input.
pub struct PatternDetector {
    model: Arc<dyn ConfidenceModel>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(Arc::new(DefaultConfidenceModel))
    }
}

impl PatternDetector {
    pub fn new(model: Arc<dyn ConfidenceModel>) -> Self {
        Self { model }
    }

    /// Run every family over `text`. Spans are char offsets into `text`.
    pub fn scan(&self, text: &str) -> Vec<EntitySpan> {
        let map = CharMap::new(text);
        let mut spans = Vec::new();

        for (family, regex) in FAMILIES.iter() {
            for m in regex.find_iter(text) {
                let ranges: Vec<(usize, usize)> = match family {
                    PatternFamily::CapitalisedName => name_segments(m.as_str())
                        .into_iter()
                        .map(|(s, e)| (m.start() + s, m.start() + e))
                        .collect(),
                    PatternFamily::Organization => {
                        trim_leading_stopwords(text, m.start(), m.end()).into_iter().collect()
                    }
                    _ => vec![(m.start(), m.end())],
                };
                for (start, end) in ranges {
                    spans.push(EntitySpan {
                        text: text[start..end].to_string(),
                        label: family.label().to_string(),
                        category: family.category(),
                        start: map.to_char(start),
                        end: map.to_char(end),
                        page: None,
                        confidence: self.model.base(*family),
                        source: "pattern".to_string(),
                    });
                }
            }
        }

        spans
    }
}

/// Drop leading stopwords from an organization match. Byte range of what
/// is left, or `None` if only the suffix remains.
fn trim_leading_stopwords(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let run = &text[start..end];
    let mut offset = 0;
    let mut words = run.split_whitespace().peekable();

    while let Some(word) = words.peek() {
        if !LEADING_STOPWORDS.contains(word) {
            break;
        }
        offset = run[offset..].find(word).map_or(offset, |i| offset + i + word.len());
        words.next();
    }

    // Suffix plus at least one name word.
    if words.count() < 2 {
        return None;
    }
    let lead = run[offset..].len() - run[offset..].trim_start().len();
    Some((start + offset + lead, end))
}

fn breaks_name(word: &str) -> bool {
    LEADING_STOPWORDS.contains(&word) || NON_NAME_WORDS.contains(&word) || ROLE_WORDS.contains(&word)
}

/// Split a capitalised run at stopwords, titles, roles and non-name words.
///
/// Returns byte ranges (relative to `run`) of the stretches left over that
/// have a name's word count.
fn name_segments(run: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    // (start, end, words) of the stretch being built.
    let mut current: Option<(usize, usize, usize)> = None;
    let mut pos = 0;

    let mut close = |current: &mut Option<(usize, usize, usize)>| {
        if let Some((start, end, words)) = current.take() {
            if NAME_WORDS.contains(&words) {
                segments.push((start, end));
            }
        }
    };

    for word in run.split([' ', '\t']) {
        let at = pos;
        pos += word.len() + 1;
        if word.is_empty() {
            continue;
        }
        if breaks_name(word) {
            close(&mut current);
            continue;
        }
        current = Some(match current {
            Some((start, _, words)) => (start, at + word.len(), words + 1),
            None => (at, at + word.len(), 1),
        });
    }
    close(&mut current);

    segments
}

#[async_trait]
impl EntityDetector for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn detect(&self, text: &str) -> Result<Vec<EntitySpan>, DetectError> {
        Ok(self.scan(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<EntitySpan> {
        PatternDetector::default().scan(text)
    }

    fn labels(text: &str) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = scan(text)
            .into_iter()
            .map(|s| (s.label, s.text))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn end_to_end_sentence_finds_three_entities() {
        let spans = scan("John Smith signed the agreement on 01/02/2023 for £50,000");
        let mut found: Vec<(&str, usize, usize)> = spans
            .iter()
            .map(|s| (s.label.as_str(), s.start, s.end))
            .collect();
        found.sort_by_key(|f| f.1);
        assert_eq!(
            found,
            vec![
                ("PERSON", 0, 10),
                ("DATE", 35, 45),
                ("FINANCIAL_AMOUNT", 50, 57),
            ]
        );
    }

    #[test]
    fn offsets_are_chars_not_bytes() {
        let spans = scan("Fee £50,000 payable by John Smith");
        let person = spans.iter().find(|s| s.label == "PERSON").unwrap();
        // '£' is two bytes; char offsets stay aligned with the text.
        assert_eq!((person.start, person.end), (23, 33));
        assert_eq!(crate::text::slice_chars("Fee £50,000 payable by John Smith", 23, 33), "John Smith");
    }

    #[test]
    fn titled_name_outranks_bare_name() {
        let spans = scan("Witness: Mrs Jane Doe");
        let titled = spans.iter().find(|s| s.text == "Mrs Jane Doe").unwrap();
        assert!((titled.confidence - 0.85).abs() < 1e-6);
        let bare = spans.iter().find(|s| s.text == "Jane Doe").unwrap();
        assert!((bare.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn leading_stopword_is_trimmed() {
        assert_eq!(
            labels("The Anna Karlsson statement"),
            vec![("PERSON".to_string(), "Anna Karlsson".to_string())]
        );
    }

    #[test]
    fn party_labels_are_split_off_names() {
        assert_eq!(
            labels("Claimant John Smith"),
            vec![("PERSON".to_string(), "John Smith".to_string())]
        );
        assert_eq!(
            labels("Defendant Jane Doe"),
            vec![("PERSON".to_string(), "Jane Doe".to_string())]
        );

        let spans = scan("The Claimant John Smith was present at the hearing today.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "John Smith");
        assert_eq!((spans[0].start, spans[0].end), (13, 23));
    }

    #[test]
    fn role_words_are_split_off_names() {
        assert_eq!(
            labels("signed by Solicitor John Smith yesterday."),
            vec![
                ("LEGAL_ROLE".to_string(), "Solicitor".to_string()),
                ("PERSON".to_string(), "John Smith".to_string()),
            ]
        );
        assert_eq!(
            labels("Judge Anna Karlsson presiding"),
            vec![
                ("LEGAL_ROLE".to_string(), "Judge".to_string()),
                ("PERSON".to_string(), "Anna Karlsson".to_string()),
            ]
        );
    }

    #[test]
    fn names_either_side_of_a_label_are_both_found() {
        let found = labels("Between Claimant John Smith And Defendant Jane Doe");
        assert!(found.contains(&("PERSON".to_string(), "John Smith".to_string())));
        assert!(found.contains(&("PERSON".to_string(), "Jane Doe".to_string())));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn court_names_are_not_people() {
        assert!(scan("heard in the High Court today").is_empty());
    }

    #[test]
    fn organization_suffixes() {
        let found = labels("between Acme Holdings Ltd and others");
        assert!(found.contains(&("ORGANIZATION".to_string(), "Acme Holdings Ltd".to_string())));
    }

    #[test]
    fn case_references() {
        let found = labels("see HC2023/000123 and [2023] EWHC 123 (Ch)");
        assert!(found.contains(&("CASE_REFERENCE".to_string(), "HC2023/000123".to_string())));
        assert!(found.contains(&("CASE_REFERENCE".to_string(), "[2023] EWHC 123 (Ch)".to_string())));
    }

    #[test]
    fn long_form_dates() {
        let found = labels("dated 3rd March 2024 and June 5, 2023");
        assert!(found.contains(&("DATE".to_string(), "3rd March 2024".to_string())));
        assert!(found.contains(&("DATE".to_string(), "June 5, 2023".to_string())));
    }

    #[test]
    fn contact_details() {
        let found = labels("write to jane.doe@example.co.uk or call 020 7946 0958");
        assert!(found.contains(&("EMAIL".to_string(), "jane.doe@example.co.uk".to_string())));
        assert!(found.contains(&("PHONE".to_string(), "020 7946 0958".to_string())));
    }

    #[test]
    fn uk_identifiers() {
        let found = labels("NI number AB 12 34 56 C, postcode SW1A 1AA");
        assert!(found.contains(&("NI_NUMBER".to_string(), "AB 12 34 56 C".to_string())));
        assert!(found.contains(&("POSTCODE".to_string(), "SW1A 1AA".to_string())));
    }

    #[test]
    fn legal_roles_are_not_sensitive() {
        let spans = scan("instructed a Barrister");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].category, Category::LegalRole);
        assert!(!spans[0].category.is_sensitive());
    }

    #[test]
    fn currency_without_separators() {
        let found = labels("a sum of GBP 1500.50 was paid");
        assert!(found.contains(&("FINANCIAL_AMOUNT".to_string(), "GBP 1500.50".to_string())));
    }

    #[test]
    fn placeholders_do_not_match() {
        assert!(scan("[PERSON] signed the agreement on [DATE] for [FINANCIAL_AMOUNT]").is_empty());
    }

    #[tokio::test]
    async fn detector_trait_delegates_to_scan() {
        let detector = PatternDetector::default();
        assert!(detector.is_available().await);
        let spans = detector.detect("call 07700 900123").await.unwrap();
        assert_eq!(spans[0].label, "PHONE");
        assert_eq!(spans[0].source, "pattern");
    }

    #[test]
    fn detect_completes_without_a_runtime() {
        let detector = PatternDetector::default();
        let spans = tokio_test::block_on(detector.detect("paid to jane@example.com")).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].label, "EMAIL");
        assert_eq!((spans[0].start, spans[0].end), (8, 24));
    }
}
