//! Row/column grouping of positioned text tokens.
//!
//! Tokens arrive unordered from an upstream text-layer extractor (one text
//! run per token). They are grouped into rows by vertical proximity and
//! ordered left-to-right, which is the input the table detector expects.
//!
//! # Pipeline
//!
//! ```text
//! tokens → sort (page, y desc, x asc) → rows by y tolerance → table regions
//! ```

pub mod table;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub use table::{detect_tables, TableKind, TableRegion};

/// A positioned text run extracted from a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedToken {
    pub text: String,
    /// Left edge in PDF points.
    pub x: f32,
    /// Baseline Y position (bottom-up coordinate system).
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Page index (0-based).
    #[serde(default)]
    pub page: u32,
}

impl PositionedToken {
    /// Right edge in PDF points.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Tokens sharing a baseline within tolerance, ordered by x.
#[derive(Debug, Clone)]
pub struct Row {
    pub page: u32,
    /// Y of the token that opened the row.
    pub y: f32,
    pub tokens: Vec<PositionedToken>,
}

impl Row {
    /// Row text with tokens joined by single spaces.
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Horizontal whitespace between consecutive tokens.
    pub fn gaps(&self) -> Vec<f32> {
        self.tokens
            .windows(2)
            .map(|pair| pair[1].x - pair[0].right())
            .collect()
    }
}

/// Group tokens into rows.
///
/// 1. Sort by page, then Y descending (top-to-bottom), then X ascending.
/// 2. A token joins the current row if its Y is within `row_tolerance` of
///    the row's Y; otherwise it opens a new row.
/// 3. Each row is re-sorted by X.
pub fn group_rows(tokens: &[PositionedToken], row_tolerance: f32) -> Vec<Row> {
    let mut sorted: Vec<&PositionedToken> = tokens
        .iter()
        .filter(|t| !t.text.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal))
            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    });

    let mut rows: Vec<Row> = Vec::new();
    for token in sorted {
        match rows.last_mut() {
            Some(row) if row.page == token.page && (row.y - token.y).abs() <= row_tolerance => {
                row.tokens.push(token.clone());
            }
            _ => rows.push(Row {
                page: token.page,
                y: token.y,
                tokens: vec![token.clone()],
            }),
        }
    }

    for row in &mut rows {
        row.tokens
            .sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    }

    rows
}

/// Char offsets at which each page's text begins, with its page number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageIndex {
    starts: Vec<(usize, u32)>,
}

impl PageIndex {
    /// Pages of plain text split by form feeds, numbered from 0.
    ///
    /// Text without a form feed gets an empty index.
    pub fn from_form_feeds(text: &str) -> Self {
        let breaks = text
            .chars()
            .enumerate()
            .filter(|&(_, c)| c == '\u{c}')
            .map(|(i, _)| i + 1);
        let mut starts = vec![(0, 0)];
        starts.extend(breaks.zip(1u32..));
        if starts.len() == 1 {
            starts.clear();
        }
        Self { starts }
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Page holding char `offset`.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        let i = self.starts.partition_point(|&(start, _)| start <= offset);
        i.checked_sub(1).map(|i| self.starts[i].1)
    }

    /// Highest page number seen.
    pub fn max_page(&self) -> Option<u32> {
        self.starts.iter().map(|&(_, page)| page).max()
    }
}

/// Plain text reconstruction: one line per row, pages separated by form
/// feeds. The index keeps the token page numbers, gaps included.
pub fn rows_to_text(rows: &[Row]) -> (String, PageIndex) {
    let mut out = String::new();
    let mut starts = Vec::new();
    let mut chars = 0;

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            out.push(if row.page == rows[i - 1].page { '\n' } else { '\u{c}' });
            chars += 1;
        }
        if starts.last().is_none_or(|&(_, page)| page != row.page) {
            starts.push((chars, row.page));
        }
        let line = row.text();
        chars += line.chars().count();
        out.push_str(&line);
    }
    (out, PageIndex { starts })
}
