//! Table region detection from grouped rows.
//!
//! The algorithm:
//!
//! 1. Mark candidate rows: two or more tokens plus regular gaps, alignment
//!    with a neighbour (±2 rows), numeric/currency/date cells, or a
//!    table-marker keyword
//! 2. Group contiguous candidate rows on the same page into regions
//! 3. Cluster token x-positions into column slots and assign cells
//! 4. Score each region and keep those above `min_confidence`
//!
//! The first row of a region is its header. Regions with fewer than two
//! data rows are dropped.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::Row;
use crate::config::TableConfig;

/// Rows a neighbour may sit away and still vouch for alignment.
const ALIGNMENT_WINDOW: usize = 2;

/// Header cells longer than this look like prose.
const MAX_HEADER_CELL_CHARS: usize = 50;

const MIN_DATA_ROWS: usize = 2;

static NUMERIC_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(?[£$€]?\s?-?\d[\d,]*(?:\.\d+)?%?\)?$").expect("static regex")
});

static DATE_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}$").expect("static regex")
});

const TABLE_MARKERS: &[&str] = &[
    "total", "subtotal", "amount", "balance", "qty", "quantity", "price", "fee", "date", "item",
    "description", "ref", "no.", "party", "role",
];

const FINANCIAL_MARKERS: &[&str] = &[
    "£", "$", "€", "total", "amount", "balance", "fee", "price", "cost", "vat",
];
const SCHEDULE_MARKERS: &[&str] = &["date", "deadline", "hearing", "due", "schedule"];
const PARTY_MARKERS: &[&str] = &[
    "party", "claimant", "defendant", "applicant", "respondent", "name", "role",
];

/// What a table appears to hold, from its header and cell contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Financial,
    Schedule,
    Parties,
    General,
}

/// A detected table region.
#[derive(Debug, Clone, Serialize)]
pub struct TableRegion {
    /// Page index (0-based).
    pub page: u32,
    /// Bounding box (in PDF points).
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
    /// X position of each column slot, ascending.
    pub column_slots: Vec<f32>,
    pub header: Vec<String>,
    /// Data cells: `rows[row_idx][slot_idx]`.
    pub rows: Vec<Vec<String>>,
    pub confidence: f32,
    pub kind: TableKind,
}

impl TableRegion {
    /// Render as a GitHub-flavored markdown table.
    pub fn to_markdown(&self) -> String {
        let cols = self.column_slots.len();
        if cols == 0 {
            return String::new();
        }

        let mut md = String::new();
        push_md_row(&mut md, &self.header, cols);
        md.push('|');
        md.push_str(&" --- |".repeat(cols));
        md.push('\n');
        for row in &self.rows {
            push_md_row(&mut md, row, cols);
        }
        md
    }
}

fn push_md_row(md: &mut String, cells: &[String], cols: usize) {
    md.push('|');
    for col in 0..cols {
        let cell = cells.get(col).map_or("", String::as_str);
        md.push(' ');
        md.push_str(cell);
        md.push_str(" |");
    }
    md.push('\n');
}

/// Detect table regions in rows produced by [`super::group_rows`].
pub fn detect_tables(rows: &[Row], config: &TableConfig) -> Vec<TableRegion> {
    let candidates: Vec<bool> = (0..rows.len())
        .map(|i| is_candidate(rows, i, config.alignment_tolerance))
        .collect();

    let mut tables = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        if !candidates[start] {
            start += 1;
            continue;
        }
        let mut end = start + 1;
        while end < rows.len() && candidates[end] && rows[end].page == rows[start].page {
            end += 1;
        }

        if let Some(table) = build_region(&rows[start..end], config) {
            if table.confidence >= config.min_confidence {
                tables.push(table);
            } else {
                tracing::debug!(
                    page = table.page,
                    confidence = table.confidence,
                    "discarding low-confidence table region"
                );
            }
        }
        start = end;
    }

    tables
}

fn is_candidate(rows: &[Row], idx: usize, alignment_tolerance: f32) -> bool {
    let row = &rows[idx];
    if row.tokens.len() < 2 {
        return false;
    }

    regular_spacing(row)
        || aligned_with_neighbour(rows, idx, alignment_tolerance)
        || row.tokens.iter().any(|t| is_numeric_cell(&t.text))
        || has_marker(&row.text(), TABLE_MARKERS)
}

/// Every gap within 50% of the mean gap.
fn regular_spacing(row: &Row) -> bool {
    let gaps = row.gaps();
    if gaps.is_empty() {
        return false;
    }
    let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
    if mean <= 0.0 {
        return false;
    }
    gaps.iter().all(|g| (g - mean).abs() <= mean * 0.5)
}

/// At least two token x-positions line up with a nearby row on the same page.
fn aligned_with_neighbour(rows: &[Row], idx: usize, tolerance: f32) -> bool {
    let row = &rows[idx];
    let lo = idx.saturating_sub(ALIGNMENT_WINDOW);
    let hi = (idx + ALIGNMENT_WINDOW).min(rows.len() - 1);

    (lo..=hi)
        .filter(|&j| j != idx && rows[j].page == row.page && rows[j].tokens.len() >= 2)
        .any(|j| {
            let matched = row
                .tokens
                .iter()
                .filter(|t| {
                    rows[j]
                        .tokens
                        .iter()
                        .any(|o| (o.x - t.x).abs() <= tolerance)
                })
                .count();
            matched >= 2
        })
}

fn is_numeric_cell(text: &str) -> bool {
    let text = text.trim();
    NUMERIC_CELL.is_match(text) || DATE_CELL.is_match(text)
}

fn has_marker(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| {
        if m.is_ascii() && m.chars().all(char::is_alphabetic) {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *m)
        } else {
            lower.contains(m)
        }
    })
}

/// Cluster x-positions: sorted, then merged while within `threshold` of the
/// running slot mean.
fn column_slots(rows: &[Row], threshold: f32) -> Vec<f32> {
    let mut xs: Vec<f32> = rows
        .iter()
        .flat_map(|r| r.tokens.iter().map(|t| t.x))
        .collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut slots: Vec<(f32, usize)> = Vec::new(); // (sum, count)
    for x in xs {
        match slots.last_mut() {
            Some((sum, count)) if x - *sum / *count as f32 <= threshold => {
                *sum += x;
                *count += 1;
            }
            _ => slots.push((x, 1)),
        }
    }
    slots
        .into_iter()
        .map(|(sum, count)| sum / count as f32)
        .collect()
}

fn assign_cells(row: &Row, slots: &[f32], tolerance: f32) -> Vec<String> {
    let mut cells = vec![String::new(); slots.len()];
    for token in &row.tokens {
        let nearest = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i, (s - token.x).abs()))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        match nearest {
            Some((slot, dist)) if dist <= tolerance => {
                let cell = &mut cells[slot];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(token.text.trim());
            }
            _ => tracing::trace!(token = %token.text, "token outside every column slot"),
        }
    }
    cells
}

fn build_region(rows: &[Row], config: &TableConfig) -> Option<TableRegion> {
    if rows.len() < MIN_DATA_ROWS + 1 {
        return None;
    }

    let slots = column_slots(rows, config.slot_merge_threshold);
    let mut grid: Vec<Vec<String>> = rows
        .iter()
        .map(|r| assign_cells(r, &slots, config.slot_assign_tolerance))
        .collect();
    let data = grid.split_off(1);
    let header = grid.into_iter().next()?;

    let confidence = score(&header, &data, slots.len());
    let kind = classify(&header, &data);

    let (mut x_min, mut x_max) = (f32::INFINITY, f32::NEG_INFINITY);
    for token in rows.iter().flat_map(|r| r.tokens.iter()) {
        x_min = x_min.min(token.x);
        x_max = x_max.max(token.right());
    }

    Some(TableRegion {
        page: rows[0].page,
        x_min,
        x_max,
        y_min: rows.iter().map(|r| r.y).fold(f32::INFINITY, f32::min),
        y_max: rows.iter().map(|r| r.y).fold(f32::NEG_INFINITY, f32::max),
        column_slots: slots,
        header,
        rows: data,
        confidence,
        kind,
    })
}

/// Weighted sum: header validity 0.3, row consistency 0.3, numeric data 0.2,
/// domain keywords 0.2.
fn score(header: &[String], data: &[Vec<String>], slot_count: usize) -> f32 {
    if slot_count == 0 {
        return 0.0;
    }

    let valid_headers = header
        .iter()
        .filter(|h| !h.is_empty() && h.chars().count() <= MAX_HEADER_CELL_CHARS)
        .count();
    let header_validity = valid_headers as f32 / slot_count as f32;

    let filled = |cells: &[String]| cells.iter().filter(|c| !c.is_empty()).count();
    let header_filled = filled(header);
    let consistent = data
        .iter()
        .filter(|row| filled(row).abs_diff(header_filled) <= 1)
        .count();
    let consistency = if data.is_empty() {
        0.0
    } else {
        consistent as f32 / data.len() as f32
    };

    let numeric = data.iter().flatten().any(|c| is_numeric_cell(c));
    let keywords = header
        .iter()
        .chain(data.iter().flatten())
        .any(|c| has_marker(c, FINANCIAL_MARKERS) || has_marker(c, SCHEDULE_MARKERS) || has_marker(c, PARTY_MARKERS));

    let mut confidence = header_validity * 0.3 + consistency * 0.3;
    if numeric {
        confidence += 0.2;
    }
    if keywords {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

fn classify(header: &[String], data: &[Vec<String>]) -> TableKind {
    let header_text = header.join(" ");
    let all_text = data.iter().flatten().fold(header_text.clone(), |mut acc, c| {
        acc.push(' ');
        acc.push_str(c);
        acc
    });

    if has_marker(&header_text, PARTY_MARKERS) {
        TableKind::Parties
    } else if has_marker(&all_text, FINANCIAL_MARKERS) {
        TableKind::Financial
    } else if has_marker(&header_text, SCHEDULE_MARKERS)
        || data.iter().flatten().any(|c| DATE_CELL.is_match(c.trim()))
    {
        TableKind::Schedule
    } else {
        TableKind::General
    }
}
