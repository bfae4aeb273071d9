//! Char-offset helpers.
//!
//! Every span offset in this crate counts Unicode scalar values, the same
//! unit the remote detector services report. Rust strings index by byte,
//! so anything that slices text or converts regex matches goes through here.

/// Number of chars in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte index of the char at `char_idx`, or `text.len()` when past the end.
pub fn byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map_or(text.len(), |(byte, _)| byte)
}

/// Slice `text` by char range `[start, end)`. Out-of-range bounds are clamped.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let start_byte = byte_offset(text, start);
    let end_byte = byte_offset(text, end.max(start));
    &text[start_byte..end_byte]
}

/// Byte → char offset lookup for one string.
///
/// Built once per scan so converting N regex matches is O(len + N) instead
/// of O(len * N).
pub struct CharMap {
    /// `starts[i]` is the byte offset of char `i`; last entry is `text.len()`.
    starts: Vec<usize>,
}

impl CharMap {
    pub fn new(text: &str) -> Self {
        let mut starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        starts.push(text.len());
        Self { starts }
    }

    /// Char offset of a byte offset that sits on a char boundary.
    pub fn to_char(&self, byte: usize) -> usize {
        match self.starts.binary_search(&byte) {
            Ok(idx) | Err(idx) => idx,
        }
    }

    /// Byte offset of a char offset (clamped to the end of the text).
    pub fn to_byte(&self, char_idx: usize) -> usize {
        self.starts[char_idx.min(self.starts.len() - 1)]
    }

    /// Total chars in the mapped text.
    pub fn char_len(&self) -> usize {
        self.starts.len() - 1
    }
}
