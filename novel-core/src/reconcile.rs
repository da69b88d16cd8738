//! Relocating a recorded quote inside content that may have been edited
//! since the quote was taken.
//!
//! All offsets are char offsets. The recorded offset is only a tie-breaker
//! between occurrences; writes always use the range resolved here.

use serde::Serialize;

use crate::error::{NovelError, Result};

/// A resolved `[start, end)` char range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Char offsets of every occurrence of `quote` in `content`, overlapping
/// occurrences included, in scan order.
pub fn occurrences(content: &str, quote: &str) -> Vec<usize> {
    if quote.is_empty() {
        return Vec::new();
    }
    // `str::match_indices` skips overlapping matches, so restart one char
    // after each hit instead.
    let mut found = Vec::new();
    let mut byte_pos = 0;
    let mut char_pos = 0;
    while let Some(offset) = content[byte_pos..].find(quote) {
        let at = byte_pos + offset;
        char_pos += content[byte_pos..at].chars().count();
        found.push(char_pos);
        let step = content[at..].chars().next().map_or(1, char::len_utf8);
        byte_pos = at + step;
        char_pos += 1;
    }
    found
}

/// Finds where a quote lives now.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationReconciler;

impl AnnotationReconciler {
    /// Locate `quote` in `content`, preferring the occurrence closest to
    /// `preferred_start`. Equal distances go to the earlier occurrence.
    pub fn locate(&self, content: &str, quote: &str, preferred_start: usize) -> Result<Span> {
        let found = occurrences(content, quote);
        let start = match found.as_slice() {
            [] => return Err(NovelError::NotLocatable),
            [only] => *only,
            many => {
                let mut best = many[0];
                for &candidate in &many[1..] {
                    if candidate.abs_diff(preferred_start) < best.abs_diff(preferred_start) {
                        best = candidate;
                    }
                }
                tracing::debug!(
                    occurrences = many.len(),
                    preferred_start,
                    resolved = best,
                    "quote is ambiguous, picked nearest"
                );
                best
            }
        };
        Ok(Span {
            start,
            end: start + crate::text::char_len(quote),
        })
    }
}
