use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::TrackedTerm;

/// Placed between windows in the concatenated text.
pub const SEPARATOR: &str = " ... ";
pub const DEFAULT_MARGIN: usize = 30;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{M}'\-]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// One window per occurrence, overlaps kept, discovery order.
    #[default]
    Verbatim,
    /// Overlapping or touching windows coalesced, text order.
    Merged,
}

/// Word-aligned span around one keyword occurrence.
///
/// `start_word..end_word` indexes the token list; `start..end` is the byte
/// span in the filtered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start_word: usize,
    pub end_word: usize,
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn words(&self) -> usize {
        self.end_word - self.start_word
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub filtered_text: String,
    pub windows: Vec<Window>,
    pub concatenated_text: String,
    pub truncated: bool,
}

impl ExtractionResult {
    pub fn has_matches(&self) -> bool {
        !self.windows.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeywordWindowExtractor {
    margin: usize,
    mode: WindowMode,
}

impl Default for KeywordWindowExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN, WindowMode::Verbatim)
    }
}

impl KeywordWindowExtractor {
    pub fn new(margin: usize, mode: WindowMode) -> Self {
        Self { margin, mode }
    }

    pub fn extract_windows(&self, text: String, terms: &[TrackedTerm]) -> ExtractionResult {
        let tokens = tokenize(&text);
        let mut windows = Vec::new();

        for term in terms {
            for m in term.pattern().find_iter(&text) {
                if let Some(w) = self.window_for(&text, &tokens, m.range()) {
                    windows.push(w);
                }
            }
        }

        if self.mode == WindowMode::Merged {
            windows = merge(windows);
        }

        let concatenated_text = windows
            .iter()
            .map(|w| w.text(&text))
            .collect::<Vec<_>>()
            .join(SEPARATOR);
        let truncated = concatenated_text.chars().count() < text.chars().count();

        ExtractionResult {
            filtered_text: text,
            windows,
            concatenated_text,
            truncated,
        }
    }

    fn window_for(&self, text: &str, tokens: &[Range<usize>], hit: Range<usize>) -> Option<Window> {
        let n = tokens.len();
        let first = tokens.partition_point(|t| t.end <= hit.start);
        let past_last = tokens.partition_point(|t| t.start < hit.end);
        if first >= past_last {
            return None;
        }

        // Too short to cut: every window is the whole text.
        if n < 2 * self.margin + 1 {
            return Some(Window {
                start_word: 0,
                end_word: n,
                start: 0,
                end: text.len(),
            });
        }

        let start_word = first.saturating_sub(self.margin);
        let end_word = (past_last + self.margin).min(n);

        // Windows touching the first or last word run to the text boundary.
        let start = if start_word == 0 { 0 } else { tokens[start_word].start };
        let end = if end_word == n { text.len() } else { tokens[end_word - 1].end };

        Some(Window {
            start_word,
            end_word,
            start: start.min(hit.start),
            end: end.max(hit.end),
        })
    }
}

/// Byte spans of every word: maximal runs of letters, marks, apostrophes and hyphens.
pub fn tokenize(text: &str) -> Vec<Range<usize>> {
    WORD_RE.find_iter(text).map(|m| m.range()).collect()
}

fn merge(mut windows: Vec<Window>) -> Vec<Window> {
    windows.sort_by_key(|w| (w.start_word, w.end_word));
    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for w in windows {
        match merged.last_mut() {
            Some(last) if w.start_word <= last.end_word => {
                last.end_word = last.end_word.max(w.end_word);
                last.start = last.start.min(w.start);
                last.end = last.end.max(w.end);
            }
            _ => merged.push(w),
        }
    }
    merged
}
