use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)https?://(?:[^/?#@]*@)?(?:www\.)?([^/?#:@]+)").unwrap());
static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)https?://[^/?#]+(/[^?#]*)?").unwrap());

/// A fetched page. Never modified after it has been fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub html: String,
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Lower-cased host without a leading `www.`.
    pub fn host(&self) -> Option<String> {
        HOST_RE
            .captures(&self.url)
            .map(|c| c[1].to_ascii_lowercase())
            .filter(|h| !h.is_empty())
    }

    pub fn path_segments(&self) -> Vec<String> {
        PATH_RE
            .captures(&self.url)
            .and_then(|c| c.get(1))
            .map(|p| {
                p.as_str()
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A keyword the run is tracking. Matched case-insensitively on word boundaries.
#[derive(Debug, Clone)]
pub struct TrackedTerm {
    text: String,
    pattern: Regex,
}

impl TrackedTerm {
    pub fn new(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        // `\b` next to a non-word edge (the dot in "S.A.") would never match.
        let edge = |c: Option<char>| if c.is_some_and(is_word_char) { r"\b" } else { "" };
        let pattern = Regex::new(&format!(
            "(?i){}{}{}",
            edge(text.chars().next()),
            regex::escape(text),
            edge(text.chars().next_back())
        ))
        .ok()?;
        Some(Self {
            text: text.to_string(),
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl PartialEq for TrackedTerm {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for TrackedTerm {}

/// Build the ordered term set: blanks dropped, case-insensitive duplicates
/// collapsed onto their first occurrence.
pub fn tracked_terms<I, S>(raw: I) -> Vec<TrackedTerm>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|s| TrackedTerm::new(s.as_ref()))
        .filter(|t| seen.insert(t.as_str().to_lowercase()))
        .collect()
}

/// Read documents from a JSON-lines file (`{"url": .., "html": .., "fetched_at": ..}`).
/// Malformed lines are logged and skipped.
pub fn load_jsonl(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut docs = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Document>(&line) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(file = ?path, line = i + 1, error = %e, "skipping malformed document"),
        }
    }
    Ok(docs)
}
