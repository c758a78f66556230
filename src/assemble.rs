use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::document::Document;
use crate::error::ExtractError;
use crate::parser::meta::PageMeta;
use crate::parser::window::ExtractionResult;

const CUT_MARKER: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub source_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub teaser: String,
    pub raw_text: String,
    pub text: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub truncated: bool,
    /// Identifier of the extractor that produced this posting.
    pub extractor: String,
    pub user: User,
}

/// Turns extractor output into canonical postings.
#[derive(Debug, Clone)]
pub struct PostingAssembler {
    max_title_len: usize,
    max_teaser_len: usize,
    language: String,
    keep_unmatched: bool,
}

impl PostingAssembler {
    pub fn new(max_title_len: usize, max_teaser_len: usize, language: &str, keep_unmatched: bool) -> Self {
        Self {
            max_title_len,
            max_teaser_len,
            language: language.to_string(),
            keep_unmatched,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_title_len,
            settings.max_teaser_len,
            &settings.language,
            settings.keep_unmatched_pages,
        )
    }

    /// `Ok(None)` when the record carries nothing worth keeping: empty text,
    /// or no keyword match while unmatched pages are dropped.
    pub fn assemble(
        &self,
        result: ExtractionResult,
        doc: &Document,
        meta: &PageMeta,
        extractor: &str,
    ) -> Result<Option<Posting>, ExtractError> {
        let host = doc
            .host()
            .ok_or_else(|| ExtractError::MissingHost(doc.url.clone()))?;

        if result.filtered_text.is_empty() {
            return Ok(None);
        }

        let (text, truncated) = if result.has_matches() {
            (result.concatenated_text, result.truncated)
        } else if self.keep_unmatched {
            (result.filtered_text.clone(), false)
        } else {
            return Ok(None);
        };

        let title = meta
            .title
            .as_deref()
            .map(|t| truncate_words(t, self.max_title_len));
        let teaser = match meta.description.as_deref() {
            Some(d) => truncate_words(d, self.max_teaser_len),
            None => truncate_words(&text, self.max_teaser_len),
        };

        let user = self.fallback_user(&host, meta.author.as_deref());

        Ok(Some(Posting {
            source_id: source_id(&doc.url, &result.filtered_text),
            source_url: doc.url.clone(),
            title,
            teaser,
            raw_text: result.filtered_text,
            text,
            language: self.language.clone(),
            created_at: doc.fetched_at,
            truncated,
            extractor: extractor.to_string(),
            user,
        }))
    }

    fn fallback_user(&self, host: &str, author: Option<&str>) -> User {
        User {
            user_id: user_id(host, author),
            display_name: author.unwrap_or(host).to_string(),
            language: self.language.clone(),
        }
    }
}

/// Content address of a record: stable for the same url and text.
pub fn source_id(url: &str, raw_text: &str) -> String {
    let content_hash = Sha256::digest(raw_text.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash);
    format!("{:x}", hasher.finalize())
}

pub fn user_id(host: &str, author: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    if let Some(author) = author {
        hasher.update([0u8]);
        hasher.update(author.to_lowercase().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Cut `s` to at most `max` characters on a word boundary, marking the cut.
/// The marker counts toward `max`.
pub fn truncate_words(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let Some(keep) = max.checked_sub(CUT_MARKER.chars().count()) else {
        return s.chars().take(max).collect();
    };
    let prefix: String = s.chars().take(keep).collect();
    let next_is_space = s.chars().nth(keep).is_some_and(char::is_whitespace);
    let cut = if next_is_space {
        prefix.as_str()
    } else {
        match prefix.rfind(char::is_whitespace) {
            Some(i) => &prefix[..i],
            None => prefix.as_str(),
        }
    };
    format!("{}{}", cut.trim_end(), CUT_MARKER)
}
