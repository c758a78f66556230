pub mod extract;
pub mod filter;
pub mod meta;
pub mod registry;
pub mod window;

use scraper::Html;

use crate::document::Document;
use crate::error::ExtractError;

/// A document parsed once and shared by every extractor that looks at it.
pub struct Page<'a> {
    pub doc: &'a Document,
    pub html: Html,
    pub host: String,
    pub segments: Vec<String>,
}

impl<'a> Page<'a> {
    pub fn parse(doc: &'a Document) -> Result<Self, ExtractError> {
        let host = doc
            .host()
            .ok_or_else(|| ExtractError::MissingHost(doc.url.clone()))?;
        Ok(Self {
            doc,
            html: Html::parse_document(&doc.html),
            host,
            segments: doc.path_segments(),
        })
    }
}
