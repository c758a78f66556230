use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::filter::collapse_whitespace;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static OG_TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static OG_DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:description"]"#).unwrap());

/// Document-level metadata used for titles, teasers and authorship.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Author of a single record on multi-record pages.
    pub author: Option<String>,
}

impl PageMeta {
    pub fn from_html(html: &Html) -> Self {
        let title = html
            .select(&TITLE_SEL)
            .next()
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .or_else(|| meta_content(html, &OG_TITLE_SEL));
        let description =
            meta_content(html, &DESCRIPTION_SEL).or_else(|| meta_content(html, &OG_DESCRIPTION_SEL));

        Self {
            title,
            description,
            author: None,
        }
    }

    /// Metadata for one record of a multi-record page. The page description
    /// summarises the whole page, so it is dropped.
    pub fn for_record(&self, author: Option<String>) -> Self {
        Self {
            title: self.title.clone(),
            description: None,
            author,
        }
    }
}

fn meta_content(html: &Html, sel: &Selector) -> Option<String> {
    html.select(sel)
        .filter_map(|e| e.value().attr("content"))
        .map(collapse_whitespace)
        .find(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_and_description() {
        let html = Html::parse_document(
            r#"<html><head><title>  Siemens-Aktie
                 im Plus </title><meta name="description" content="Kurzfassung"></head></html>"#,
        );
        let meta = PageMeta::from_html(&html);
        assert_eq!(meta.title.as_deref(), Some("Siemens-Aktie im Plus"));
        assert_eq!(meta.description.as_deref(), Some("Kurzfassung"));
    }

    #[test]
    fn open_graph_fallbacks() {
        let html = Html::parse_document(
            r#"<head><meta property="og:title" content="OG Titel">
               <meta property="og:description" content="OG Text"></head>"#,
        );
        let meta = PageMeta::from_html(&html);
        assert_eq!(meta.title.as_deref(), Some("OG Titel"));
        assert_eq!(meta.description.as_deref(), Some("OG Text"));
    }

    #[test]
    fn record_meta_keeps_title_only() {
        let page = PageMeta {
            title: Some("Thread".into()),
            description: Some("Diskussion zur Aktie".into()),
            author: None,
        };
        let record = page.for_record(Some("anna".into()));
        assert_eq!(record.title.as_deref(), Some("Thread"));
        assert_eq!(record.description, None);
        assert_eq!(record.author.as_deref(), Some("anna"));
    }

    #[test]
    fn nothing_present() {
        let meta = PageMeta::from_html(&Html::parse_document("<p>x</p>"));
        assert_eq!(meta, PageMeta::default());
    }
}
