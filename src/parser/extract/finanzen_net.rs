use super::{Extractor, SiteExtractor, SiteProfile, DEFAULT_THRESHOLD};
use crate::config::Settings;
use crate::error::RegistryError;

pub const ID: &str = "finanzen_net";

/// News and analysis articles on finanzen.net.
pub const PROFILE: SiteProfile = SiteProfile {
    id: ID,
    hosts: &["finanzen.net", "finanzen.ch", "finanzen.at"],
    path_segments: &["nachricht", "analysen", "news"],
    markers: &[("div.article-body", 2), ("[itemprop=articleBody]", 2), ("div.news-article", 1)],
    markers_cap: None,
    include: &["div.article-body", "[itemprop=articleBody]", "article"],
    exclude: &[
        "nav",
        "header",
        "footer",
        "aside",
        "form",
        ".ad",
        ".advertisement",
        ".teaser-box",
        ".social-share",
        ".related-news",
        "ul.pagination",
        "#cookie-banner",
    ],
    records: None,
    threshold: DEFAULT_THRESHOLD,
};

pub fn build(settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
    SiteExtractor::boxed(&PROFILE, settings)
}
