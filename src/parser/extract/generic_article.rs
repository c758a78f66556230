use super::{Extractor, SiteExtractor, SiteProfile, DEFAULT_THRESHOLD, PATH_SCORE};
use crate::config::Settings;
use crate::error::RegistryError;

pub const ID: &str = "generic_article";

/// Catch-all for news pages on unknown hosts. No host signal, and markup is
/// capped below the threshold, so a news-like path and article markup both
/// have to be present.
pub const PROFILE: SiteProfile = SiteProfile {
    id: ID,
    hosts: &[],
    path_segments: &["news", "nachrichten", "artikel", "article", "meldung", "blog"],
    markers: &[
        ("article", 2),
        ("[itemprop=articleBody]", 2),
        ("meta[property=og:type]", 1),
    ],
    markers_cap: Some(PATH_SCORE + 1),
    include: &["[itemprop=articleBody]", "article", "main"],
    exclude: &[
        "nav",
        "header",
        "footer",
        "aside",
        "form",
        "figure",
        "[role=navigation]",
        "[role=banner]",
        "[role=contentinfo]",
        ".ad",
        ".ads",
        ".advert",
        ".advertisement",
        ".cookie",
        ".comments",
        ".newsletter",
        ".pagination",
        ".related",
        ".share",
        ".sidebar",
    ],
    records: None,
    threshold: DEFAULT_THRESHOLD,
};

pub fn build(settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
    SiteExtractor::boxed(&PROFILE, settings)
}
