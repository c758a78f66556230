use super::{Extractor, SiteExtractor, SiteProfile, DEFAULT_THRESHOLD};
use crate::config::Settings;
use crate::error::RegistryError;

pub const ID: &str = "onvista";

pub const PROFILE: SiteProfile = SiteProfile {
    id: ID,
    hosts: &["onvista.de"],
    path_segments: &["news", "boersen-news", "aktien"],
    markers: &[("article", 2), ("div.ov-article-body", 2)],
    markers_cap: None,
    include: &["div.ov-article-body", "article"],
    exclude: &[
        "nav",
        "header",
        "footer",
        "aside",
        "figure",
        ".ov-ad",
        ".ov-snapshot",
        ".ov-related",
        ".ov-newsletter",
        "[role=navigation]",
    ],
    records: None,
    threshold: DEFAULT_THRESHOLD,
};

pub fn build(settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
    SiteExtractor::boxed(&PROFILE, settings)
}
