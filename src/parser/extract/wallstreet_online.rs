use super::{Extractor, RecordRules, SiteExtractor, SiteProfile, DEFAULT_THRESHOLD};
use crate::config::Settings;
use crate::error::RegistryError;

pub const ID: &str = "wallstreet_online";

/// Discussion threads on wallstreet-online.de; one record per posting.
pub const PROFILE: SiteProfile = SiteProfile {
    id: ID,
    hosts: &["wallstreet-online.de"],
    path_segments: &["diskussion", "forum"],
    markers: &[("div.posting", 1), ("div.postingHead", 1)],
    markers_cap: None,
    include: &["#thread", "div.forumThread"],
    exclude: &[
        "nav",
        "header",
        "footer",
        ".postingHead",
        ".postingFooter",
        ".signature",
        ".quote",
        ".ad",
        "ul.pagination",
        "form",
    ],
    records: Some(RecordRules {
        record: "div.posting",
        author: Some(".userName"),
    }),
    threshold: DEFAULT_THRESHOLD,
};

pub fn build(settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
    SiteExtractor::boxed(&PROFILE, settings)
}
