use super::{Extractor, RecordRules, SiteExtractor, SiteProfile, DEFAULT_THRESHOLD};
use crate::config::Settings;
use crate::error::RegistryError;

pub const ID: &str = "ariva";

/// ariva.de forum threads; one record per post.
pub const PROFILE: SiteProfile = SiteProfile {
    id: ID,
    hosts: &["ariva.de"],
    path_segments: &["forum"],
    markers: &[("div.forumPost", 1), ("table.forumTable", 2)],
    markers_cap: None,
    include: &["div.forumContent", "table.forumTable"],
    exclude: &[
        "nav",
        "header",
        "footer",
        ".postHeader",
        ".postFooter",
        ".sig",
        ".quoted",
        ".werbung",
        ".paging",
    ],
    records: Some(RecordRules {
        record: "div.forumPost",
        author: Some("a.user"),
    }),
    threshold: DEFAULT_THRESHOLD,
};

pub fn build(settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
    SiteExtractor::boxed(&PROFILE, settings)
}
