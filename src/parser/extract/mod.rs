pub mod ariva;
pub mod finanzen_net;
pub mod generic_article;
pub mod onvista;
pub mod wallstreet_online;

use tracing::trace;

use super::filter::{first_text, parse_rules, FilterRule, StructuralFilter};
use super::meta::PageMeta;
use super::window::{ExtractionResult, KeywordWindowExtractor};
use super::Page;
use crate::config::Settings;
use crate::document::TrackedTerm;
use crate::error::{ExtractError, RegistryError, RuleError};

pub const DEFAULT_THRESHOLD: u32 = 7;
pub const HOST_SCORE: u32 = 3;
pub const PATH_SCORE: u32 = 3;
/// Most a single marker rule can contribute, however often it occurs.
pub const MARKER_CAP: u32 = 4;

/// One unit of extractor output: windowed text plus the metadata it belongs to.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub result: ExtractionResult,
    pub meta: PageMeta,
}

/// An extraction strategy. Claims documents by self-assessment and turns the
/// ones it claims into windowed records.
pub trait Extractor: Send + Sync {
    fn id(&self) -> &str;

    fn score(&self, page: &Page<'_>) -> u32;

    fn threshold(&self) -> u32 {
        DEFAULT_THRESHOLD
    }

    fn can_handle(&self, page: &Page<'_>) -> bool {
        self.score(page) >= self.threshold()
    }

    fn extract(&self, page: &Page<'_>, terms: &[TrackedTerm]) -> Result<Vec<RawRecord>, ExtractError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RecordRules {
    /// Element wrapping one record (e.g. one forum post).
    pub record: &'static str,
    pub author: Option<&'static str>,
}

/// Static description of a site strategy: scoring signals and default rule table.
#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    pub id: &'static str,
    /// Host substrings worth [`HOST_SCORE`].
    pub hosts: &'static [&'static str],
    /// Path segments worth [`PATH_SCORE`].
    pub path_segments: &'static [&'static str],
    /// Marker rules with the points each occurrence earns.
    pub markers: &'static [(&'static str, u32)],
    /// Most all markers together can contribute, on top of [`MARKER_CAP`] per rule.
    pub markers_cap: Option<u32>,
    pub include: &'static [&'static str],
    pub exclude: &'static [&'static str],
    pub records: Option<RecordRules>,
    pub threshold: u32,
}

struct Marker {
    rule: FilterRule,
    weight: u32,
}

struct Records {
    record: FilterRule,
    author: Option<FilterRule>,
}

/// The one strategy implementation; site differences live in [`SiteProfile`].
pub struct SiteExtractor {
    id: String,
    hosts: Vec<String>,
    path_segments: Vec<String>,
    markers: Vec<Marker>,
    markers_cap: Option<u32>,
    filter: StructuralFilter,
    records: Option<Records>,
    threshold: u32,
    windows: KeywordWindowExtractor,
}

impl SiteExtractor {
    /// Build from a profile, applying any rule-table override from `settings`.
    pub fn from_profile(profile: &SiteProfile, settings: &Settings) -> Result<Self, RegistryError> {
        let id = profile.id;
        let bad_rule = |(rule, source): (String, RuleError)| RegistryError::BadRule {
            extractor: id.to_string(),
            rule,
            source,
        };

        let table = settings.rules.get(id);
        let include = match table.and_then(|t| t.include.as_ref()) {
            Some(rules) => parse_rules(rules.as_slice()),
            None => parse_rules(profile.include),
        }
        .map_err(bad_rule)?;
        let exclude = match table.and_then(|t| t.exclude.as_ref()) {
            Some(rules) => parse_rules(rules.as_slice()),
            None => parse_rules(profile.exclude),
        }
        .map_err(bad_rule)?;

        let markers = profile
            .markers
            .iter()
            .map(|(rule, weight)| {
                FilterRule::parse(rule)
                    .map(|rule| Marker { rule, weight: *weight })
                    .map_err(|e| bad_rule((rule.to_string(), e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = profile
            .records
            .map(|r| -> Result<Records, RegistryError> {
                let record = FilterRule::parse(r.record).map_err(|e| bad_rule((r.record.to_string(), e)))?;
                let author = r
                    .author
                    .map(|a| FilterRule::parse(a).map_err(|e| bad_rule((a.to_string(), e))))
                    .transpose()?;
                Ok(Records { record, author })
            })
            .transpose()?;

        Ok(Self {
            id: id.to_string(),
            hosts: profile.hosts.iter().map(|h| h.to_string()).collect(),
            path_segments: profile.path_segments.iter().map(|s| s.to_string()).collect(),
            markers,
            markers_cap: profile.markers_cap,
            filter: StructuralFilter::new(include, exclude),
            records,
            threshold: profile.threshold,
            windows: KeywordWindowExtractor::new(settings.window_margin, settings.window_mode),
        })
    }

    pub fn boxed(profile: &SiteProfile, settings: &Settings) -> Result<Box<dyn Extractor>, RegistryError> {
        Ok(Box::new(Self::from_profile(profile, settings)?))
    }
}

impl Extractor for SiteExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn score(&self, page: &Page<'_>) -> u32 {
        let mut score = 0;
        if self.hosts.iter().any(|h| page.host.contains(h.as_str())) {
            score += HOST_SCORE;
        }
        if page
            .segments
            .iter()
            .any(|s| self.path_segments.iter().any(|p| p == s))
        {
            score += PATH_SCORE;
        }
        let markers: u32 = self
            .markers
            .iter()
            .map(|m| (m.rule.count_in(&page.html) as u32).saturating_mul(m.weight).min(MARKER_CAP))
            .sum();
        score += self.markers_cap.map_or(markers, |cap| markers.min(cap));
        trace!(extractor = %self.id, url = %page.doc.url, score, "scored document");
        score
    }

    fn threshold(&self) -> u32 {
        self.threshold
    }

    fn extract(&self, page: &Page<'_>, terms: &[TrackedTerm]) -> Result<Vec<RawRecord>, ExtractError> {
        let meta = PageMeta::from_html(&page.html);

        if let Some(rules) = &self.records {
            let elements = self.filter.records(&page.html, &rules.record);
            if !elements.is_empty() {
                return Ok(elements
                    .into_iter()
                    .map(|el| {
                        let author = rules.author.as_ref().and_then(|a| first_text(el, a));
                        RawRecord {
                            result: self.windows.extract_windows(self.filter.filter_element(el), terms),
                            meta: meta.for_record(author),
                        }
                    })
                    .collect());
            }
        }

        let text = self.filter.filter(&page.html);
        Ok(vec![RawRecord {
            result: self.windows.extract_windows(text, terms),
            meta,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{tracked_terms, Document};
    use crate::parser::filter::RuleTable;

    const PROFILE: SiteProfile = SiteProfile {
        id: "test_site",
        hosts: &["boerse.example"],
        path_segments: &["aktien"],
        markers: &[("div.kurs", 1)],
        markers_cap: None,
        include: &["main"],
        exclude: &["nav"],
        records: None,
        threshold: DEFAULT_THRESHOLD,
    };

    fn page_html(kurs_boxes: usize) -> String {
        format!(
            "<html><body><nav>Aktie Menü</nav><main><p>Die Aktie steigt.</p>{}</main></body></html>",
            "<div class=\"kurs\">1,23</div>".repeat(kurs_boxes)
        )
    }

    #[test]
    fn score_sums_independent_signals() {
        let ex = SiteExtractor::from_profile(&PROFILE, &Settings::default()).unwrap();
        let doc = Document::new("https://www.boerse.example/aktien/siemens", page_html(2));
        let page = Page::parse(&doc).unwrap();
        assert_eq!(ex.score(&page), 3 + 3 + 2);
        assert!(ex.can_handle(&page));
    }

    #[test]
    fn marker_contribution_is_capped() {
        let ex = SiteExtractor::from_profile(&PROFILE, &Settings::default()).unwrap();
        let doc = Document::new("https://other.example/x", page_html(10));
        let page = Page::parse(&doc).unwrap();
        assert_eq!(ex.score(&page), MARKER_CAP);
        assert!(!ex.can_handle(&page));
    }

    #[test]
    fn article_markup_alone_does_not_claim_for_catch_all() {
        let ex = SiteExtractor::from_profile(&generic_article::PROFILE, &Settings::default()).unwrap();
        let html = r#"<html><head><meta property="og:type" content="product"></head><body>
            <article><div itemprop="articleBody">Kaffee Aktie</div></article>
            <article><div itemprop="articleBody">Espresso</div></article></body></html>"#;
        let doc = Document::new("https://shop.example.com/produkte/kaffee", html);
        let page = Page::parse(&doc).unwrap();
        assert_eq!(ex.score(&page), PATH_SCORE + 1);
        assert!(!ex.can_handle(&page));

        let news = Document::new("https://shop.example.com/news/kaffee", html);
        let page = Page::parse(&news).unwrap();
        assert!(ex.can_handle(&page));
    }

    #[test]
    fn single_strong_signal_is_not_enough() {
        let ex = SiteExtractor::from_profile(&PROFILE, &Settings::default()).unwrap();
        let doc = Document::new("https://boerse.example/news/x", page_html(0));
        let page = Page::parse(&doc).unwrap();
        assert_eq!(ex.score(&page), HOST_SCORE);
        assert!(!ex.can_handle(&page));
    }

    #[test]
    fn extract_filters_then_windows() {
        let ex = SiteExtractor::from_profile(&PROFILE, &Settings::default()).unwrap();
        let doc = Document::new("https://boerse.example/aktien/x", page_html(1));
        let page = Page::parse(&doc).unwrap();
        let records = ex.extract(&page, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result.filtered_text, "Die Aktie steigt. 1,23");
        assert_eq!(records[0].result.windows.len(), 1);
    }

    #[test]
    fn override_replaces_builtin_rules() {
        let mut settings = Settings::default();
        settings.rules.insert(
            "test_site".into(),
            RuleTable {
                include: Some(vec!["body".into()]),
                exclude: None,
            },
        );
        let ex = SiteExtractor::from_profile(&PROFILE, &settings).unwrap();
        let doc = Document::new("https://boerse.example/aktien/x", page_html(0));
        let page = Page::parse(&doc).unwrap();
        let records = ex.extract(&page, &[]).unwrap();
        assert_eq!(records[0].result.filtered_text, "Die Aktie steigt.");
    }

    #[test]
    fn bad_override_is_registry_error() {
        let mut settings = Settings::default();
        settings.rules.insert(
            "test_site".into(),
            RuleTable {
                include: None,
                exclude: Some(vec!["div > p".into()]),
            },
        );
        let err = SiteExtractor::from_profile(&PROFILE, &settings).err().unwrap();
        assert!(matches!(err, RegistryError::BadRule { ref rule, .. } if rule == "div > p"));
    }

    #[test]
    fn every_builtin_profile_parses() {
        for profile in [
            &finanzen_net::PROFILE,
            &wallstreet_online::PROFILE,
            &ariva::PROFILE,
            &onvista::PROFILE,
            &generic_article::PROFILE,
        ] {
            assert!(
                SiteExtractor::from_profile(profile, &Settings::default()).is_ok(),
                "{}",
                profile.id
            );
        }
    }
}
