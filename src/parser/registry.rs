use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use super::extract::{ariva, finanzen_net, generic_article, onvista, wallstreet_online};
use super::extract::{Extractor, RawRecord};
use super::Page;
use crate::assemble::{Posting, PostingAssembler};
use crate::config::Settings;
use crate::document::{Document, TrackedTerm};
use crate::error::{ExtractError, RegistryError};

type Constructor = fn(&Settings) -> Result<Box<dyn Extractor>, RegistryError>;

/// Every extractor the binary knows about, by identifier.
const CONSTRUCTORS: &[(&str, Constructor)] = &[
    (finanzen_net::ID, finanzen_net::build),
    (wallstreet_online::ID, wallstreet_online::build),
    (ariva::ID, ariva::build),
    (onvista::ID, onvista::build),
    (generic_article::ID, generic_article::build),
];

/// Dispatch order used when the configuration does not name one.
/// Site-specific strategies go before the catch-all.
pub const DEFAULT_ORDER: &[&str] = &[
    finanzen_net::ID,
    wallstreet_online::ID,
    ariva::ID,
    onvista::ID,
    generic_article::ID,
];

static GLOBAL: OnceLock<Arc<ParserDispatcher>> = OnceLock::new();

pub struct ExtractorDescriptor {
    pub id: String,
    pub extractor: Box<dyn Extractor>,
}

/// Outcome of dispatching one document.
#[derive(Debug, Default)]
pub struct Dispatched {
    /// The extractor that claimed the document, if any did.
    pub extractor: Option<String>,
    pub postings: Vec<Posting>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub id: String,
    pub score: u32,
    pub threshold: u32,
}

/// Dry-run view of a dispatch: every extractor's verdict plus the winner's raw output.
#[derive(Debug)]
pub struct Inspection {
    pub assessments: Vec<Assessment>,
    pub winner: Option<String>,
    pub records: Vec<RawRecord>,
}

/// Ordered, read-only registry of extractors. The first one that claims a
/// document extracts it.
pub struct ParserDispatcher {
    descriptors: Vec<ExtractorDescriptor>,
    assembler: PostingAssembler,
}

impl ParserDispatcher {
    pub fn from_settings(settings: &Settings) -> Result<Self, RegistryError> {
        if settings.extractors.is_empty() {
            return Err(RegistryError::Empty);
        }
        if let Some(id) = settings
            .rules
            .keys()
            .find(|id| !CONSTRUCTORS.iter().any(|(known, _)| known == id))
        {
            return Err(RegistryError::RulesForUnknown(id.clone()));
        }

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(settings.extractors.len());
        for id in &settings.extractors {
            if !seen.insert(id.as_str()) {
                return Err(RegistryError::DuplicateExtractor(id.clone()));
            }
            let (_, build) = CONSTRUCTORS
                .iter()
                .find(|(known, _)| known == id)
                .ok_or_else(|| RegistryError::UnknownExtractor(id.clone()))?;
            descriptors.push(ExtractorDescriptor {
                id: id.clone(),
                extractor: build(settings)?,
            });
        }

        info!(
            extractors = %settings.extractors.join(","),
            "extractor registry ready"
        );
        Ok(Self {
            descriptors,
            assembler: PostingAssembler::from_settings(settings),
        })
    }

    /// Registry over already constructed extractors, in the given order.
    pub fn new(extractors: Vec<Box<dyn Extractor>>, assembler: PostingAssembler) -> Self {
        Self {
            descriptors: extractors
                .into_iter()
                .map(|extractor| ExtractorDescriptor {
                    id: extractor.id().to_string(),
                    extractor,
                })
                .collect(),
            assembler,
        }
    }

    /// Process-wide registry, built from `settings` on first use. Later calls
    /// return the same instance whatever settings they pass.
    pub fn global(settings: &Settings) -> Result<Arc<Self>, RegistryError> {
        if let Some(existing) = GLOBAL.get() {
            return Ok(Arc::clone(existing));
        }
        let built = Arc::new(Self::from_settings(settings)?);
        Ok(Arc::clone(GLOBAL.get_or_init(|| built)))
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn dispatch(&self, doc: &Document, terms: &[TrackedTerm]) -> Result<Dispatched, ExtractError> {
        let page = Page::parse(doc)?;

        let Some(winner) = self.descriptors.iter().find(|d| d.extractor.can_handle(&page)) else {
            debug!(url = %doc.url, "no extractor claimed document");
            return Ok(Dispatched::default());
        };

        let records = winner
            .extractor
            .extract(&page, terms)
            .inspect_err(|e| warn!(url = %doc.url, extractor = %winner.id, "extraction failed: {}", e))?;

        let mut postings = Vec::with_capacity(records.len());
        for record in records {
            match self.assembler.assemble(record.result, doc, &record.meta, &winner.id)? {
                Some(posting) => postings.push(posting),
                None => debug!(url = %doc.url, extractor = %winner.id, "record without matches dropped"),
            }
        }

        Ok(Dispatched {
            extractor: Some(winner.id.clone()),
            postings,
        })
    }

    /// Score every extractor against `doc` and run the winner, without
    /// assembling postings.
    pub fn inspect(&self, doc: &Document, terms: &[TrackedTerm]) -> Result<Inspection, ExtractError> {
        let page = Page::parse(doc)?;

        let assessments: Vec<Assessment> = self
            .descriptors
            .iter()
            .map(|d| Assessment {
                id: d.id.clone(),
                score: d.extractor.score(&page),
                threshold: d.extractor.threshold(),
            })
            .collect();

        let winner = self.descriptors.iter().find(|d| d.extractor.can_handle(&page));
        let records = match winner {
            Some(d) => d.extractor.extract(&page, terms)?,
            None => Vec::new(),
        };

        Ok(Inspection {
            assessments,
            winner: winner.map(|d| d.id.clone()),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::document::tracked_terms;
    use crate::parser::filter::RuleTable;
    use crate::parser::meta::PageMeta;
    use crate::parser::window::KeywordWindowExtractor;

    struct Fixed {
        id: &'static str,
        score: u32,
        extract_calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(id: &'static str, score: u32) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    id,
                    score,
                    extract_calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Extractor for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn score(&self, _page: &Page<'_>) -> u32 {
            self.score
        }

        fn extract(&self, _page: &Page<'_>, terms: &[TrackedTerm]) -> Result<Vec<RawRecord>, ExtractError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RawRecord {
                result: KeywordWindowExtractor::default()
                    .extract_windows(format!("{} war hier. Die Aktie steigt.", self.id), terms),
                meta: PageMeta::default(),
            }])
        }
    }

    fn assembler() -> PostingAssembler {
        PostingAssembler::from_settings(&Settings::default())
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    fn settings_with(order: &[&str]) -> Settings {
        Settings {
            extractors: order.iter().map(|s| s.to_string()).collect(),
            ..Settings::default()
        }
    }

    #[test]
    fn first_match_wins_over_higher_position() {
        let (low, low_calls) = Fixed::new("low", 3);
        let (high, high_calls) = Fixed::new("high", 8);
        let dispatcher = ParserDispatcher::new(vec![Box::new(low), Box::new(high)], assembler());
        let doc = Document::new("https://example.com/a", "<p>Die Aktie steigt.</p>");

        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(out.extractor.as_deref(), Some("high"));
        assert_eq!(out.postings.len(), 1);
        assert_eq!(out.postings[0].extractor, "high");
        assert_eq!(low_calls.load(Ordering::SeqCst), 0);
        assert_eq!(high_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn earlier_claimant_shadows_later_one() {
        let (a, a_calls) = Fixed::new("a", 7);
        let (b, b_calls) = Fixed::new("b", 20);
        let dispatcher = ParserDispatcher::new(vec![Box::new(a), Box::new(b)], assembler());
        let doc = Document::new("https://example.com/a", "");

        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(out.extractor.as_deref(), Some("a"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_claim_yields_nothing() {
        let (a, a_calls) = Fixed::new("a", 6);
        let dispatcher = ParserDispatcher::new(vec![Box::new(a)], assembler());
        let doc = Document::new("https://example.com/a", "<p>Aktie</p>");

        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert!(out.extractor.is_none());
        assert!(out.postings.is_empty());
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn builtin_registry_leaves_unrelated_pages_alone() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new("https://shop.example.com/cart", fixture("unrelated.html"));
        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert!(out.extractor.is_none());
        assert!(out.postings.is_empty());
    }

    #[test]
    fn missing_host_is_per_document_error() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new("not a url", "<p>Aktie</p>");
        assert!(matches!(
            dispatcher.dispatch(&doc, &[]),
            Err(ExtractError::MissingHost(_))
        ));
    }

    #[test]
    fn finanzen_article_is_claimed_and_cleaned() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new(
            "https://www.finanzen.net/nachricht/aktien/siemens-aktie-legt-zu-12345",
            fixture("finanzen_article.html"),
        );
        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(out.extractor.as_deref(), Some("finanzen_net"));
        assert_eq!(out.postings.len(), 1);

        let posting = &out.postings[0];
        for boilerplate in ["Startseite", "Cookies", "Anzeige", "Teilen", "Impressum", "dataLayer"] {
            assert!(!posting.raw_text.contains(boilerplate), "{}", boilerplate);
        }
        assert!(posting.raw_text.contains("Die Aktie von Siemens ist am Donnerstag"));
        assert_eq!(posting.user.display_name, "finanzen.net");
        assert_eq!(
            posting.teaser,
            "Die Siemens-Aktie profitiert am Donnerstag von starken Quartalszahlen."
        );
        assert!(posting.title.as_deref().unwrap_or_default().starts_with("Siemens-Aktie"));
    }

    #[test]
    fn forum_thread_yields_one_posting_per_matching_post() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new(
            "https://www.wallstreet-online.de/diskussion/500-beitraege/1234567-siemens",
            fixture("wallstreet_thread.html"),
        );
        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(out.extractor.as_deref(), Some("wallstreet_online"));

        let authors: Vec<&str> = out
            .postings
            .iter()
            .map(|p| p.user.display_name.as_str())
            .collect();
        assert_eq!(authors, vec!["Börsenfuchs", "Langfrist"]);
        assert_ne!(out.postings[0].user.user_id, out.postings[1].user.user_id);
        assert_ne!(out.postings[0].source_id, out.postings[1].source_id);

        for posting in &out.postings {
            assert_eq!(posting.teaser, posting.text);
            assert!(!posting.teaser.starts_with("Diskussion im Forum"));
        }
        assert_eq!(
            out.postings[0].teaser,
            "Ich halte die Aktie weiter. Siemens liefert solide Zahlen und die Bewertung ist fair."
        );

        let quoted = &out.postings[1].raw_text;
        assert!(!quoted.contains("Ich halte"));
        assert!(quoted.starts_with("Sehe ich genauso"));
        assert!(!out.postings[0].raw_text.contains("Anlageberatung"));
    }

    #[test]
    fn generic_news_page_is_claimed_by_catch_all() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new(
            "https://news.example.org/news/2024/markt-update",
            fixture("generic_news.html"),
        );
        let out = dispatcher.dispatch(&doc, &tracked_terms(["Aktie"])).unwrap();
        assert_eq!(out.extractor.as_deref(), Some("generic_article"));
        let posting = &out.postings[0];
        assert!(posting.raw_text.starts_with("Marktupdate: Anleger greifen"));
        assert!(posting.raw_text.contains("Der DAX hat am Mittag"));
        assert!(!posting.raw_text.contains("Meistgelesen"));
        assert!(!posting.raw_text.contains("Chart der Aktie"));
    }

    #[test]
    fn registry_order_decides_between_two_claimants() {
        let html = r#"<html><body><article itemprop="articleBody"><p>Die Aktie steigt.</p></article></body></html>"#;
        let doc = Document::new("https://www.finanzen.net/news/siemens", html);
        let terms = tracked_terms(["Aktie"]);

        let site_first = ParserDispatcher::from_settings(&settings_with(&["finanzen_net", "generic_article"])).unwrap();
        let generic_first = ParserDispatcher::from_settings(&settings_with(&["generic_article", "finanzen_net"])).unwrap();

        let inspection = site_first.inspect(&doc, &terms).unwrap();
        assert!(inspection.assessments.iter().all(|a| a.score >= a.threshold));

        assert_eq!(
            site_first.dispatch(&doc, &terms).unwrap().extractor.as_deref(),
            Some("finanzen_net")
        );
        assert_eq!(
            generic_first.dispatch(&doc, &terms).unwrap().extractor.as_deref(),
            Some("generic_article")
        );
    }

    #[test]
    fn dispatch_is_deterministic() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new(
            "https://www.wallstreet-online.de/diskussion/500-beitraege/1234567-siemens",
            fixture("wallstreet_thread.html"),
        );
        let terms = tracked_terms(["Aktie", "Siemens"]);
        let first = dispatcher.dispatch(&doc, &terms).unwrap();
        for _ in 0..3 {
            let again = dispatcher.dispatch(&doc, &terms).unwrap();
            assert_eq!(again.extractor, first.extractor);
            assert_eq!(again.postings, first.postings);
        }
    }

    #[test]
    fn inspect_reports_every_extractor() {
        let dispatcher = ParserDispatcher::from_settings(&Settings::default()).unwrap();
        let doc = Document::new(
            "https://www.finanzen.net/nachricht/aktien/siemens-aktie-legt-zu-12345",
            fixture("finanzen_article.html"),
        );
        let inspection = dispatcher.inspect(&doc, &tracked_terms(["Aktie"])).unwrap();
        let ids: Vec<&str> = inspection.assessments.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, DEFAULT_ORDER.to_vec());
        assert_eq!(inspection.winner.as_deref(), Some("finanzen_net"));
        assert_eq!(inspection.records.len(), 1);
        assert!(inspection.records[0].result.has_matches());
    }

    #[test]
    fn identifiers_follow_configuration() {
        let dispatcher = ParserDispatcher::from_settings(&settings_with(&["onvista", "ariva"])).unwrap();
        assert_eq!(dispatcher.identifiers(), vec!["onvista", "ariva"]);
    }

    #[test]
    fn unknown_identifier_is_fatal() {
        let err = ParserDispatcher::from_settings(&settings_with(&["finanzen_net", "boerse_xyz"]))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::UnknownExtractor(ref id) if id == "boerse_xyz"));
    }

    #[test]
    fn duplicate_identifier_is_fatal() {
        let err = ParserDispatcher::from_settings(&settings_with(&["ariva", "onvista", "ariva"]))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::DuplicateExtractor(ref id) if id == "ariva"));
    }

    #[test]
    fn empty_registry_is_fatal() {
        assert!(matches!(
            ParserDispatcher::from_settings(&settings_with(&[])),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn rules_for_unknown_extractor_are_fatal() {
        let mut settings = Settings::default();
        settings.rules.insert("boerse_xyz".into(), RuleTable::default());
        assert!(matches!(
            ParserDispatcher::from_settings(&settings),
            Err(RegistryError::RulesForUnknown(ref id)) if id == "boerse_xyz"
        ));
    }

    #[test]
    fn global_registry_is_built_once() {
        let a = ParserDispatcher::global(&Settings::default()).unwrap();
        let b = ParserDispatcher::global(&settings_with(&["ariva"])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
