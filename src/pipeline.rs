use std::sync::Arc;

use indicatif::ProgressBar;
use rayon::prelude::*;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assemble::{Posting, User};
use crate::config::Settings;
use crate::document::{Document, TrackedTerm};
use crate::error::PipelineError;
use crate::parser::registry::ParserDispatcher;
use crate::persist::deadletter::DeadLetterStore;
use crate::persist::{Entity, PersistenceGateway};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub documents: usize,
    pub claimed: usize,
    pub unclaimed: usize,
    /// Documents dropped on a per-document extraction error.
    pub skipped: usize,
    pub postings: usize,
    pub persisted: usize,
    pub dead_lettered: usize,
    pub dead_letter_failures: usize,
}

#[derive(Debug, Default)]
struct ExtractCounts {
    documents: usize,
    claimed: usize,
    unclaimed: usize,
    skipped: usize,
    postings: usize,
}

impl ExtractCounts {
    fn merge(mut self, other: Self) -> Self {
        self.documents += other.documents;
        self.claimed += other.claimed;
        self.unclaimed += other.unclaimed;
        self.skipped += other.skipped;
        self.postings += other.postings;
        self
    }
}

/// Outcome of submitting one posting and its user.
#[derive(Debug, Default)]
struct Submission {
    persisted: bool,
    dead_lettered: usize,
    dead_letter_failures: usize,
    failure: Option<PipelineError>,
}

impl Submission {
    fn park<E: Entity>(&mut self, store: &DeadLetterStore, entity: &E) {
        match store.write(entity) {
            Ok(path) => {
                info!(entity = E::KIND, id = %entity.entity_id(), path = %path.display(), "dead-lettered");
                self.dead_lettered += 1;
            }
            Err(e) => {
                error!(entity = E::KIND, id = %entity.entity_id(), "dead-letter write failed: {}", e);
                self.dead_letter_failures += 1;
            }
        }
    }
}

/// Documents in, persisted postings out. Extraction runs on a rayon pool,
/// persistence on tokio blocking tasks behind a semaphore.
pub struct IngestionPipeline {
    dispatcher: Arc<ParserDispatcher>,
    gateway: Arc<dyn PersistenceGateway>,
    dead_letters: Arc<DeadLetterStore>,
    terms: Arc<Vec<TrackedTerm>>,
    extraction_workers: usize,
    persist_workers: usize,
    abort_on_failure: bool,
    progress: ProgressBar,
}

impl IngestionPipeline {
    pub fn new(
        dispatcher: Arc<ParserDispatcher>,
        gateway: Arc<dyn PersistenceGateway>,
        dead_letters: DeadLetterStore,
        terms: Vec<TrackedTerm>,
        settings: &Settings,
    ) -> Self {
        Self {
            dispatcher,
            gateway,
            dead_letters: Arc::new(dead_letters),
            terms: Arc::new(terms),
            extraction_workers: settings.extraction_workers.max(1),
            persist_workers: settings.persist_workers.max(1),
            abort_on_failure: settings.abort_on_persist_failure,
            progress: ProgressBar::hidden(),
        }
    }

    /// Advance `progress` once per extracted document.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, docs: Vec<Document>) -> Result<PipelineStats, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.extraction_workers)
            .thread_name(|i| format!("extract-{}", i))
            .build()?;

        let (tx, mut rx) = mpsc::channel::<Posting>(self.persist_workers * 4);

        let extraction = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let terms = Arc::clone(&self.terms);
            let progress = self.progress.clone();
            tokio::task::spawn_blocking(move || {
                pool.install(|| {
                    docs.par_iter()
                        .map(|doc| {
                            let counts = extract_one(&dispatcher, doc, &terms, &tx);
                            progress.inc(1);
                            counts
                        })
                        .reduce(ExtractCounts::default, ExtractCounts::merge)
                })
            })
        };

        let semaphore = Arc::new(Semaphore::new(self.persist_workers));
        let mut tasks = JoinSet::new();
        let mut stats = PipelineStats::default();
        let mut failure = None;

        while let Some(posting) = rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let gateway = Arc::clone(&self.gateway);
            let dead_letters = Arc::clone(&self.dead_letters);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                submit(gateway.as_ref(), &dead_letters, posting)
            });

            while let Some(done) = tasks.try_join_next() {
                self.record(done?, &mut stats, &mut failure);
            }
            if failure.is_some() {
                rx.close();
                break;
            }
        }

        while let Some(done) = tasks.join_next().await {
            self.record(done?, &mut stats, &mut failure);
        }
        // Unblocks extraction workers still waiting on a full channel.
        drop(rx);

        let counts = extraction.await?;
        stats.documents = counts.documents;
        stats.claimed = counts.claimed;
        stats.unclaimed = counts.unclaimed;
        stats.skipped = counts.skipped;
        stats.postings = counts.postings;
        self.progress.finish_and_clear();

        if let Some(e) = failure {
            error!("aborting run: {}", e);
            return Err(e);
        }

        info!(
            documents = stats.documents,
            claimed = stats.claimed,
            postings = stats.postings,
            persisted = stats.persisted,
            dead_lettered = stats.dead_lettered,
            "ingestion finished"
        );
        Ok(stats)
    }

    fn record(&self, done: Submission, stats: &mut PipelineStats, failure: &mut Option<PipelineError>) {
        if done.persisted {
            stats.persisted += 1;
        }
        stats.dead_lettered += done.dead_lettered;
        stats.dead_letter_failures += done.dead_letter_failures;
        if self.abort_on_failure && failure.is_none() {
            *failure = done.failure;
        }
    }
}

fn extract_one(
    dispatcher: &ParserDispatcher,
    doc: &Document,
    terms: &[TrackedTerm],
    tx: &mpsc::Sender<Posting>,
) -> ExtractCounts {
    let mut counts = ExtractCounts {
        documents: 1,
        ..Default::default()
    };
    if tx.is_closed() {
        return counts;
    }

    match dispatcher.dispatch(doc, terms) {
        Ok(dispatched) => {
            if dispatched.extractor.is_some() {
                counts.claimed += 1;
            } else {
                counts.unclaimed += 1;
            }
            for posting in dispatched.postings {
                counts.postings += 1;
                if tx.blocking_send(posting).is_err() {
                    debug!(url = %doc.url, "persistence stage closed, dropping postings");
                    break;
                }
            }
        }
        Err(e) => {
            warn!(url = %doc.url, "document skipped: {}", e);
            counts.skipped += 1;
        }
    }
    counts
}

/// Save the user, then the posting. A posting whose user could not be saved
/// is never submitted; both go to the dead-letter store instead.
fn submit(gateway: &dyn PersistenceGateway, dead_letters: &DeadLetterStore, posting: Posting) -> Submission {
    let mut submission = Submission::default();

    if let Err(e) = gateway.save_user(&posting.user) {
        warn!(entity = User::KIND, id = %posting.user.user_id, url = %posting.source_url, "save failed: {}", e);
        submission.park(dead_letters, &posting.user);
        submission.park(dead_letters, &posting);
        submission.failure = Some(PipelineError::Persist {
            entity: User::KIND,
            id: posting.user.user_id.clone(),
            source: e,
        });
        return submission;
    }

    match gateway.save_posting(&posting) {
        Ok(()) => {
            debug!(id = %posting.source_id, url = %posting.source_url, "posting saved");
            submission.persisted = true;
        }
        Err(e) => {
            warn!(entity = Posting::KIND, id = %posting.source_id, url = %posting.source_url, "save failed: {}", e);
            submission.park(dead_letters, &posting);
            submission.failure = Some(PipelineError::Persist {
                entity: Posting::KIND,
                id: posting.source_id.clone(),
                source: e,
            });
        }
    }
    submission
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::document::tracked_terms;
    use crate::error::PersistError;
    use crate::persist::deadletter::ProcessedAction;
    use crate::persist::sqlite::SqliteStore;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_users: bool,
        fail_postings: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PersistenceGateway for Recorder {
        fn save_user(&self, user: &User) -> Result<(), PersistError> {
            self.calls.lock().unwrap().push(format!("user:{}", user.user_id));
            if self.fail_users {
                return Err(PersistError::Backend("users table locked".into()));
            }
            Ok(())
        }

        fn save_posting(&self, posting: &Posting) -> Result<(), PersistError> {
            self.calls.lock().unwrap().push(format!("posting:{}", posting.source_id));
            if self.fail_postings {
                return Err(PersistError::Backend("connection refused".into()));
            }
            Ok(())
        }
    }

    fn settings(abort: bool) -> Settings {
        Settings {
            extraction_workers: 2,
            persist_workers: 2,
            abort_on_persist_failure: abort,
            ..Settings::default()
        }
    }

    fn article(i: usize) -> Document {
        Document::new(
            format!("https://www.finanzen.net/nachricht/aktien/meldung-{}", i),
            format!(
                "<html><body><nav>Aktie Menü</nav><div class=\"article-body\"><p>Meldung {} zur Aktie von Siemens.</p></div></body></html>",
                i
            ),
        )
    }

    fn pipeline(gateway: Arc<dyn PersistenceGateway>, backup: &Path, settings: &Settings) -> IngestionPipeline {
        let dispatcher = Arc::new(ParserDispatcher::from_settings(settings).unwrap());
        let dead_letters = DeadLetterStore::new(backup, backup.join("processed"), ProcessedAction::Move);
        IngestionPipeline::new(dispatcher, gateway, dead_letters, tracked_terms(["Aktie"]), settings)
    }

    fn backups(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn persists_every_claimed_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let settings = settings(false);
        let docs: Vec<Document> = (0..20).map(article).collect();

        let stats = pipeline(store.clone(), dir.path(), &settings).run(docs).await.unwrap();
        assert_eq!(stats.documents, 20);
        assert_eq!(stats.claimed, 20);
        assert_eq!(stats.postings, 20);
        assert_eq!(stats.persisted, 20);
        assert_eq!(stats.dead_lettered, 0);

        let db = store.get_stats().unwrap();
        assert_eq!(db.postings, 20);
        assert_eq!(db.users, 1);
    }

    #[tokio::test]
    async fn user_is_saved_before_its_posting() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Recorder::default());
        let settings = settings(false);
        let docs: Vec<Document> = (0..8).map(article).collect();

        pipeline(gateway.clone(), dir.path(), &settings).run(docs).await.unwrap();

        let calls = gateway.calls();
        assert_eq!(calls.len(), 16);
        for (i, call) in calls.iter().enumerate() {
            if call.starts_with("posting:") {
                assert!(calls[..i].iter().any(|c| c.starts_with("user:")));
            }
        }
    }

    #[tokio::test]
    async fn failing_gateway_dead_letters_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Recorder {
            fail_postings: true,
            ..Default::default()
        });
        let settings = settings(false);
        let docs: Vec<Document> = (0..5).map(article).collect();

        let stats = pipeline(gateway, dir.path(), &settings).run(docs).await.unwrap();
        assert_eq!(stats.documents, 5);
        assert_eq!(stats.persisted, 0);
        assert_eq!(stats.dead_lettered, 5);

        let files = backups(dir.path());
        assert_eq!(files.len(), 5);
        assert!(files.iter().all(|f| f.starts_with("Posting") && f.ends_with(".json")));
    }

    #[tokio::test]
    async fn failed_user_parks_user_and_posting_without_submitting_posting() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Recorder {
            fail_users: true,
            ..Default::default()
        });
        let settings = settings(false);

        let stats = pipeline(gateway.clone(), dir.path(), &settings)
            .run(vec![article(1)])
            .await
            .unwrap();
        assert_eq!(stats.dead_lettered, 2);
        assert!(gateway.calls().iter().all(|c| c.starts_with("user:")));

        let files = backups(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("Posting"));
        assert!(files[1].starts_with("User"));
    }

    #[tokio::test]
    async fn abort_flag_turns_failure_into_error() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Recorder {
            fail_postings: true,
            ..Default::default()
        });
        let settings = settings(true);
        let docs: Vec<Document> = (0..3).map(article).collect();

        let err = pipeline(gateway, dir.path(), &settings).run(docs).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persist { entity: "Posting", .. }));
        assert!(!backups(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn bad_and_unclaimed_documents_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(Recorder::default());
        let settings = settings(false);
        let docs = vec![
            article(1),
            Document::new("not a url", "<p>Aktie</p>"),
            Document::new("https://shop.example.com/cart", "<p>Aktie</p>"),
        ];

        let stats = pipeline(gateway, dir.path(), &settings).run(docs).await.unwrap();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.unclaimed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.persisted, 1);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(false);
        let stats = pipeline(Arc::new(Recorder::default()), dir.path(), &settings)
            .run(Vec::new())
            .await
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
    }
}
