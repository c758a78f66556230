mod assemble;
mod config;
mod document;
mod error;
mod fetch;
mod parser;
mod persist;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, warn};

use crate::config::Settings;
use crate::document::{tracked_terms, Document, TrackedTerm};
use crate::fetch::Fetcher;
use crate::parser::registry::ParserDispatcher;
use crate::persist::deadletter::DeadLetterStore;
use crate::persist::sqlite::SqliteStore;
use crate::pipeline::{IngestionPipeline, PipelineStats};

#[derive(Parser)]
#[command(name = "posting_harvester", about = "Harvest keyword postings from finance news and forum pages")]
struct Cli {
    /// Configuration file (default: ./harvester.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue URLs and download them into the document store
    Fetch {
        /// URL to queue (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
        /// File with one URL per line
        #[arg(long)]
        urls_file: Option<PathBuf>,
        /// Max pages to fetch (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract postings from fetched documents and persist them
    Ingest {
        /// Read documents from a JSON-lines file instead of the document store
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Max documents to ingest (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Tracked term, in addition to the configured ones (repeatable)
        #[arg(short, long = "term")]
        terms: Vec<String>,
    },
    /// Fetch + ingest in one go
    Run {
        #[arg(long = "url")]
        urls: Vec<String>,
        #[arg(long)]
        urls_file: Option<PathBuf>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long = "term")]
        terms: Vec<String>,
    },
    /// Dry run on a local HTML file: extractor scores and keyword windows
    Inspect {
        file: PathBuf,
        /// URL the file was fetched from
        #[arg(long)]
        url: String,
        #[arg(short, long = "term")]
        terms: Vec<String>,
    },
    /// Resubmit dead-lettered users and postings
    Replay,
    /// List registered extractors in dispatch order
    Extractors,
    /// Show queue and persistence statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    let result = match cli.command {
        Commands::Fetch { urls, urls_file, limit } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let stats = fetch_pages(&settings, &store, urls, urls_file.as_deref(), limit).await?;
            if let Some(stats) = stats {
                println!(
                    "Done: {} fetched ({} ok, {} errors).",
                    stats.total, stats.ok, stats.errors
                );
            }
            Ok(())
        }
        Commands::Ingest { input, limit, terms } => {
            let dispatcher = registry(&settings)?;
            let terms = run_terms(&settings, terms);
            let store = Arc::new(SqliteStore::open(&settings.db_path)?);

            let (ids, docs): (Vec<i64>, Vec<Document>) = match input {
                Some(path) => {
                    let mut docs = document::load_jsonl(&path)?;
                    if let Some(n) = limit {
                        docs.truncate(n);
                    }
                    (Vec::new(), docs)
                }
                None => store
                    .fetch_unprocessed(limit)?
                    .into_iter()
                    .map(|q| (q.id, q.document))
                    .unzip(),
            };
            if docs.is_empty() {
                println!("No documents to ingest. Run 'fetch' first or pass --input.");
                return Ok(());
            }

            println!("Ingesting {} documents...", docs.len());
            let stats = ingest(&settings, dispatcher, Arc::clone(&store), terms, docs).await?;
            store.mark_processed(&ids)?;
            print_pipeline_stats(&stats);
            Ok(())
        }
        Commands::Run { urls, urls_file, limit, terms } => {
            let dispatcher = registry(&settings)?;
            let terms = run_terms(&settings, terms);
            let store = Arc::new(SqliteStore::open(&settings.db_path)?);

            // Phase 1: Fetch
            let t_fetch = Instant::now();
            if let Some(stats) = fetch_pages(&settings, &store, urls, urls_file.as_deref(), limit).await? {
                println!(
                    "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                    stats.total,
                    stats.ok,
                    stats.errors,
                    t_fetch.elapsed().as_secs_f64()
                );
            }

            // Phase 2: Ingest
            let t_ingest = Instant::now();
            let (ids, docs): (Vec<i64>, Vec<Document>) = store
                .fetch_unprocessed(None)?
                .into_iter()
                .map(|q| (q.id, q.document))
                .unzip();
            if docs.is_empty() {
                println!("Nothing to ingest (all fetched pages had errors).");
                return Ok(());
            }
            println!("Ingesting {} documents...", docs.len());
            let stats = ingest(&settings, dispatcher, Arc::clone(&store), terms, docs).await?;
            store.mark_processed(&ids)?;
            println!("Ingested in {:.1}s", t_ingest.elapsed().as_secs_f64());
            print_pipeline_stats(&stats);
            Ok(())
        }
        Commands::Inspect { file, url, terms } => {
            let dispatcher = registry(&settings)?;
            let terms = run_terms(&settings, terms);
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let doc = Document::new(url, html);
            let inspection = dispatcher.inspect(&doc, &terms)?;

            println!("{:<20} | {:>5} | {:>9} | {}", "Extractor", "Score", "Threshold", "Claims");
            println!("{}", "-".repeat(50));
            for a in &inspection.assessments {
                let claims = if a.score >= a.threshold { "yes" } else { "" };
                println!("{:<20} | {:>5} | {:>9} | {}", a.id, a.score, a.threshold, claims);
            }

            match &inspection.winner {
                None => println!("\nNo extractor claims this document."),
                Some(winner) => {
                    println!("\nWinner: {} ({} records)", winner, inspection.records.len());
                    for (i, record) in inspection.records.iter().enumerate() {
                        let r = &record.result;
                        println!(
                            "\n--- Record {} | author: {} | {} windows | truncated: {}",
                            i + 1,
                            record.meta.author.as_deref().unwrap_or("-"),
                            r.windows.len(),
                            r.truncated
                        );
                        println!("filtered: {}", truncate(&r.filtered_text, 160));
                        for w in &r.windows {
                            println!(
                                "  [{}..{}] {}",
                                w.start_word,
                                w.end_word,
                                truncate(w.text(&r.filtered_text), 120)
                            );
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Replay => {
            let store = SqliteStore::open(&settings.db_path)?;
            let dead_letters = DeadLetterStore::from_settings(&settings);
            let pending = dead_letters.pending()?;
            if pending.is_empty() {
                println!("No dead-lettered entities in {}.", dead_letters.dir().display());
                return Ok(());
            }
            println!(
                "Replaying {} users and {} postings...",
                pending.users.len(),
                pending.postings.len()
            );
            let stats = dead_letters.replay(&store)?;
            println!(
                "Replayed {}, failed {}, skipped {}.",
                stats.replayed, stats.failed, stats.skipped
            );
            Ok(())
        }
        Commands::Extractors => {
            let dispatcher = registry(&settings)?;
            for (i, id) in dispatcher.identifiers().iter().enumerate() {
                println!("{:>2}. {}", i + 1, id);
            }
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&settings.db_path)?;
            let s = store.get_stats()?;
            let pending = DeadLetterStore::from_settings(&settings).pending()?;
            println!("Pages:        {}", s.pages);
            println!("Visited:      {}", s.visited);
            println!("Fetched:      {}", s.fetched);
            println!("Fetch errors: {}", s.fetch_errors);
            println!("Unprocessed:  {}", s.unprocessed);
            println!("Users:        {}", s.users);
            println!("Postings:     {}", s.postings);
            println!("Dead letters: {}", pending.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Build the process-wide registry. A bad configuration stops the run here,
/// before any document is touched.
fn registry(settings: &Settings) -> anyhow::Result<Arc<ParserDispatcher>> {
    ParserDispatcher::global(settings)
        .inspect_err(|e| error!("invalid extractor configuration: {}", e))
        .context("building extractor registry")
}

fn run_terms(settings: &Settings, extra: Vec<String>) -> Vec<TrackedTerm> {
    let terms = tracked_terms(settings.terms.iter().cloned().chain(extra));
    if terms.is_empty() {
        warn!("no tracked terms configured; only unmatched-page postings can be produced");
    }
    terms
}

async fn fetch_pages(
    settings: &Settings,
    store: &SqliteStore,
    urls: Vec<String>,
    urls_file: Option<&Path>,
    limit: Option<usize>,
) -> anyhow::Result<Option<fetch::FetchStats>> {
    let mut queued = urls;
    if let Some(path) = urls_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        queued.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    if !queued.is_empty() {
        let inserted = store.insert_pages(&queued)?;
        println!("Queued {} new URLs ({} given)", inserted, queued.len());
    }

    let pages = store.fetch_unvisited(limit)?;
    if pages.is_empty() {
        println!("No unvisited pages. Pass --url or --urls-file.");
        return Ok(None);
    }
    println!("Fetching {} pages (streaming to DB)...", pages.len());
    let stats = Fetcher::from_settings(settings)?.fetch_streaming(store, pages).await?;
    Ok(Some(stats))
}

async fn ingest(
    settings: &Settings,
    dispatcher: Arc<ParserDispatcher>,
    store: Arc<SqliteStore>,
    terms: Vec<TrackedTerm>,
    docs: Vec<Document>,
) -> anyhow::Result<PipelineStats> {
    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let pipeline = IngestionPipeline::new(
        dispatcher,
        store,
        DeadLetterStore::from_settings(settings),
        terms,
        settings,
    )
    .with_progress(pb);
    Ok(pipeline.run(docs).await?)
}

fn print_pipeline_stats(s: &PipelineStats) {
    println!(
        "Documents: {} ({} claimed, {} unclaimed, {} skipped)",
        s.documents, s.claimed, s.unclaimed, s.skipped
    );
    println!(
        "Postings:  {} ({} persisted, {} dead-lettered)",
        s.postings, s.persisted, s.dead_lettered
    );
    if s.dead_letter_failures > 0 {
        println!("WARNING: {} dead-letter writes failed", s.dead_letter_failures);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
