use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Settings;
use crate::persist::sqlite::{FetchRow, SqliteStore};

const BASE_BACKOFF_MS: u64 = 2000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("posting_harvester/", env!("CARGO_PKG_VERSION"));

pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Downloads queued pages and streams the results into the document store.
pub struct Fetcher {
    client: Client,
    concurrency: usize,
    retries: u32,
}

impl Fetcher {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            concurrency: settings.fetch_concurrency.max(1),
            retries: settings.fetch_retries,
        })
    }

    /// Fetch pages concurrently, saving each result as it arrives.
    pub async fn fetch_streaming(&self, store: &SqliteStore, pages: Vec<(i64, String)>) -> Result<FetchStats> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let total = pages.len();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchRow>(self.concurrency * 2);

        for (page_id, url) in pages {
            let client = self.client.clone();
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let retries = self.retries;

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let row = fetch_with_retry(&client, page_id, &url, retries).await;
                let _ = tx.send(row).await;
            });
        }

        // rx closes once every task has sent its row
        drop(tx);

        let mut ok = 0usize;
        let mut errors = 0usize;
        while let Some(row) = rx.recv().await {
            if row.error.is_some() {
                errors += 1;
            } else {
                ok += 1;
            }
            store.save_fetched(&row)?;
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);

        Ok(FetchStats { total, ok, errors })
    }
}

async fn fetch_with_retry(client: &Client, page_id: i64, url: &str, retries: u32) -> FetchRow {
    let mut attempt = 0;
    loop {
        let row = fetch_one(client, page_id, url).await;
        if !should_retry(&row) || attempt >= retries {
            return row;
        }

        let delay = backoff(attempt);
        warn!(
            url,
            "Transient failure (attempt {}/{}), backing off {:.1}s",
            attempt + 1,
            retries,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn fetch_one(client: &Client, page_id: i64, url: &str) -> FetchRow {
    let start = Instant::now();
    let mut row = FetchRow {
        page_id,
        url: url.to_string(),
        html: None,
        status: None,
        error: None,
        latency_ms: None,
    };

    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            row.status = Some(status.as_u16());
            if status.is_success() {
                match response.text().await {
                    Ok(body) => row.html = Some(body),
                    Err(e) => row.error = Some(e.to_string()),
                }
            } else {
                row.error = Some(format!("HTTP {}", status.as_u16()));
            }
        }
        Err(e) => row.error = Some(e.to_string()),
    }
    row.latency_ms = Some(start.elapsed().as_millis() as i64);
    row
}

/// Rate limits, server errors and transport failures are worth another try.
fn should_retry(row: &FetchRow) -> bool {
    if row.error.is_none() {
        return false;
    }
    match row.status.and_then(|s| StatusCode::from_u16(s).ok()) {
        Some(status) => status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        None => true,
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt))
}
