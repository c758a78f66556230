use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use super::PersistenceGateway;
use crate::assemble::{Posting, User};
use crate::document::Document;
use crate::error::PersistError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pages (
        id         INTEGER PRIMARY KEY,
        url        TEXT UNIQUE NOT NULL,
        visited    BOOLEAN NOT NULL DEFAULT 0,
        visited_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

    CREATE TABLE IF NOT EXISTS documents (
        id         INTEGER PRIMARY KEY,
        page_id    INTEGER REFERENCES pages(id),
        url        TEXT NOT NULL,
        html       TEXT,
        status     INTEGER,
        error      TEXT,
        latency_ms INTEGER,
        fetched_at TEXT NOT NULL,
        processed  BOOLEAN NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_documents_processed ON documents(processed);

    CREATE TABLE IF NOT EXISTS users (
        user_id      TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        language     TEXT NOT NULL,
        updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS postings (
        source_id  TEXT PRIMARY KEY,
        user_id    TEXT NOT NULL REFERENCES users(user_id),
        source_url TEXT NOT NULL,
        title      TEXT,
        teaser     TEXT NOT NULL,
        raw_text   TEXT NOT NULL,
        text       TEXT NOT NULL,
        language   TEXT NOT NULL,
        truncated  BOOLEAN NOT NULL,
        extractor  TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_postings_user ON postings(user_id);
    CREATE INDEX IF NOT EXISTS idx_postings_url ON postings(source_url);
";

/// Result of fetching one queued page.
#[derive(Debug, Clone)]
pub struct FetchRow {
    pub page_id: i64,
    pub url: String,
    pub html: Option<String>,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

/// A fetched document waiting for ingestion.
#[derive(Debug, Clone)]
pub struct QueuedDocument {
    pub id: i64,
    pub document: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub pages: usize,
    pub visited: usize,
    pub fetched: usize,
    pub fetch_errors: usize,
    pub unprocessed: usize,
    pub users: usize,
    pub postings: usize,
}

/// SQLite-backed URL queue, document store and persistence gateway.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Queue ──

    pub fn insert_pages(&self, urls: &[String]) -> Result<usize, PersistError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url) VALUES (?1)")?;
            for url in urls {
                count += stmt.execute(params![url])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn fetch_unvisited(&self, limit: Option<usize>) -> Result<Vec<(i64, String)>, PersistError> {
        let sql = format!(
            "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id{}",
            limit_clause(limit)
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Store a fetch result and mark its page visited.
    pub fn save_fetched(&self, row: &FetchRow) -> Result<(), PersistError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO documents (page_id, url, html, status, error, latency_ms, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.page_id,
                row.url,
                row.html,
                row.status,
                row.error,
                row.latency_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
            params![row.page_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fetched documents with markup that have not been ingested yet.
    pub fn fetch_unprocessed(&self, limit: Option<usize>) -> Result<Vec<QueuedDocument>, PersistError> {
        let sql = format!(
            "SELECT id, url, html, fetched_at FROM documents
             WHERE html IS NOT NULL AND processed = 0
             ORDER BY id{}",
            limit_clause(limit)
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let fetched_at: String = row.get(3)?;
                let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc);
                Ok(QueuedDocument {
                    id: row.get(0)?,
                    document: Document {
                        url: row.get(1)?,
                        html: row.get(2)?,
                        fetched_at,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_processed(&self, ids: &[i64]) -> Result<(), PersistError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE documents SET processed = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── Stats ──

    pub fn get_stats(&self) -> Result<Stats, PersistError> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<usize, rusqlite::Error> { conn.query_row(sql, [], |r| r.get(0)) };
        Ok(Stats {
            pages: count("SELECT COUNT(*) FROM pages")?,
            visited: count("SELECT COUNT(*) FROM pages WHERE visited = 1")?,
            fetched: count("SELECT COUNT(*) FROM documents WHERE html IS NOT NULL")?,
            fetch_errors: count("SELECT COUNT(*) FROM documents WHERE error IS NOT NULL")?,
            unprocessed: count("SELECT COUNT(*) FROM documents WHERE html IS NOT NULL AND processed = 0")?,
            users: count("SELECT COUNT(*) FROM users")?,
            postings: count("SELECT COUNT(*) FROM postings")?,
        })
    }
}

impl PersistenceGateway for SqliteStore {
    fn save_user(&self, user: &User) -> Result<(), PersistError> {
        self.conn().execute(
            "INSERT INTO users (user_id, display_name, language) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                language = excluded.language,
                updated_at = datetime('now')",
            params![user.user_id, user.display_name, user.language],
        )?;
        Ok(())
    }

    fn save_posting(&self, p: &Posting) -> Result<(), PersistError> {
        self.conn().execute(
            "INSERT INTO postings
             (source_id, user_id, source_url, title, teaser, raw_text, text, language, truncated, extractor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(source_id) DO UPDATE SET
                title = excluded.title,
                teaser = excluded.teaser,
                text = excluded.text,
                truncated = excluded.truncated,
                extractor = excluded.extractor",
            params![
                p.source_id,
                p.user.user_id,
                p.source_url,
                p.title,
                p.teaser,
                p.raw_text,
                p.text,
                p.language,
                p.truncated,
                p.extractor,
                p.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn limit_clause(limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    }
}
