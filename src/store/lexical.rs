//! SQLite FTS5 lexical store
//!
//! Term-match retrieval with BM25 ranking. The whole index is a derived
//! projection of the vector store and can be dropped and rebuilt at any
//! time via the fusion engine's `rebuild_lexical_index`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::store::LexicalStore;
use crate::types::SummaryMetadata;

const FTS_TABLE: &str = "summaries_fts";

/// Lexical store over a dedicated SQLite database with an FTS5 index
pub struct SqliteLexicalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLexicalStore {
    /// Open or create the store at the given path; ensures the index exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            "#,
        )?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        if !store.index_exists()? {
            store.create_index()?;
        }
        Ok(store)
    }

    /// In-memory store for tests; index is created eagerly
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_index()?;
        Ok(store)
    }
}

/// Escape special FTS5 characters in a query
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(escape_fts5_term)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single term if it contains FTS5 syntax characters
fn escape_fts5_term(term: &str) -> String {
    let special = ['"', '*', '(', ')', '{', '}', '[', ']', '^', '~', ':', '-', '+'];
    if !term.chars().any(|c| special.contains(&c)) {
        return term.to_string();
    }

    let mut escaped = String::with_capacity(term.len() + 4);
    escaped.push('"');
    for c in term.chars() {
        if c == '"' {
            escaped.push_str("\"\"");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('"');
    escaped
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl LexicalStore for SqliteLexicalStore {
    fn index_exists(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![FTS_TABLE],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn create_index(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
                text,
                session_id UNINDEXED,
                timestamp UNINDEXED,
                message_count UNINDEXED
            );",
        )?;
        Ok(())
    }

    fn delete_index(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("DROP TABLE IF EXISTS summaries_fts;")?;
        Ok(())
    }

    fn bulk_index(&self, docs: &[(String, SummaryMetadata)]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (text, metadata) in docs {
            tx.execute(
                "INSERT INTO summaries_fts (text, session_id, timestamp, message_count)
                 VALUES (?, ?, ?, ?)",
                params![
                    text,
                    metadata.session_id,
                    metadata.timestamp.to_rfc3339(),
                    metadata.message_count
                ],
            )?;
        }
        tx.commit()?;
        Ok(docs.len())
    }

    fn query_by_text(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(String, SummaryMetadata, f32)>> {
        let escaped = escape_fts5_query(query);
        if escaped.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT text, session_id, timestamp, message_count, bm25(summaries_fts) AS score
             FROM summaries_fts
             WHERE summaries_fts MATCH ?
             ORDER BY bm25(summaries_fts)
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![escaped, top_k as i64], |row| {
            let text: String = row.get(0)?;
            let session_id: String = row.get(1)?;
            let timestamp: String = row.get(2)?;
            let message_count: i64 = row.get(3)?;
            let score: f64 = row.get(4)?;
            Ok((text, session_id, timestamp, message_count, score))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (text, session_id, timestamp, message_count, score) = row?;
            // bm25() returns negative scores, closer to zero = better.
            // Normalize to a positive bounded relevance; fusion only uses
            // the rank order this preserves.
            let relevance = 1.0 / (1.0 + score.abs() as f32);
            out.push((
                text,
                SummaryMetadata {
                    session_id,
                    timestamp: parse_timestamp(&timestamp),
                    message_count,
                },
                relevance,
            ));
        }
        Ok(out)
    }
}
