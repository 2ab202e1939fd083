//! SQLite-backed vector store
//!
//! Embeddings are stored as little-endian f32 BLOBs and scanned with
//! brute-force cosine distance. Collections here are small (bounded by
//! summary retention), so a linear scan beats maintaining an ANN index.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::embedding::cosine_distance;
use crate::error::Result;
use crate::store::VectorStore;
use crate::types::{StoredSummary, SummaryMetadata};

/// Vector store over a dedicated SQLite database
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    /// Open or create the store at the given path
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
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl VectorStore for SqliteVectorStore {
    fn upsert(
        &self,
        id: &str,
        text: &str,
        vector: &[f32],
        metadata: &SummaryMetadata,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO summaries (id, text, embedding, session_id, timestamp, message_count)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                text,
                vector_to_blob(vector),
                metadata.session_id,
                metadata.timestamp.to_rfc3339(),
                metadata.message_count
            ],
        )?;
        Ok(())
    }

    fn query_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, SummaryMetadata, f32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT text, embedding, session_id, timestamp, message_count FROM summaries",
        )?;
        let rows = stmt.query_map([], |row| {
            let text: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let session_id: String = row.get(2)?;
            let timestamp: String = row.get(3)?;
            let message_count: i64 = row.get(4)?;
            Ok((text, blob, session_id, timestamp, message_count))
        })?;

        let mut scored: Vec<(String, SummaryMetadata, f32)> = Vec::new();
        for row in rows {
            let (text, blob, session_id, timestamp, message_count) = row?;
            let embedding = blob_to_vector(&blob);
            if embedding.len() != vector.len() {
                // Dimension drift after a model change; skip rather than
                // produce a meaningless score
                continue;
            }
            let distance = cosine_distance(vector, &embedding);
            scored.push((
                text,
                SummaryMetadata {
                    session_id,
                    timestamp: parse_timestamp(&timestamp),
                    message_count,
                },
                distance,
            ));
        }

        scored.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn scan_all(&self) -> Result<Vec<StoredSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, text, session_id, timestamp, message_count FROM summaries")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let text: String = row.get(1)?;
            let session_id: String = row.get(2)?;
            let timestamp: String = row.get(3)?;
            let message_count: i64 = row.get(4)?;
            Ok(StoredSummary {
                id,
                text,
                metadata: SummaryMetadata {
                    session_id,
                    timestamp: parse_timestamp(&timestamp),
                    message_count,
                },
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn delete(&self, ids: &[String]) -> Result<usize> {
        let conn = self.conn.lock();
        let mut removed = 0usize;
        for id in ids {
            removed += conn.execute("DELETE FROM summaries WHERE id = ?", params![id])?;
        }
        Ok(removed)
    }

    fn delete_all(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM summaries", [])?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
