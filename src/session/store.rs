//! SQLite persistence for sessions and messages

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::error::Result;
use crate::types::{Message, Session, SessionStatus};

const SCHEMA_VERSION: i32 = 1;

/// Durable store for session rows and their append-only message log
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
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
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let current: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    message_count INTEGER NOT NULL DEFAULT 0,
                    total_tokens INTEGER NOT NULL DEFAULT 0,
                    summary TEXT
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL REFERENCES sessions(session_id),
                    user_text TEXT NOT NULL,
                    assistant_text TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    tokens_used INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_messages_session
                    ON messages(session_id, timestamp);
                CREATE INDEX IF NOT EXISTS idx_sessions_status
                    ON sessions(status);
                "#,
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)",
                params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
            )?;
            info!(version = SCHEMA_VERSION, "session schema ready");
        }

        Ok(())
    }

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (session_id, start_time, end_time, status, message_count, total_tokens, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                session.session_id,
                session.start_time.to_rfc3339(),
                session.end_time.map(|t| t.to_rfc3339()),
                session.status.to_string(),
                session.message_count,
                session.total_tokens,
                session.summary
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT session_id, start_time, end_time, status, message_count, total_tokens, summary
                 FROM sessions WHERE session_id = ?",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Most recently started session still marked active, if any
    pub fn latest_active_session(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT session_id, start_time, end_time, status, message_count, total_tokens, summary
                 FROM sessions WHERE status = 'active'
                 ORDER BY start_time DESC LIMIT 1",
                [],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Append one exchange and bump the session counters in a single
    /// transaction.
    pub fn append_message(&self, message: &Message) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (session_id, user_text, assistant_text, timestamp, tokens_used)
             VALUES (?, ?, ?, ?, ?)",
            params![
                message.session_id,
                message.user_text,
                message.assistant_text,
                message.timestamp.to_rfc3339(),
                message.tokens_used
            ],
        )?;
        tx.execute(
            "UPDATE sessions
             SET message_count = message_count + 1,
                 total_tokens = total_tokens + ?
             WHERE session_id = ?",
            params![message.tokens_used, message.session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All exchanges of a session in insertion order
    pub fn messages_for_session(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, user_text, assistant_text, timestamp, tokens_used
             FROM messages WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let timestamp: String = row.get(3)?;
            Ok(Message {
                session_id: row.get(0)?,
                user_text: row.get(1)?,
                assistant_text: row.get(2)?,
                timestamp: parse_timestamp(&timestamp),
                tokens_used: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Timestamp of the most recent exchange, or None if the session has
    /// no messages yet.
    pub fn last_message_time(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM messages WHERE session_id = ?
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|r| parse_timestamp(&r)))
    }

    /// Transition a session to ended. The status guard makes the
    /// transition exactly-once: the first caller gets `true`, every later
    /// caller gets `false` and must treat the session as already ended.
    pub fn mark_ended(
        &self,
        session_id: &str,
        end_time: DateTime<Utc>,
        summary: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE sessions
             SET status = 'ended', end_time = ?, summary = ?
             WHERE session_id = ? AND status = 'active'",
            params![end_time.to_rfc3339(), summary, session_id],
        )?;
        Ok(updated == 1)
    }

    pub fn session_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let start_time: String = row.get(1)?;
    let end_time: Option<String> = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(Session {
        session_id: row.get(0)?,
        start_time: parse_timestamp(&start_time),
        end_time: end_time.map(|t| parse_timestamp(&t)),
        status: status.parse().unwrap_or(SessionStatus::Ended),
        message_count: row.get(4)?,
        total_tokens: row.get(5)?,
        summary: row.get(6)?,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            message_count: 0,
            total_tokens: 0,
            summary: None,
        }
    }

    fn exchange(session_id: &str, user: &str, assistant: &str, tokens: i64) -> Message {
        Message {
            session_id: session_id.to_string(),
            user_text: user.to_string(),
            assistant_text: assistant.to_string(),
            timestamp: Utc::now(),
            tokens_used: tokens,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert_session(&new_session("s1")).unwrap();

        let got = store.get_session("s1").unwrap().unwrap();
        assert_eq!(got.session_id, "s1");
        assert_eq!(got.status, SessionStatus::Active);
        assert!(store.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_append_updates_counters() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert_session(&new_session("s1")).unwrap();
        store.append_message(&exchange("s1", "hi", "hello", 5)).unwrap();
        store.append_message(&exchange("s1", "more", "sure", 7)).unwrap();

        let got = store.get_session("s1").unwrap().unwrap();
        assert_eq!(got.message_count, 2);
        assert_eq!(got.total_tokens, 12);

        let messages = store.messages_for_session("s1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].user_text, "hi");
        assert_eq!(messages[1].user_text, "more");
    }

    #[test]
    fn test_mark_ended_is_exactly_once() {
        let store = SessionStore::open_in_memory().unwrap();
        store.insert_session(&new_session("s1")).unwrap();

        let now = Utc::now();
        assert!(store.mark_ended("s1", now, Some("a summary")).unwrap());
        assert!(!store.mark_ended("s1", now, Some("another")).unwrap());

        let got = store.get_session("s1").unwrap().unwrap();
        assert_eq!(got.status, SessionStatus::Ended);
        assert_eq!(got.summary.as_deref(), Some("a summary"));
    }

    #[test]
    fn test_latest_active_skips_ended() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut a = new_session("a");
        a.start_time = Utc::now() - chrono::Duration::hours(2);
        store.insert_session(&a).unwrap();
        store.insert_session(&new_session("b")).unwrap();

        assert_eq!(
            store.latest_active_session().unwrap().unwrap().session_id,
            "b"
        );
        store.mark_ended("b", Utc::now(), None).unwrap();
        assert_eq!(
            store.latest_active_session().unwrap().unwrap().session_id,
            "a"
        );
    }
}
