//! Session boundary detection, context assembly, and the exactly-once
//! end transition.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MnemoError, Result};
use crate::session::{SessionConfig, SessionStore, ELISION_MARKER};
use crate::types::{Message, Session, SessionSnapshot, SessionStatus};

static CLOSING_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(goodbye|bye|see you later|farewell)\s*$",
        r"(?i)that's all for now|that's it for today",
        r"(?i)\b(end session|close session|terminate session)\b",
        r"(?i)\b(signing off|logging off)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TOPIC_CHANGES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)let's talk about something completely different",
        r"(?i)\b(new topic:|different topic:)",
        r"(?i)changing subjects?:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Why a session boundary was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryReason {
    /// User said an explicit farewell or close command
    ClosingPhrase,
    /// User announced a hard topic switch
    TopicChange,
    /// No activity within the inactivity window
    Timeout,
}

/// Summary of a session's shape, for operator inspection
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub status: SessionStatus,
    pub message_count: i64,
    pub total_tokens: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
}

/// Manages session lifecycle over a [`SessionStore`]
pub struct SessionManager {
    store: SessionStore,
    config: SessionConfig,
    // Snapshot of the last ended session, so repeated end calls return
    // the same value instead of failing
    last_snapshot: Mutex<Option<SessionSnapshot>>,
}

impl SessionManager {
    pub fn new(store: SessionStore, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            last_snapshot: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Start a fresh session with a generated id
    pub fn create_session(&self) -> Result<Session> {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let session = Session {
            session_id: format!(
                "sess_{}_{}",
                now.format("%Y%m%d_%H%M%S"),
                &suffix[..8]
            ),
            start_time: now,
            end_time: None,
            status: SessionStatus::Active,
            message_count: 0,
            total_tokens: 0,
            summary: None,
        };
        self.store.insert_session(&session)?;
        info!(session_id = %session.session_id, "session started");
        Ok(session)
    }

    /// Most recent session still marked active, regardless of staleness
    pub fn active_session(&self) -> Result<Option<Session>> {
        self.store.latest_active_session()
    }

    /// Whether the session has seen activity within the inactivity
    /// window. All timestamps are normalized to UTC before comparison, so
    /// wall-clock timezone changes never produce phantom timeouts.
    pub fn is_session_active(&self, session: &Session) -> Result<bool> {
        if session.status != SessionStatus::Active {
            return Ok(false);
        }
        let last_activity = self
            .store
            .last_message_time(&session.session_id)?
            .unwrap_or(session.start_time);
        let idle = Utc::now() - last_activity;
        Ok(idle < Duration::minutes(self.config.timeout_minutes))
    }

    /// Check an incoming user message for an explicit boundary signal.
    /// Timeout boundaries are detected separately via
    /// [`is_session_active`](Self::is_session_active).
    pub fn detect_boundary(&self, user_text: &str) -> Option<BoundaryReason> {
        if CLOSING_PHRASES.iter().any(|r| r.is_match(user_text)) {
            return Some(BoundaryReason::ClosingPhrase);
        }
        if TOPIC_CHANGES.iter().any(|r| r.is_match(user_text)) {
            return Some(BoundaryReason::TopicChange);
        }
        None
    }

    /// Record one exchange with the caller's token count. The tokenizer
    /// belongs to the caller; whatever count it recorded is what the
    /// context budget is measured against. Fails if the session is not
    /// active; the message log is append-only.
    pub fn add_message(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        tokens_used: i64,
    ) -> Result<Message> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| MnemoError::SessionStore(format!("no such session: {session_id}")))?;
        if session.status != SessionStatus::Active {
            return Err(MnemoError::SessionStore(format!(
                "session {session_id} is ended; messages cannot be added"
            )));
        }

        let message = Message {
            session_id: session_id.to_string(),
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            timestamp: Utc::now(),
            tokens_used,
        };
        self.store.append_message(&message)?;
        debug!(session_id, tokens = message.tokens_used, "exchange recorded");
        Ok(message)
    }

    /// All exchanges of a session in order
    pub fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.store.messages_for_session(session_id)
    }

    /// Assemble the in-session context string. The full transcript is used
    /// while it fits the token budget; beyond that, only the most recent
    /// exchanges are kept, prefixed with an elision marker.
    pub fn session_context(&self, session_id: &str) -> Result<String> {
        let messages = self.store.messages_for_session(session_id)?;
        if messages.is_empty() {
            return Ok(String::new());
        }

        let total_tokens: i64 = messages.iter().map(|m| m.tokens_used).sum();
        let window = if total_tokens as usize <= self.config.context_token_limit {
            &messages[..]
        } else {
            let keep = self.config.window_exchanges.min(messages.len());
            &messages[messages.len() - keep..]
        };
        let elided = window.len() < messages.len();

        let mut out = String::new();
        if elided {
            out.push_str(ELISION_MARKER);
            out.push('\n');
        }
        for m in window {
            out.push_str("User: ");
            out.push_str(&m.user_text);
            out.push('\n');
            out.push_str("Assistant: ");
            out.push_str(&m.assistant_text);
            out.push('\n');
        }
        Ok(out)
    }

    /// End a session and return its snapshot. The first call performs the
    /// transition; repeated calls for an already-ended session return an
    /// equal snapshot instead of erroring.
    pub fn end_session(
        &self,
        session_id: &str,
        summary: Option<&str>,
    ) -> Result<SessionSnapshot> {
        let transitioned = self.store.mark_ended(session_id, Utc::now(), summary)?;

        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| MnemoError::SessionStore(format!("no such session: {session_id}")))?;
        let messages = self.store.messages_for_session(session_id)?;

        let snapshot = SessionSnapshot {
            session_id: session.session_id.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            message_count: session.message_count,
            total_tokens: session.total_tokens,
            messages: messages
                .into_iter()
                .map(|m| (m.user_text, m.assistant_text))
                .collect(),
            summary: session.summary.clone(),
        };

        if transitioned {
            info!(
                session_id,
                messages = snapshot.message_count,
                "session ended"
            );
        } else {
            debug!(session_id, "end requested for already-ended session");
        }
        *self.last_snapshot.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshot produced by the most recent end transition, if any
    pub fn last_snapshot(&self) -> Option<SessionSnapshot> {
        self.last_snapshot.lock().clone()
    }

    pub fn session_stats(&self, session_id: &str) -> Result<SessionStats> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| MnemoError::SessionStore(format!("no such session: {session_id}")))?;
        let until = session.end_time.unwrap_or_else(Utc::now);
        Ok(SessionStats {
            session_id: session.session_id,
            status: session.status,
            message_count: session.message_count,
            total_tokens: session.total_tokens,
            start_time: session.start_time,
            end_time: session.end_time,
            duration_minutes: (until - session.start_time).num_minutes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(SessionStore::open_in_memory().unwrap(), SessionConfig::default())
    }

    #[test]
    fn test_create_session_id_shape() {
        let m = manager();
        let s = m.create_session().unwrap();
        assert!(s.session_id.starts_with("sess_"));
        assert_eq!(s.status, SessionStatus::Active);
    }

    #[test]
    fn test_closing_phrase_detection() {
        let m = manager();
        assert_eq!(
            m.detect_boundary("ok thanks, goodbye"),
            Some(BoundaryReason::ClosingPhrase)
        );
        assert_eq!(
            m.detect_boundary("that's all for now"),
            Some(BoundaryReason::ClosingPhrase)
        );
        assert_eq!(
            m.detect_boundary("please end session"),
            Some(BoundaryReason::ClosingPhrase)
        );
        assert_eq!(m.detect_boundary("tell me about goodbyes in japanese"), None);
    }

    #[test]
    fn test_topic_change_detection() {
        let m = manager();
        assert_eq!(
            m.detect_boundary("new topic: rust lifetimes"),
            Some(BoundaryReason::TopicChange)
        );
        assert_eq!(
            m.detect_boundary("changing subjects: dinner plans"),
            Some(BoundaryReason::TopicChange)
        );
        assert_eq!(m.detect_boundary("what's a good subject line"), None);
    }

    #[test]
    fn test_fresh_session_is_active() {
        let m = manager();
        let s = m.create_session().unwrap();
        assert!(m.is_session_active(&s).unwrap());
    }

    #[test]
    fn test_stale_session_is_inactive() {
        let m = manager();
        let mut s = m.create_session().unwrap();
        // No messages: staleness falls back to start_time
        s.start_time = Utc::now() - Duration::minutes(31);
        assert!(!m.is_session_active(&s).unwrap());
        s.start_time = Utc::now() - Duration::minutes(29);
        assert!(m.is_session_active(&s).unwrap());
    }

    #[test]
    fn test_caller_token_counts_are_recorded() {
        let m = manager();
        let s = m.create_session().unwrap();
        m.add_message(&s.session_id, "hi", "hello", 123).unwrap();

        let messages = m.messages(&s.session_id).unwrap();
        assert_eq!(messages[0].tokens_used, 123);
        let stored = m.store().get_session(&s.session_id).unwrap().unwrap();
        assert_eq!(stored.total_tokens, 123);
    }

    #[test]
    fn test_context_full_transcript_when_under_budget() {
        let m = manager();
        let s = m.create_session().unwrap();
        m.add_message(&s.session_id, "first question", "first answer", 8).unwrap();
        m.add_message(&s.session_id, "second question", "second answer", 8).unwrap();

        let ctx = m.session_context(&s.session_id).unwrap();
        assert!(ctx.contains("first question"));
        assert!(ctx.contains("second answer"));
        assert!(!ctx.contains(ELISION_MARKER));
    }

    #[test]
    fn test_context_window_when_over_budget() {
        let store = SessionStore::open_in_memory().unwrap();
        let m = SessionManager::new(
            store,
            SessionConfig {
                context_token_limit: 40,
                window_exchanges: 2,
                ..SessionConfig::default()
            },
        );
        let s = m.create_session().unwrap();
        for i in 0..6 {
            m.add_message(
                &s.session_id,
                &format!("question number {i}"),
                &format!("answer number {i}"),
                10,
            )
            .unwrap();
        }

        let ctx = m.session_context(&s.session_id).unwrap();
        assert!(ctx.starts_with(ELISION_MARKER));
        assert!(ctx.contains("question number 5"));
        assert!(ctx.contains("question number 4"));
        assert!(!ctx.contains("question number 3"));
    }

    #[test]
    fn test_default_budget_keeps_eight_exchanges() {
        let m = manager();
        let s = m.create_session().unwrap();
        // 500 tokens per exchange; twelve exchanges exceed the 5200-token
        // budget
        for i in 0..12 {
            m.add_message(
                &s.session_id,
                &format!("question {i}"),
                &format!("answer {i}"),
                500,
            )
            .unwrap();
        }

        let ctx = m.session_context(&s.session_id).unwrap();
        assert!(ctx.starts_with(ELISION_MARKER));
        assert_eq!(ctx.matches("User: ").count(), 8);
        assert!(ctx.contains("question 4"));
        assert!(!ctx.contains("question 3"));
    }

    #[test]
    fn test_end_session_idempotent() {
        let m = manager();
        let s = m.create_session().unwrap();
        m.add_message(&s.session_id, "hi", "hello", 5).unwrap();

        let first = m.end_session(&s.session_id, Some("greeting chat")).unwrap();
        let second = m.end_session(&s.session_id, Some("ignored")).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.summary, second.summary);
        assert_eq!(second.summary.as_deref(), Some("greeting chat"));
        assert_eq!(first.messages, second.messages);
    }

    #[test]
    fn test_no_messages_after_end() {
        let m = manager();
        let s = m.create_session().unwrap();
        m.end_session(&s.session_id, None).unwrap();
        assert!(m.add_message(&s.session_id, "late", "reply", 4).is_err());
    }

    #[test]
    fn test_session_stats() {
        let m = manager();
        let s = m.create_session().unwrap();
        m.add_message(&s.session_id, "hi there friend", "hello to you too", 9).unwrap();
        let stats = m.session_stats(&s.session_id).unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.total_tokens, 9);
        assert_eq!(stats.status, SessionStatus::Active);
    }
}
