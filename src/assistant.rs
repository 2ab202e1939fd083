//! Per-turn orchestration
//!
//! [`Assistant`] is the seam between the conversational front end and the
//! memory subsystem. Each turn it settles session boundaries, retrieves
//! long-term memories, and assembles the in-session context; after the
//! front end generates a reply it records the exchange.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::retrieval::{FusionEngine, MemoryCommitCoordinator};
use crate::session::{BoundaryReason, SessionManager};
use crate::summarize::Summarizer;
use crate::types::{FusedResult, Session, SessionSnapshot, SessionStatus};

/// How many fused memories are surfaced to the prompt assembler
const MEMORIES_PER_TURN: usize = 5;

/// Everything the external prompt assembler needs for one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Session this turn belongs to
    pub session_id: String,
    /// Fused long-term memories relevant to the user's message
    pub memories: Vec<FusedResult>,
    /// Formatted transcript of the current session so far
    pub session_context: String,
}

/// Ties session lifecycle, retrieval, and memory commits together
pub struct Assistant {
    manager: SessionManager,
    fusion: FusionEngine,
    coordinator: MemoryCommitCoordinator,
    summarizer: Arc<dyn Summarizer>,
}

impl Assistant {
    pub fn new(
        manager: SessionManager,
        fusion: FusionEngine,
        coordinator: MemoryCommitCoordinator,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            manager,
            fusion,
            coordinator,
            summarizer,
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn fusion(&self) -> &FusionEngine {
        &self.fusion
    }

    pub fn coordinator(&self) -> &MemoryCommitCoordinator {
        &self.coordinator
    }

    /// Settle boundaries and gather context for an incoming user message.
    ///
    /// Boundary precedence: no session yet, then inactivity timeout, then
    /// an explicit boundary phrase. Any boundary rolls the previous
    /// session into long-term memory and starts a fresh one; the current
    /// message always lands in an active session.
    pub fn prepare_turn(&self, user_text: &str) -> Result<TurnContext> {
        let session = self.resolve_session(user_text)?;

        // Memory loss is degraded service, not a failed turn
        let memories = match self.fusion.retrieve(user_text, MEMORIES_PER_TURN) {
            Ok(memories) => memories,
            Err(err) if err.is_silent() => {
                warn!(error = %err, "retrieval unavailable; continuing without memories");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let session_context = self.manager.session_context(&session.session_id)?;
        Ok(TurnContext {
            session_id: session.session_id,
            memories,
            session_context,
        })
    }

    /// Record a completed exchange in its session. `tokens_used` is the
    /// caller's own count for the exchange; the front end knows its
    /// model's tokenizer, this crate does not second-guess it.
    pub fn record_turn(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        tokens_used: i64,
    ) -> Result<()> {
        self.manager
            .add_message(session_id, user_text, assistant_text, tokens_used)?;
        Ok(())
    }

    /// End a session now: summarize, commit, and return the snapshot.
    /// Safe to call for an already-ended session.
    pub fn end_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.finalize(session_id)
    }

    /// Best-effort persistence of the current session on interrupt.
    /// Errors are swallowed after logging; there is nothing the user can
    /// do about them mid-shutdown.
    pub fn emergency_save(&self) {
        match self.manager.active_session() {
            Ok(Some(session)) => {
                if let Err(err) = self.finalize(&session.session_id) {
                    warn!(session_id = %session.session_id, error = %err,
                        "emergency save failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "emergency save could not find a session"),
        }
    }

    fn resolve_session(&self, user_text: &str) -> Result<Session> {
        let current = self.manager.active_session()?;

        let current = match current {
            None => return self.manager.create_session(),
            Some(session) => session,
        };

        let boundary = if !self.manager.is_session_active(&current)? {
            Some(BoundaryReason::Timeout)
        } else {
            self.manager.detect_boundary(user_text)
        };

        if let Some(reason) = boundary {
            info!(
                session_id = %current.session_id,
                reason = ?reason,
                "session boundary; rolling over"
            );
            self.finalize(&current.session_id)?;
            return self.manager.create_session();
        }

        Ok(current)
    }

    /// Summarize and commit an ending session, then end it. Failures
    /// downstream of the end transition never undo it: a summarization
    /// failure ends the session without a summary, and a commit failure
    /// is logged but leaves the turn healthy.
    fn finalize(&self, session_id: &str) -> Result<SessionSnapshot> {
        // Already ended: return the existing snapshot without running
        // the summarizer or touching the memory stores again
        if let Some(session) = self.manager.store().get_session(session_id)? {
            if session.status == SessionStatus::Ended {
                return self.manager.end_session(session_id, None);
            }
        }

        let messages = self.manager.messages(session_id)?;
        let exchanges: Vec<(String, String)> = messages
            .into_iter()
            .map(|m| (m.user_text, m.assistant_text))
            .collect();

        if exchanges.is_empty() {
            return self.manager.end_session(session_id, None);
        }

        let summary = match self.summarizer.summarize(&exchanges) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                warn!(session_id, error = %err, "summarization failed; ending without summary");
                None
            }
        };

        let snapshot = self
            .manager
            .end_session(session_id, summary.as_deref())?;

        if let Some(text) = &summary {
            match self.coordinator.commit(&snapshot, text) {
                Ok(summary_id) => info!(summary_id, "session memory committed"),
                Err(err) => warn!(session_id, error = %err, "memory commit failed"),
            }
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, TfIdfEmbedder};
    use crate::error::MnemoError;
    use crate::retrieval::{FusionConfig, RetentionConfig};
    use crate::session::{SessionConfig, SessionStore};
    use crate::store::{LexicalStore, SqliteLexicalStore, SqliteVectorStore, VectorStore};
    use crate::summarize::ExtractiveSummarizer;
    use crate::types::SessionStatus;

    struct BrokenSummarizer;
    impl Summarizer for BrokenSummarizer {
        fn summarize(&self, _messages: &[(String, String)]) -> Result<String> {
            Err(MnemoError::Summarization("model offline".into()))
        }
    }

    fn build(
        summarizer: Arc<dyn Summarizer>,
    ) -> (Assistant, Arc<SqliteVectorStore>, Arc<SqliteLexicalStore>) {
        let embedder: Arc<dyn Embedder> = Arc::new(TfIdfEmbedder::new(128));
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let lexical = Arc::new(SqliteLexicalStore::open_in_memory().unwrap());

        let assistant = Assistant::new(
            SessionManager::new(SessionStore::open_in_memory().unwrap(), SessionConfig::default()),
            FusionEngine::new(
                embedder.clone(),
                vector.clone(),
                lexical.clone(),
                FusionConfig::default(),
            ),
            MemoryCommitCoordinator::new(
                embedder,
                vector.clone(),
                lexical.clone(),
                RetentionConfig::default(),
            ),
            summarizer,
        );
        (assistant, vector, lexical)
    }

    fn assistant() -> Assistant {
        build(Arc::new(ExtractiveSummarizer)).0
    }

    #[test]
    fn test_first_turn_creates_session() {
        let a = assistant();
        let ctx = a.prepare_turn("hello there").unwrap();
        assert!(ctx.session_id.starts_with("sess_"));
        assert!(ctx.memories.is_empty());
        assert!(ctx.session_context.is_empty());
    }

    #[test]
    fn test_turns_stay_in_one_session() {
        let a = assistant();
        let ctx1 = a.prepare_turn("first question").unwrap();
        a.record_turn(&ctx1.session_id, "first question", "first answer", 8)
            .unwrap();
        let ctx2 = a.prepare_turn("second question").unwrap();
        assert_eq!(ctx1.session_id, ctx2.session_id);
        assert!(ctx2.session_context.contains("first answer"));
    }

    #[test]
    fn test_closing_phrase_rolls_over() {
        let a = assistant();
        let ctx1 = a.prepare_turn("tell me about sourdough starters").unwrap();
        a.record_turn(
            &ctx1.session_id,
            "tell me about sourdough starters",
            "feed the sourdough starter flour and water daily",
            16,
        )
        .unwrap();

        let ctx2 = a.prepare_turn("thanks, goodbye").unwrap();
        assert_ne!(ctx1.session_id, ctx2.session_id);

        let old = a
            .manager()
            .store()
            .get_session(&ctx1.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(old.status, SessionStatus::Ended);
        assert!(old.summary.is_some());
    }

    #[test]
    fn test_inactivity_rolls_over_on_next_turn() {
        let a = assistant();
        let ctx1 = a.prepare_turn("a question").unwrap();

        // Backdate the only exchange past the 30 minute window
        let stale = crate::types::Message {
            session_id: ctx1.session_id.clone(),
            user_text: "a question".into(),
            assistant_text: "an answer".into(),
            timestamp: chrono::Utc::now() - chrono::Duration::minutes(31),
            tokens_used: 6,
        };
        a.manager().store().append_message(&stale).unwrap();

        let ctx2 = a.prepare_turn("back again").unwrap();
        assert_ne!(ctx1.session_id, ctx2.session_id);
        let old = a
            .manager()
            .store()
            .get_session(&ctx1.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(old.status, SessionStatus::Ended);
    }

    #[test]
    fn test_memories_surface_in_later_session() {
        let a = assistant();
        let ctx1 = a.prepare_turn("help with rust lifetimes").unwrap();
        a.record_turn(
            &ctx1.session_id,
            "help with rust lifetimes",
            "rust lifetimes annotate how long references must stay valid",
            18,
        )
        .unwrap();
        a.end_session(&ctx1.session_id).unwrap();

        let ctx2 = a.prepare_turn("remind me about rust lifetimes").unwrap();
        assert!(!ctx2.memories.is_empty());
        assert!(ctx2.memories[0].text.to_lowercase().contains("lifetime"));
    }

    #[test]
    fn test_summarization_failure_still_ends_session() {
        let (a, _vector, _lexical) = build(Arc::new(BrokenSummarizer));
        let ctx = a.prepare_turn("a question").unwrap();
        a.record_turn(&ctx.session_id, "a question", "an answer", 6).unwrap();

        let snapshot = a.end_session(&ctx.session_id).unwrap();
        assert!(snapshot.summary.is_none());
        let stored = a
            .manager()
            .store()
            .get_session(&ctx.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Ended);
    }

    #[test]
    fn test_end_session_idempotent_through_assistant() {
        let a = assistant();
        let ctx = a.prepare_turn("a question").unwrap();
        a.record_turn(&ctx.session_id, "a question", "an answer", 6).unwrap();

        let s1 = a.end_session(&ctx.session_id).unwrap();
        let s2 = a.end_session(&ctx.session_id).unwrap();
        assert_eq!(s1.session_id, s2.session_id);
        assert_eq!(s1.summary, s2.summary);
    }

    #[test]
    fn test_repeated_end_does_not_recommit() {
        let (a, vector, lexical) = build(Arc::new(ExtractiveSummarizer));
        let ctx = a.prepare_turn("talk about box kites").unwrap();
        a.record_turn(
            &ctx.session_id,
            "talk about box kites",
            "box kites need steady wind and a long bridle to fly well",
            20,
        )
        .unwrap();

        a.end_session(&ctx.session_id).unwrap();
        assert_eq!(vector.count().unwrap(), 1);
        assert_eq!(lexical.query_by_text("kites", 10).unwrap().len(), 1);

        // A second end must not re-run the summarizer or touch the stores
        a.end_session(&ctx.session_id).unwrap();
        assert_eq!(vector.count().unwrap(), 1);
        assert_eq!(lexical.query_by_text("kites", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_emergency_save_ends_and_commits() {
        let (a, vector, _lexical) = build(Arc::new(ExtractiveSummarizer));
        let ctx = a.prepare_turn("discuss solar panels").unwrap();
        a.record_turn(
            &ctx.session_id,
            "discuss solar panels",
            "solar panels lose efficiency as the cells heat up in the sun",
            18,
        )
        .unwrap();

        a.emergency_save();

        let stored = a
            .manager()
            .store()
            .get_session(&ctx.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Ended);
        assert!(stored.summary.is_some());
        assert_eq!(vector.count().unwrap(), 1);
    }

    #[test]
    fn test_empty_session_ends_without_commit() {
        let a = assistant();
        let ctx = a.prepare_turn("hello").unwrap();
        // No exchange recorded
        let snapshot = a.end_session(&ctx.session_id).unwrap();
        assert!(snapshot.summary.is_none());
        assert!(snapshot.messages.is_empty());
    }
}
