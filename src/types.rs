//! Core data types for mnemo

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is accepting messages
    Active,
    /// Session is closed; terminal state
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

/// One bounded conversational episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique identifier
    pub session_id: String,
    /// When the session started
    pub start_time: DateTime<Utc>,
    /// When the session ended (None while active)
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// Number of recorded exchanges
    pub message_count: i64,
    /// Sum of recorded token counts across all messages
    pub total_tokens: i64,
    /// Distilled summary, set exactly once at end
    pub summary: Option<String>,
}

/// One user/assistant exchange within a session. Append-only: messages are
/// never mutated or deleted once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Owning session
    pub session_id: String,
    /// What the user said
    pub user_text: String,
    /// What the assistant answered
    pub assistant_text: String,
    /// When the exchange was recorded
    pub timestamp: DateTime<Utc>,
    /// Token count recorded by the caller's tokenizer
    pub tokens_used: i64,
}

/// Immutable record of an ended session, handed to the commit coordinator
/// for long-term persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub total_tokens: i64,
    /// Ordered (user_text, assistant_text) pairs
    pub messages: Vec<(String, String)>,
    pub summary: Option<String>,
}

/// Metadata carried alongside a memory summary in both backing stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// Session the summary was distilled from
    pub session_id: String,
    /// End time of the source session
    pub timestamp: DateTime<Utc>,
    /// Message count of the source session
    pub message_count: i64,
}

/// A summary as enumerated from the vector store (the system of record)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSummary {
    /// Store-assigned document id
    pub id: String,
    /// The summary text
    pub text: String,
    pub metadata: SummaryMetadata,
}

/// Which retriever produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    /// Term-match search (BM25)
    Lexical,
    /// Embedding-similarity search
    Dense,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Lexical => write!(f, "lexical"),
            RetrievalSource::Dense => write!(f, "dense"),
        }
    }
}

/// One result from a single retriever, before fusion. Raw scores are
/// store-native and not comparable across sources; fusion uses rank only.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub text: String,
    pub metadata: SummaryMetadata,
    pub raw_score: f32,
    pub source: RetrievalSource,
}

/// A fused, ranked retrieval result
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub text: String,
    pub metadata: SummaryMetadata,
    /// Derived from rank positions only, never from raw scores
    pub fused_score: f32,
    /// Which retrievers contributed this document
    pub sources: Vec<RetrievalSource>,
}
