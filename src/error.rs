//! Error types for mnemo

use thiserror::Error;

/// Result type alias for mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;

/// Main error type for mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Session/message state could not be read or written. Always fatal to
    /// the current operation: continuing would risk duplicate or lost
    /// session state.
    #[error("Session store failure: {0}")]
    SessionStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Both the dense and the lexical retrieval source failed. A single
    /// failed source is degraded locally and never surfaces as an error.
    #[error("Both retrieval sources unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// One of the two memory-store writes failed after the other
    /// succeeded. Reconcile with `rebuild_lexical_index`.
    #[error("Memory commit incomplete for {summary_id}: {reason}")]
    CommitIncomplete { summary_id: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemoError {
    /// Whether the error is absorbed by degraded operation rather than
    /// shown to the end user (logged only).
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            MnemoError::RetrievalUnavailable(_) | MnemoError::CommitIncomplete { .. }
        )
    }

    /// User-facing phrasing. Internal error strings are never shown to the
    /// end user; storage and summarization failures read as an inability to
    /// save or recall.
    pub fn user_message(&self) -> &'static str {
        match self {
            MnemoError::Database(_) | MnemoError::SessionStore(_) => {
                "I wasn't able to save our conversation just now."
            }
            MnemoError::Summarization(_) => "I couldn't commit that conversation to memory.",
            MnemoError::RetrievalUnavailable(_) => {
                "My memory banks are unreachable at the moment."
            }
            MnemoError::CommitIncomplete { .. } => {
                "I couldn't fully commit that conversation to memory."
            }
            _ => "Something went wrong on my side.",
        }
    }
}
