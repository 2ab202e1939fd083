//! # mnemo
//!
//! Hybrid memory and retrieval subsystem for a conversational assistant.
//!
//! Three cooperating parts:
//! - **Session lifecycle** ([`session`]): bounded conversational episodes
//!   with boundary detection, a token-budgeted context window, and an
//!   exactly-once end transition.
//! - **Memory commits** ([`retrieval::MemoryCommitCoordinator`]): ended
//!   sessions are summarized and written to a vector store (system of
//!   record) and a lexical index (derived projection).
//! - **Hybrid retrieval** ([`retrieval::FusionEngine`]): dense and
//!   lexical search run in parallel and merge via reciprocal rank
//!   fusion, degrading gracefully when one source is down.

pub mod assistant;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod summarize;
pub mod tokens;
pub mod types;

pub use assistant::{Assistant, TurnContext};
pub use error::{MnemoError, Result};
pub use types::{
    FusedResult, Message, RetrievalCandidate, RetrievalSource, Session, SessionSnapshot,
    SessionStatus, StoredSummary, SummaryMetadata,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
