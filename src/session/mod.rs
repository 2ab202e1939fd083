//! Session lifecycle management
//!
//! Sessions are bounded conversational episodes with an append-only
//! message log and an exactly-once transition from active to ended.

mod manager;
mod store;

pub use manager::{BoundaryReason, SessionManager, SessionStats};
pub use store::SessionStore;

/// Text inserted in place of elided early conversation when the context
/// window falls back to the recent-exchange tail.
pub const ELISION_MARKER: &str = "[Earlier conversation summarized and elided]";

/// Tunables for session lifecycle and context assembly
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Token budget for the assembled session context
    pub context_token_limit: usize,
    /// Inactivity window after which a session is considered stale
    pub timeout_minutes: i64,
    /// Exchanges kept when the context exceeds the token budget
    pub window_exchanges: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_token_limit: 5200,
            timeout_minutes: 30,
            window_exchanges: 8,
        }
    }
}
