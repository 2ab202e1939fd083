//! Long-term memory retrieval and persistence
//!
//! [`FusionEngine`] runs the dense and lexical retrievers in parallel and
//! merges their ranked lists with reciprocal rank fusion.
//! [`MemoryCommitCoordinator`] writes ended-session summaries to both
//! backing stores and enforces retention.

mod commit;
mod fusion;

pub use commit::{MemoryCommitCoordinator, RetentionConfig};
pub use fusion::FusionEngine;

/// Tunables for hybrid retrieval
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Total candidate budget, split evenly between the two sources
    pub top_k: usize,
    /// Rank-discount constant in the reciprocal rank formula. Larger
    /// values flatten the difference between adjacent ranks.
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            top_k: 50,
            rrf_k: 60.0,
        }
    }
}
