//! Dual-store memory commits and retention
//!
//! A committed memory must land in the vector store first; only then is
//! the lexical index updated. The vector store is the system of record,
//! so a lexical-side failure leaves a recoverable partial state while a
//! vector-side failure aborts the commit entirely.

use std::sync::Arc;

use tracing::{info, warn};

use crate::embedding::Embedder;
use crate::error::{MnemoError, Result};
use crate::store::{LexicalStore, VectorStore};
use crate::types::{SessionSnapshot, SummaryMetadata};

/// How many summaries to keep when pruning old memories
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub keep_recent: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { keep_recent: 30 }
    }
}

/// Writes ended-session summaries to both stores and prunes old ones
pub struct MemoryCommitCoordinator {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    retention: RetentionConfig,
}

impl MemoryCommitCoordinator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            lexical,
            retention,
        }
    }

    /// Commit one summary for an ended session. Returns the document id.
    ///
    /// Write order is vector first, lexical second. A vector failure
    /// means nothing was committed and the caller may retry whole. A
    /// lexical failure after a successful vector write surfaces as
    /// [`MnemoError::CommitIncomplete`]: the memory is durable and
    /// retrievable densely, and `rebuild_lexical_index` reconciles the
    /// projection later.
    pub fn commit(&self, snapshot: &SessionSnapshot, summary_text: &str) -> Result<String> {
        if summary_text.trim().is_empty() {
            return Err(MnemoError::InvalidInput(
                "refusing to commit an empty summary".into(),
            ));
        }

        let summary_id = format!("summary_{}", snapshot.session_id);
        let metadata = SummaryMetadata {
            session_id: snapshot.session_id.clone(),
            timestamp: snapshot.end_time.unwrap_or(snapshot.start_time),
            message_count: snapshot.message_count,
        };

        let embedding = self.embedder.embed(summary_text)?;
        self.vector
            .upsert(&summary_id, summary_text, &embedding, &metadata)?;

        if let Err(err) = self
            .lexical
            .bulk_index(&[(summary_text.to_string(), metadata)])
        {
            warn!(summary_id, error = %err, "lexical write failed after vector write");
            return Err(MnemoError::CommitIncomplete {
                summary_id,
                reason: err.to_string(),
            });
        }

        info!(summary_id, "memory committed to both stores");
        Ok(summary_id)
    }

    /// Prune the oldest summaries beyond the retention limit, then
    /// rebuild the lexical projection so both stores agree. Returns how
    /// many summaries were removed.
    pub fn cleanup_old_summaries(&self) -> Result<usize> {
        let mut summaries = self.vector.scan_all()?;
        if summaries.len() <= self.retention.keep_recent {
            return Ok(0);
        }

        summaries.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        let stale: Vec<String> = summaries
            .split_off(self.retention.keep_recent)
            .into_iter()
            .map(|s| s.id)
            .collect();

        let removed = self.vector.delete(&stale)?;
        self.rebuild_lexical()?;
        info!(removed, kept = self.retention.keep_recent, "old memories pruned");
        Ok(removed)
    }

    /// Drop everything from both stores
    pub fn reset(&self) -> Result<()> {
        self.vector.delete_all()?;
        self.lexical.delete_index()?;
        self.lexical.create_index()?;
        info!("memory stores reset");
        Ok(())
    }

    fn rebuild_lexical(&self) -> Result<()> {
        let docs: Vec<_> = self
            .vector
            .scan_all()?
            .into_iter()
            .map(|s| (s.text, s.metadata))
            .collect();
        self.lexical.delete_index()?;
        self.lexical.create_index()?;
        self.lexical.bulk_index(&docs)?;
        Ok(())
    }
}
