//! Hybrid retrieval with reciprocal rank fusion
//!
//! Both retrievers are queried in parallel and merged by rank position
//! only; raw scores from the two stores live on different scales and are
//! never compared. A failed or empty source degrades to the survivor's
//! own ranking, and only the loss of both sources is an error.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::{MnemoError, Result};
use crate::retrieval::FusionConfig;
use crate::store::{LexicalStore, VectorStore};
use crate::types::{FusedResult, RetrievalCandidate, RetrievalSource};

/// Retrieves memories from both stores and fuses the rankings
pub struct FusionEngine {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    config: FusionConfig,
}

/// Identity of a memory is its exact text content. Two documents with the
/// same text are the same memory wherever they were retrieved from.
fn content_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl FusionEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        config: FusionConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            lexical,
            config,
        }
    }

    /// Retrieve up to `final_k` fused memories for a query
    pub fn retrieve(&self, query: &str, final_k: usize) -> Result<Vec<FusedResult>> {
        let per_source = (self.config.top_k / 2).max(1);

        let (dense, lexical) = std::thread::scope(|scope| {
            let dense = scope.spawn(|| self.query_dense(query, per_source));
            let lexical = scope.spawn(|| self.query_lexical(query, per_source));
            (
                dense.join().unwrap_or_else(|_| {
                    Err(MnemoError::RetrievalUnavailable("dense query panicked".into()))
                }),
                lexical.join().unwrap_or_else(|_| {
                    Err(MnemoError::RetrievalUnavailable("lexical query panicked".into()))
                }),
            )
        });

        match (dense, lexical) {
            (Ok(dense), Ok(lexical)) => {
                debug!(
                    dense = dense.len(),
                    lexical = lexical.len(),
                    "both retrieval sources answered"
                );
                // Nothing to fuse against: the survivor's list passes
                // through unchanged
                if dense.is_empty() {
                    Ok(Self::degraded(lexical, final_k))
                } else if lexical.is_empty() {
                    Ok(Self::degraded(dense, final_k))
                } else {
                    Ok(Self::fuse(dense, lexical, self.config.rrf_k, final_k))
                }
            }
            (Ok(dense), Err(err)) => {
                warn!(error = %err, "lexical retrieval failed; serving dense only");
                Ok(Self::degraded(dense, final_k))
            }
            (Err(err), Ok(lexical)) => {
                warn!(error = %err, "dense retrieval failed; serving lexical only");
                Ok(Self::degraded(lexical, final_k))
            }
            (Err(dense_err), Err(lexical_err)) => Err(MnemoError::RetrievalUnavailable(format!(
                "dense: {dense_err}; lexical: {lexical_err}"
            ))),
        }
    }

    fn query_dense(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalCandidate>> {
        let embedding = self.embedder.embed(query)?;
        let hits = self.vector.query_by_vector(&embedding, top_k)?;
        Ok(hits
            .into_iter()
            .map(|(text, metadata, distance)| RetrievalCandidate {
                text,
                metadata,
                // Map ascending distance onto a descending relevance
                raw_score: 1.0 / (1.0 + distance),
                source: RetrievalSource::Dense,
            })
            .collect())
    }

    fn query_lexical(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalCandidate>> {
        let hits = self.lexical.query_by_text(query, top_k)?;
        Ok(hits
            .into_iter()
            .map(|(text, metadata, relevance)| RetrievalCandidate {
                text,
                metadata,
                raw_score: relevance,
                source: RetrievalSource::Lexical,
            })
            .collect())
    }

    /// Reciprocal rank fusion over the two ranked lists. Each appearance
    /// at 0-based rank r contributes 1 / (k + r + 1); documents found by
    /// both sources sum their contributions and float upward.
    fn fuse(
        dense: Vec<RetrievalCandidate>,
        lexical: Vec<RetrievalCandidate>,
        rrf_k: f32,
        final_k: usize,
    ) -> Vec<FusedResult> {
        let mut order: Vec<FusedResult> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for list in [lexical, dense] {
            for (rank, candidate) in list.into_iter().enumerate() {
                let contribution = 1.0 / (rrf_k + rank as f32 + 1.0);
                let key = content_key(&candidate.text);
                match index.get(&key) {
                    Some(&i) => {
                        order[i].fused_score += contribution;
                        if !order[i].sources.contains(&candidate.source) {
                            order[i].sources.push(candidate.source);
                        }
                    }
                    None => {
                        index.insert(key, order.len());
                        order.push(FusedResult {
                            text: candidate.text,
                            metadata: candidate.metadata,
                            fused_score: contribution,
                            sources: vec![candidate.source],
                        });
                    }
                }
            }
        }

        // Stable sort: ties keep first-seen order, so equal-score output
        // is deterministic across runs
        order.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(final_k);
        order
    }

    /// Single-source fallback: the survivor's own ranking, unchanged
    fn degraded(candidates: Vec<RetrievalCandidate>, final_k: usize) -> Vec<FusedResult> {
        candidates
            .into_iter()
            .take(final_k)
            .map(|c| FusedResult {
                text: c.text,
                metadata: c.metadata,
                fused_score: c.raw_score,
                sources: vec![c.source],
            })
            .collect()
    }

    /// Rebuild the lexical index from the vector store, which is the
    /// system of record. Returns how many documents were indexed.
    pub fn rebuild_lexical_index(&self) -> Result<usize> {
        let summaries = self.vector.scan_all()?;
        let docs: Vec<_> = summaries
            .into_iter()
            .map(|s| (s.text, s.metadata))
            .collect();

        self.lexical.delete_index()?;
        self.lexical.create_index()?;
        let indexed = self.lexical.bulk_index(&docs)?;
        debug!(indexed, "lexical index rebuilt from vector store");
        Ok(indexed)
    }
}
