//! Backing stores for long-term memory
//!
//! Two independently consistent projections of the same logical memory
//! set: a vector store (the system of record) and a lexical index (a
//! derived, rebuildable projection). Both are capability traits so the
//! fusion engine and commit coordinator take injected handles instead of
//! global connections.

mod lexical;
mod vector;

pub use lexical::SqliteLexicalStore;
pub use vector::SqliteVectorStore;

use crate::error::Result;
use crate::types::{StoredSummary, SummaryMetadata};

/// Durable key -> (text, vector, metadata) store with nearest-neighbor
/// query. Losing the lexical index is recoverable from this store; the
/// reverse is not.
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document
    fn upsert(&self, id: &str, text: &str, vector: &[f32], metadata: &SummaryMetadata)
        -> Result<()>;

    /// Top-k nearest documents as (text, metadata, distance), ranked by
    /// ascending distance
    fn query_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, SummaryMetadata, f32)>>;

    /// Every stored document, for reindexing and retention cleanup
    fn scan_all(&self) -> Result<Vec<StoredSummary>>;

    /// Delete by id; returns how many existed
    fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Drop the whole collection
    fn delete_all(&self) -> Result<()>;

    /// Number of stored documents
    fn count(&self) -> Result<usize>;
}

/// Durable inverted index over text + metadata with term-match query
pub trait LexicalStore: Send + Sync {
    fn index_exists(&self) -> Result<bool>;

    fn create_index(&self) -> Result<()>;

    fn delete_index(&self) -> Result<()>;

    /// Index a batch of documents; returns how many were indexed
    fn bulk_index(&self, docs: &[(String, SummaryMetadata)]) -> Result<usize>;

    /// Top-k term matches as (text, metadata, relevance), best first
    fn query_by_text(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<(String, SummaryMetadata, f32)>>;
}
