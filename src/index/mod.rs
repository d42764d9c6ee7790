//! Document index seam.
//!
//! The engine consumes a full-text index through this trait; building and
//! storing the index is the collaborator's business. Every primitive behaves
//! as an empty result when the environment carries no index at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RlmResult;

/// Aggregate statistics, surfaced in the environment summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub num_docs: usize,
}

/// Per-document metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: String,
    pub path: String,
    pub mtime: i64,
    pub bytes: usize,
    pub ext: String,
}

/// One ranked full-text hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub chunk_id: u64,
    pub start_byte: usize,
    pub end_byte: usize,
    pub rank: f64,
    pub snippet: String,
}

/// Read-side interface of the full-text document index.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    fn stats(&self) -> IndexStats;

    fn list_docs(&self, limit: usize, offset: usize) -> Vec<DocMeta>;

    fn search_docs(&self, query: &str, limit: usize) -> Vec<SearchHit>;

    fn get_doc(&self, id: &str) -> Option<DocMeta>;

    /// Raw byte-span retrieval for one document; the span is clamped to the
    /// document's length by the implementation.
    async fn read_doc(&self, id: &str, start_byte: usize, end_byte: usize) -> RlmResult<String>;
}
