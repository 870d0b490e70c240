//! Evidence retrieval
//!
//! Per-document hybrid index: dense similarity and BM25 rankings fused
//! with Reciprocal Rank Fusion. Built once per document, read-only after.

use crate::models::ScoredChunk;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

pub mod bm25;
pub mod chunking;
pub mod dense;
pub mod hybrid;

pub use bm25::Bm25Index;
pub use chunking::{build_doc_chunks, TableCell};
pub use dense::{DenseHit, DenseStore, InMemoryDenseStore};
pub use hybrid::{reciprocal_rank_fusion, HybridIndex, RRF_K};

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[A-Za-z0-9%.$]+").expect("token pattern is valid");
}

/// Lower-cased alphanumeric and financial-symbol tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Trait for anything that can answer "top-k evidence for this text"
#[async_trait]
pub trait EvidenceRetriever: Send + Sync {
    /// Ranked by descending score; empty for a blank query
    async fn query(&self, q: &str, k: usize) -> Result<Vec<ScoredChunk>>;
}
