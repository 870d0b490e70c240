//! Hybrid dense + BM25 index fused by Reciprocal Rank Fusion

use super::{tokenize, Bm25Index, DenseHit, DenseStore, EvidenceRetriever};
use crate::embeddings::Embedder;
use crate::models::ScoredChunk;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// RRF rank offset
pub const RRF_K: f64 = 60.0;

/// Minimum hits pulled from each side before fusion
const MIN_CANDIDATES: usize = 10;

/// Fuse ranked lists of chunk indices. Each entry contributes
/// `1 / (RRF_K + rank)` with 1-based rank; ties keep first-seen order.
pub fn reciprocal_rank_fusion(rankings: &[Vec<usize>], k: usize) -> Vec<(usize, f64)> {
    let mut fused: Vec<(usize, f64)> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();

    for ranking in rankings {
        for (rank, chunk) in ranking.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f64);
            match position.get(chunk) {
                Some(&slot) => fused[slot].1 += contribution,
                None => {
                    position.insert(*chunk, fused.len());
                    fused.push((*chunk, contribution));
                }
            }
        }
    }

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(k);
    fused
}

/// Per-document evidence index. Read-only once built.
pub struct HybridIndex {
    collection: String,
    chunks: Vec<String>,
    bm25: Bm25Index,
    embedder: Arc<dyn Embedder>,
    store: Box<dyn DenseStore>,
}

impl HybridIndex {
    pub async fn build(
        collection: impl Into<String>,
        chunks: Vec<String>,
        metadatas: Option<Vec<Value>>,
        embedder: Arc<dyn Embedder>,
        store: Box<dyn DenseStore>,
    ) -> Result<Self> {
        let collection = collection.into();
        let tokenized: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(c)).collect();
        let bm25 = Bm25Index::new(&tokenized);

        if !chunks.is_empty() {
            let ids: Vec<String> = (0..chunks.len()).map(|i| format!("{}-{}", collection, i)).collect();
            let metas: Vec<Value> = (0..chunks.len())
                .map(|i| {
                    let mut meta = metadatas
                        .as_ref()
                        .and_then(|m| m.get(i).cloned())
                        .filter(Value::is_object)
                        .unwrap_or_else(|| json!({}));
                    meta["chunk_id"] = json!(i);
                    meta
                })
                .collect();

            let embeddings = embedder.embed(&chunks).await?;
            store.upsert(&ids, &chunks, &embeddings, &metas).await?;
        }

        info!(collection = %collection, chunks = chunks.len(), "Built hybrid index");

        Ok(Self {
            collection,
            chunks,
            bm25,
            embedder,
            store,
        })
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn resolve(&self, hit: &DenseHit) -> Option<usize> {
        match hit.chunk_id() {
            Some(idx) if idx < self.chunks.len() => Some(idx),
            Some(_) => None,
            None => self.chunks.iter().position(|c| *c == hit.text),
        }
    }
}

#[async_trait]
impl EvidenceRetriever for HybridIndex {
    async fn query(&self, q: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if q.trim().is_empty() || self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let depth = (2 * k).max(MIN_CANDIDATES);

        let embedding = self.embedder.embed_one(q).await?;
        let dense: Vec<usize> = self
            .store
            .query(&embedding, depth)
            .await?
            .iter()
            .filter_map(|hit| self.resolve(hit))
            .collect();

        let sparse: Vec<usize> = self
            .bm25
            .top_n(&tokenize(q), depth)
            .into_iter()
            .map(|(idx, _)| idx)
            .collect();

        debug!(
            collection = %self.collection,
            dense = dense.len(),
            sparse = sparse.len(),
            "Fusing rankings"
        );

        Ok(reciprocal_rank_fusion(&[dense, sparse], k)
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                text: self.chunks[idx].clone(),
                score,
            })
            .collect())
    }
}
