//! Dense vector store seam and an in-process cosine implementation

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// One dense match with its similarity and stored metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DenseHit {
    pub text: String,
    pub score: f32,
    pub meta: Value,
}

impl DenseHit {
    /// Explicit chunk index from metadata, if one was stored
    pub fn chunk_id(&self) -> Option<usize> {
        let raw = self.meta.get("chunk_id")?;
        raw.as_u64()
            .map(|v| v as usize)
            .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
    }
}

/// Trait for dense similarity backends
#[async_trait]
pub trait DenseStore: Send + Sync {
    async fn upsert(
        &self,
        ids: &[String],
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Value],
    ) -> Result<()>;

    /// Top `k` by similarity, highest first
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<DenseHit>>;
}

#[derive(Debug, Clone)]
struct StoredVector {
    id: String,
    text: String,
    embedding: Vec<f32>,
    meta: Value,
}

/// Brute-force cosine store held in memory
pub struct InMemoryDenseStore {
    collection: String,
    vectors: RwLock<Vec<StoredVector>>,
}

impl InMemoryDenseStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            vectors: RwLock::new(Vec::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }
}

#[async_trait]
impl DenseStore for InMemoryDenseStore {
    async fn upsert(
        &self,
        ids: &[String],
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Value],
    ) -> Result<()> {
        if ids.len() != texts.len() || ids.len() != embeddings.len() {
            return Err(OrchestrationError::EmbeddingError(format!(
                "upsert length mismatch: {} ids, {} texts, {} embeddings",
                ids.len(),
                texts.len(),
                embeddings.len()
            )));
        }

        let mut vectors = self.vectors.write().await;
        let dimension = vectors
            .first()
            .map(|v| v.embedding.len())
            .or_else(|| embeddings.first().map(Vec::len));

        for (i, id) in ids.iter().enumerate() {
            if Some(embeddings[i].len()) != dimension {
                return Err(OrchestrationError::EmbeddingError(format!(
                    "collection {} expects dimension {:?}, got {}",
                    self.collection,
                    dimension,
                    embeddings[i].len()
                )));
            }

            let entry = StoredVector {
                id: id.clone(),
                text: texts[i].clone(),
                embedding: embeddings[i].clone(),
                meta: metadatas.get(i).cloned().unwrap_or(Value::Null),
            };

            match vectors.iter_mut().find(|v| v.id == *id) {
                Some(existing) => *existing = entry,
                None => vectors.push(entry),
            }
        }

        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<DenseHit>> {
        let vectors = self.vectors.read().await;

        let mut hits: Vec<DenseHit> = Vec::with_capacity(vectors.len());
        for stored in vectors.iter() {
            if stored.embedding.len() != embedding.len() {
                return Err(OrchestrationError::RetrievalError(format!(
                    "query dimension {} does not match collection {} ({})",
                    embedding.len(),
                    self.collection,
                    stored.embedding.len()
                )));
            }
            hits.push(DenseHit {
                text: stored.text.clone(),
                score: cosine_similarity(embedding, &stored.embedding),
                meta: stored.meta.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
