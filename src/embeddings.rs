//! Text embedding backends
//!
//! `GeminiEmbedder` calls the remote batch endpoint. `HashingEmbedder`
//! is a deterministic local fallback for running without credentials.

use crate::gemini::GeminiClient;
use crate::retrieval::tokenize;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Maximum texts per remote embedding request
const EMBED_BATCH_SIZE: usize = 100;

pub const HASHING_DIMENSIONS: usize = 256;

/// Trait for embedding backends: one vector per input, same order
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::OrchestrationError::EmbeddingError("empty embedding batch".to_string())
        })
    }
}

pub struct GeminiEmbedder {
    client: GeminiClient,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            debug!(model = %self.client.model(), batch = batch.len(), "Embedding batch");
            vectors.extend(self.client.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Signed feature hashing over retrieval tokens, L2-normalized
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_text("Revenue grew 25% in 2020");
        let b = embedder.embed_text("Revenue grew 25% in 2020");

        assert_eq!(a, b);
        assert_eq!(a.len(), HASHING_DIMENSIONS);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_text("revenue 2020");
        let close = embedder.embed_text("2020 | revenue | 100");
        let far = embedder.embed_text("employees headcount office leases");

        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_batch_preserves_order() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["net income".to_string(), "total revenue".to_string()];
        let vectors = tokio_test::block_on(embedder.embed(&texts)).unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], embedder.embed_text("total revenue"));
    }
}
