//! Offline feature-hashing embedder.
//!
//! Each lowercased alphanumeric token is hashed with SHA-256; the first four
//! digest bytes pick a bucket and the fifth picks a sign. The bucket counts
//! are L2-normalized, so texts sharing vocabulary land close together under
//! squared-L2 distance. Deterministic and dependency-free at runtime, which
//! makes it the backend of last resort.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingBackend;
use crate::provider::AttemptError;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub const NAME: &'static str = "hashing";

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
