use crate::error::{MuseError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one text and check the deployment dimension.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| MuseError::EmbeddingFailed("provider returned no vectors".into()))?;
        if vector.len() != self.dimension() {
            return Err(MuseError::EmbeddingFailed(format!(
                "dimension mismatch: got {}, expected {}",
                vector.len(),
                self.dimension()
            )));
        }
        Ok(vector)
    }
}

/// Zero-config embedding provider.
///
/// Deterministic feature hashing over lower-cased tokens (no network, no model downloads).
/// Restatements that share most of their words land close together, which is
/// enough for the CLI's offline mode and for tests.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let mut token_count = 0u32;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            token_count += 1;
            let mut hash = 1469598103934665603u64;
            for b in token.to_lowercase().as_bytes() {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(1099511628211u64);
            }

            let idx = (hash as usize) % self.dimension;
            vec[idx] += 1.0;
        }

        if token_count == 0 {
            return vec;
        }

        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }

        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            return Err(MuseError::EmbeddingFailed("hash embedding dimension is 0".into()));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
