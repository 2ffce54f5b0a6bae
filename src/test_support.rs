//! Deterministic stand-ins used by unit tests so they never need model weights.

use crate::embeddings::Embedder;
use crate::error::EmbeddingError;

/// Feature-hashing bag-of-words embedder.
///
/// Each lowercase alphanumeric token adds 1.0 to the bucket picked by its blake3
/// hash; the result is L2-normalized. Texts sharing words land close together.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        "test/hashing-bow"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes: [u8; 8] = hash.as_bytes()[..8].try_into().expect("8 bytes");
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }
}

/// Embedder that always fails, for error-path tests.
pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        "test/broken"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed(&self, _: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Inference("model exploded".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed("Slice of life in a quiet town").unwrap();
        let b = embedder.embed("Slice of life in a quiet town").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
