//! Deterministic hash-projection embedding model
//!
//! Bag-of-tokens projection: each token is hashed into a bucket of the
//! output vector with a hash-derived sign, then the vector is
//! L2-normalised. Texts sharing tokens land near each other, which is all
//! hybrid search needs when no learned model is available, and identical
//! inputs produce bit-identical vectors across processes and restarts.

use sha2::{Digest, Sha256};

use super::{clip_text, l2_normalize, EmbeddingError, EmbeddingProvider, EMBEDDING_DIMENSIONS};

/// Fallback embedding model with no external dependencies
pub struct HashProjectionModel {
    dim: usize,
}

impl Default for HashProjectionModel {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl HashProjectionModel {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn accumulate(&self, token: &str, out: &mut [f32], weight: f32) {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 is 32 bytes"))
            as usize
            % self.dim;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;

        // Second projection decorrelates tokens that collide on the first
        let bucket2 = u64::from_be_bytes(digest[9..17].try_into().expect("sha256 is 32 bytes"))
            as usize
            % self.dim;
        let sign2 = if digest[17] & 1 == 0 { 1.0 } else { -1.0 };
        out[bucket2] += sign2 * weight * 0.5;
    }
}

impl EmbeddingProvider for HashProjectionModel {
    fn name(&self) -> &str {
        "hash-projection"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let text = clip_text(text).to_lowercase();
        let mut out = vec![0.0_f32; self.dim];

        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            self.accumulate(token, &mut out, 1.0);
        }
        // Bigrams capture a little word order
        for pair in tokens.windows(2) {
            self.accumulate(&format!("{} {}", pair[0], pair[1]), &mut out, 0.5);
        }

        l2_normalize(&mut out);
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic_across_calls() {
        let model = HashProjectionModel::default();
        let a = model.embed("dancer in Mumbai").unwrap();
        let b = model.embed("dancer in Mumbai").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_output_is_unit_norm() {
        let model = HashProjectionModel::default();
        let v = model.embed("an experienced stage actor from Delhi").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(v.len(), EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn test_shared_tokens_increase_similarity() {
        let model = HashProjectionModel::default();
        let query = model.embed("dancer in mumbai").unwrap();
        let relevant = model
            .embed("asha verma mumbai dance singing classical dancer")
            .unwrap();
        let unrelated = model
            .embed("veteran cinematographer based in reykjavik iceland")
            .unwrap();

        let rel = cosine_similarity(&query, &relevant);
        let unrel = cosine_similarity(&query, &unrelated);
        assert!(
            rel > unrel,
            "expected relevant ({rel}) > unrelated ({unrel})"
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        let model = HashProjectionModel::default();
        assert!(model.embed("   ").is_err());
    }

    #[test]
    fn test_batch_matches_single() {
        let model = HashProjectionModel::default();
        let single = model.embed("hindi drama lead").unwrap();
        let batch = model.embed_batch(&["hindi drama lead"]).unwrap();
        assert_eq!(batch[0], single);
    }
}
