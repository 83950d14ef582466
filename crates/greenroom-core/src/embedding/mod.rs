//! Embedding Generation
//!
//! Turns text into unit-norm vectors of a fixed dimension. Providers are a
//! capability set - `embed`, `embed_batch`, `dim` - so the engine never
//! cares which model is behind them:
//!
//! - [`HashProjectionModel`] - deterministic token-hash projection, always
//!   available, no model files. The fallback when no real model is wired.
//! - `FastembedModel` (feature `fastembed-model`) - local ONNX inference.
//!
//! The [`pipeline::EmbeddingPipeline`] front adds caching and batching on
//! top of whichever provider is configured.

mod hash_model;
pub mod pipeline;

#[cfg(feature = "fastembed-model")]
mod fastembed_model;

pub use hash_model::HashProjectionModel;
pub use pipeline::EmbeddingPipeline;

#[cfg(feature = "fastembed-model")]
pub use fastembed_model::FastembedModel;

/// Default embedding dimensions
pub const EMBEDDING_DIMENSIONS: usize = 256;

/// Maximum text length fed to a provider (longer inputs are truncated)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Texts per provider call
pub const BATCH_SIZE: usize = 32;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Failed to initialize the model
    ModelInit(String),
    /// Failed to generate an embedding
    Failed(String),
    /// Invalid input (empty text)
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "Model initialization failed: {}", e),
            EmbeddingError::Failed(e) => write!(f, "Embedding generation failed: {}", e),
            EmbeddingError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Capability set every embedding back-end implements.
///
/// Outputs MUST be L2-normalised; callers rely on dot products being
/// cosine similarities.
pub trait EmbeddingProvider: Send + Sync {
    /// Human-readable model name (for stats and the usage report)
    fn name(&self) -> &str;

    /// Output dimensionality
    fn dim(&self) -> usize;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch; the default loops, real models override with true
    /// batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// L2-normalize in place; zero vectors are left untouched
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Truncate to `MAX_TEXT_LENGTH` on a char boundary
pub(crate) fn clip_text(text: &str) -> &str {
    if text.len() <= MAX_TEXT_LENGTH {
        return text;
    }
    let mut end = MAX_TEXT_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-4);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-4);
        assert!((v[1] - 0.8).abs() < 1e-4);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_noop() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_clip_text_respects_char_boundaries() {
        let long = "ü".repeat(MAX_TEXT_LENGTH);
        let clipped = clip_text(&long);
        assert!(clipped.len() <= MAX_TEXT_LENGTH);
        assert!(clipped.chars().all(|c| c == 'ü'));
    }
}
