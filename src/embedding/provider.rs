//! Embedding provider trait and shared vector helpers
use crate::imaging::LoadedImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Both methods are batched and return one unit-length vector per input, in
/// input order. Image and text vectors share one space so they can be added.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed already decode-checked images
    fn embed_images(&self, images: &[LoadedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed free-text phrases
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Scale a vector to unit length in place; zero vectors are left alone
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Check a batch result against the expected count and dimension
pub fn check_batch(
    vectors: &[Vec<f32>],
    expected_len: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::GenerationError(format!(
            "expected {} embeddings, got {}",
            expected_len,
            vectors.len()
        )));
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}
