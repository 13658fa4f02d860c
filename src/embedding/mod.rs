/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction over the model
/// - ClipModel: local CLIP ViT-B/32 via fastembed (512-dim, text and image
///   towers sharing one space)
mod model;
mod provider;

pub use model::{prepare_text_cache, ClipModel, ModelStage, CLIP_MODEL_NAME, TEXT_MODEL_STAMP};
pub use provider::{check_batch, normalize, EmbeddingError, EmbeddingProvider};

use std::path::PathBuf;

/// Default model weight cache: `<cache dir>/pixseek/models`
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pixseek")
        .join("models")
}
