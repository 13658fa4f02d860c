/// CLIP ViT-B/32 through fastembed, loaded lazily
use super::provider::{check_batch, normalize, EmbeddingError, EmbeddingProvider};
use crate::imaging::LoadedImage;
use crate::storage::VECTOR_DIM;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// The only supported model name
pub const CLIP_MODEL_NAME: &str = "clip-vit-b-32";

/// Written next to the cached text model; a different value wipes the cache
pub const TEXT_MODEL_STAMP: &str = "fastembed-4/clip-vit-b-32-text";

const STAMP_FILE: &str = ".pixseek-model-stamp";
const TEXT_DIR: &str = "text";
const VISION_DIR: &str = "vision";

/// Which weights are resident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStage {
    Unloaded,
    TextOnly,
    Full,
}

enum ModelState {
    Unloaded,
    TextOnly(TextEmbedding),
    Full {
        text: TextEmbedding,
        vision: ImageEmbedding,
    },
}

impl ModelState {
    fn stage(&self) -> ModelStage {
        match self {
            ModelState::Unloaded => ModelStage::Unloaded,
            ModelState::TextOnly(_) => ModelStage::TextOnly,
            ModelState::Full { .. } => ModelStage::Full,
        }
    }
}

/// CLIP provider with an explicit loading state machine
///
/// Text queries only load the small text tower. The first image request
/// upgrades to the full model, reusing a text tower that is already loaded.
pub struct ClipModel {
    cache_dir: PathBuf,
    state: Mutex<ModelState>,
    show_download_progress: bool,
}

impl ClipModel {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        if !model_name.eq_ignore_ascii_case(CLIP_MODEL_NAME) {
            return Err(EmbeddingError::InitializationError(format!(
                "Unsupported model: {}. Supported: {}",
                model_name, CLIP_MODEL_NAME
            )));
        }

        Ok(Self {
            cache_dir,
            state: Mutex::new(ModelState::Unloaded),
            show_download_progress: true,
        })
    }

    pub fn with_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self
    }

    pub fn stage(&self) -> ModelStage {
        self.state
            .lock()
            .map(|state| state.stage())
            .unwrap_or(ModelStage::Unloaded)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ModelState>, EmbeddingError> {
        self.state
            .lock()
            .map_err(|_| EmbeddingError::GenerationError("model lock poisoned".to_string()))
    }

    fn load_text(&self) -> Result<TextEmbedding, EmbeddingError> {
        let dir = self.cache_dir.join(TEXT_DIR);
        prepare_text_cache(&dir, TEXT_MODEL_STAMP)?;
        info!("Loading CLIP text model from {}", dir.display());

        let options = InitOptions::new(EmbeddingModel::ClipVitB32)
            .with_cache_dir(dir)
            .with_show_download_progress(self.show_download_progress);
        TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))
    }

    fn load_vision(&self) -> Result<ImageEmbedding, EmbeddingError> {
        let dir = self.cache_dir.join(VISION_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| {
            EmbeddingError::InitializationError(format!("{}: {}", dir.display(), e))
        })?;
        info!(
            "Loading CLIP vision model from {} (~350MB download if not cached)",
            dir.display()
        );

        let options = ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
            .with_cache_dir(dir)
            .with_show_download_progress(self.show_download_progress);
        ImageEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))
    }

    /// Move the state machine to at least `TextOnly`
    fn ensure_text(&self, state: &mut ModelState) -> Result<(), EmbeddingError> {
        if let ModelState::Unloaded = state {
            *state = ModelState::TextOnly(self.load_text()?);
        }
        Ok(())
    }

    /// Move the state machine to `Full`
    fn ensure_full(&self, state: &mut ModelState) -> Result<(), EmbeddingError> {
        if let ModelState::Full { .. } = state {
            return Ok(());
        }

        let vision = self.load_vision()?;
        let text = match std::mem::replace(state, ModelState::Unloaded) {
            ModelState::TextOnly(text) => text,
            _ => self.load_text()?,
        };
        *state = ModelState::Full { text, vision };
        Ok(())
    }
}

impl EmbeddingProvider for ClipModel {
    fn embed_images(&self, images: &[LoadedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.lock()?;
        self.ensure_full(&mut state)?;
        let ModelState::Full { vision, .. } = &*state else {
            return Err(EmbeddingError::InitializationError(
                "vision model not loaded".to_string(),
            ));
        };

        let bytes: Vec<&[u8]> = images.iter().map(|img| img.bytes.as_slice()).collect();
        let mut vectors = vision
            .embed_bytes(&bytes, None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;
        debug!("Embedded {} images", vectors.len());

        check_batch(&vectors, images.len(), VECTOR_DIM)?;
        vectors.iter_mut().for_each(|v| normalize(v));
        Ok(vectors)
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.lock()?;
        self.ensure_text(&mut state)?;
        let text_model = match &*state {
            ModelState::TextOnly(text) | ModelState::Full { text, .. } => text,
            ModelState::Unloaded => {
                return Err(EmbeddingError::InitializationError(
                    "text model not loaded".to_string(),
                ))
            }
        };

        let mut vectors = text_model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        check_batch(&vectors, texts.len(), VECTOR_DIM)?;
        vectors.iter_mut().for_each(|v| normalize(v));
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        VECTOR_DIM
    }

    fn model_name(&self) -> &str {
        CLIP_MODEL_NAME
    }
}

/// Make `dir` hold a text model cache stamped with `stamp`
///
/// A directory carrying another stamp (or none) was produced by a different
/// model library and is wiped.
pub fn prepare_text_cache(dir: &Path, stamp: &str) -> Result<(), EmbeddingError> {
    let stamp_path = dir.join(STAMP_FILE);
    let init_err = |e: std::io::Error| {
        EmbeddingError::InitializationError(format!("text model cache {}: {}", dir.display(), e))
    };

    if dir.exists() {
        match std::fs::read_to_string(&stamp_path) {
            Ok(found) if found.trim() == stamp => return Ok(()),
            Ok(found) => warn!(
                "Text model cache stamp {:?} does not match {:?}, clearing {}",
                found.trim(),
                stamp,
                dir.display()
            ),
            Err(_) => debug!("Text model cache {} has no stamp, clearing", dir.display()),
        }
        std::fs::remove_dir_all(dir).map_err(init_err)?;
    }

    std::fs::create_dir_all(dir).map_err(init_err)?;
    std::fs::write(&stamp_path, stamp).map_err(init_err)?;
    Ok(())
}
