//! Local ONNX embedding model via fastembed
//!
//! nomic-embed-text-v1.5 truncated to [`EMBEDDING_DIMENSIONS`] via
//! Matryoshka representation (the first N dims of the 768-dim output are
//! a valid N-dim embedding). Model files download on first use into the
//! platform cache directory, or `GREENROOM_MODEL_CACHE` if set.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{clip_text, l2_normalize, EmbeddingError, EmbeddingProvider, BATCH_SIZE, EMBEDDING_DIMENSIONS};

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("GREENROOM_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(dirs) = directories::ProjectDirs::from("ai", "greenroom", "core") {
        return dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create model cache directory {:?}: {}", dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("Failed to initialize embedding model: {}", e))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("Lock poisoned: {}", e))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    l2_normalize(&mut vector);
    vector
}

/// fastembed-backed local embedding provider
#[derive(Default)]
pub struct FastembedModel {
    _unused: (),
}

impl FastembedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eagerly load (and download if needed) the model
    pub fn init(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }
}

impl EmbeddingProvider for FastembedModel {
    fn name(&self) -> &str {
        "nomic-embed-text-v1.5"
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let mut model = get_model()?;
        let embeddings = model
            .embed(vec![clip_text(text)], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(matryoshka_truncate)
            .ok_or_else(|| EmbeddingError::Failed("No embedding generated".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = get_model()?;
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let clipped: Vec<&str> = chunk.iter().map(|t| clip_text(t)).collect();
            let embeddings = model
                .embed(clipped, None)
                .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
            all.extend(embeddings.into_iter().map(matryoshka_truncate));
        }
        Ok(all)
    }
}
