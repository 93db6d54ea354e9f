//! FastEmbed (ONNX) text embeddings

use super::Embedder;
use crate::error::{Result, StoreError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;

/// Map a configured model name to a fastembed model and its dimension
pub fn parse_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name.trim().to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "paraphrase-multilingual-minilm-l12-v2" => {
            Ok((EmbeddingModel::ParaphraseMLMiniLML12V2, 384))
        }
        other => Err(StoreError::model(format!(
            "unknown embedding model '{}'",
            other
        ))),
    }
}

/// fastembed text model loaded from a local cache directory
pub struct FastEmbedBackend {
    model: TextEmbedding,
    name: String,
    dimension: usize,
}

impl FastEmbedBackend {
    /// Load (downloading into `cache_dir` on first use) the named model
    pub fn load(name: &str, cache_dir: &Path) -> Result<Self> {
        let (model_kind, dimension) = parse_model(name)?;
        std::fs::create_dir_all(cache_dir)?;

        log::info!(
            "Loading embedding model {} from: {}",
            name,
            cache_dir.display()
        );

        let options = InitOptions::new(model_kind)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| StoreError::model(format!("Failed to load {}: {}", name, e)))?;

        // Confirm the dimension by encoding a test string
        let probe = model
            .embed(vec!["test"], None)
            .map_err(|e| StoreError::model(format!("Failed to encode test string: {}", e)))?;
        let actual = probe.first().map(Vec::len).unwrap_or(0);
        if actual != dimension {
            return Err(StoreError::model(format!(
                "model {} produced {}d vectors, expected {}d",
                name, actual, dimension
            )));
        }

        Ok(Self {
            model,
            name: name.to_string(),
            dimension,
        })
    }
}

impl Embedder for FastEmbedBackend {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| StoreError::embedding(format!("Failed to encode text: {}", e)))?;
        embeddings
            .pop()
            .ok_or_else(|| StoreError::embedding("model returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| StoreError::embedding(format!("Failed to encode texts: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
