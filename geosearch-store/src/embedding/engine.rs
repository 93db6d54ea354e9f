//! Vector embedding engine
//!
//! High-level API for generating and caching embeddings.

use super::hashing::HashEmbedder;
use super::Embedder;
use crate::error::{Result, StoreError};
use dashmap::DashMap;
use std::sync::Arc;

/// Cached embeddings kept before the cache is reset
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Vector embedding engine with caching
///
/// Wraps one [`Embedder`] with a DashMap cache and checks that every vector
/// has the configured dimension.
pub struct VectorEngine {
    backend: Arc<dyn Embedder>,
    cache: DashMap<String, Vec<f32>>,
    dimension: usize,
}

impl VectorEngine {
    /// Wrap a backend, which must produce `dimension`-long vectors
    pub fn new(backend: Arc<dyn Embedder>, dimension: usize) -> Result<Self> {
        if backend.dimension() != dimension {
            return Err(StoreError::model(format!(
                "model '{}' produces {}d vectors, configured dimension is {}",
                backend.model_name(),
                backend.dimension(),
                dimension
            )));
        }

        log::info!(
            "VectorEngine ready ({}, {}d)",
            backend.model_name(),
            dimension
        );

        Ok(Self {
            backend,
            cache: DashMap::new(),
            dimension,
        })
    }

    /// Engine over the feature-hashing backend
    pub fn hashing(dimension: usize) -> Result<Self> {
        Self::new(Arc::new(HashEmbedder::new(dimension)?), dimension)
    }

    /// Generate embedding with caching
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.backend.embed(text)?;
        self.check(&embedding)?;
        self.remember(text, &embedding);
        Ok(embedding)
    }

    /// Batch embed with caching
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = texts
            .iter()
            .map(|text| self.cache.get(*text).map(|v| v.clone()))
            .collect();

        let uncached: Vec<(usize, &str)> = results
            .iter()
            .enumerate()
            .filter(|(_, cached)| cached.is_none())
            .map(|(i, _)| (i, texts[i]))
            .collect();

        if !uncached.is_empty() {
            let uncached_texts: Vec<&str> = uncached.iter().map(|(_, t)| *t).collect();
            let new_embeddings = self.backend.embed_batch(&uncached_texts)?;
            if new_embeddings.len() != uncached_texts.len() {
                return Err(StoreError::embedding(format!(
                    "backend returned {} embeddings for {} texts",
                    new_embeddings.len(),
                    uncached_texts.len()
                )));
            }

            for ((idx, text), emb) in uncached.iter().zip(new_embeddings.into_iter()) {
                self.check(&emb)?;
                self.remember(text, &emb);
                results[*idx] = Some(emb);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn check(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(StoreError::embedding(format!(
                "expected {}d embedding, got {}d",
                self.dimension,
                embedding.len()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::embedding("embedding contains non-finite values"));
        }
        Ok(())
    }

    fn remember(&self, text: &str, embedding: &[f32]) {
        if self.cache.len() >= MAX_CACHE_ENTRIES {
            self.cache.clear();
        }
        self.cache.insert(text.to_string(), embedding.to_vec());
    }

    /// Get embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that ignores its configured size
    struct Broken;

    impl Embedder for Broken {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 2.0])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_embed_is_cached() {
        let engine = VectorEngine::hashing(32).unwrap();
        let a = engine.embed("hej").unwrap();
        assert_eq!(engine.cache_size(), 1);
        let b = engine.embed("hej").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.cache_size(), 1);

        engine.clear_cache();
        assert_eq!(engine.cache_size(), 0);
    }

    #[test]
    fn test_batch_matches_single() {
        let engine = VectorEngine::hashing(32).unwrap();
        let single = engine.embed("lärare").unwrap();
        let batch = engine.embed_batch(&["snickare", "lärare"]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], single);
        assert_eq!(engine.cache_size(), 2);
    }

    #[test]
    fn test_dimension_is_enforced() {
        assert!(VectorEngine::new(Arc::new(HashEmbedder::new(8).unwrap()), 16).is_err());

        let engine = VectorEngine::new(Arc::new(Broken), 3).unwrap();
        let err = engine.embed("x").unwrap_err();
        assert!(matches!(err, StoreError::Embedding(_)));
        assert_eq!(engine.cache_size(), 0);
    }
}
