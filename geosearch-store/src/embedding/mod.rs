//! Embedding gateway
//!
//! `embed(text)` turns canonical-language text into a fixed-dimension
//! vector. Backends implement [`Embedder`]; [`VectorEngine`] wraps one with
//! a cache and enforces the configured dimension.

mod discovery;
mod engine;
mod fastembed_backend;
mod hashing;

pub use discovery::find_embedding_cache;
pub use engine::VectorEngine;
pub use fastembed_backend::{parse_model, FastEmbedBackend};
pub use hashing::HashEmbedder;

use crate::error::Result;

/// A text embedding backend
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Length of every produced vector
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}
