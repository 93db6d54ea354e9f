//! Feature-hashing embedder
//!
//! Deterministic and model-free: word unigrams and character trigrams are
//! hashed with FNV-1a into signed buckets, then the vector is L2
//! normalized. Texts sharing words or word fragments land close together.

use super::Embedder;
use crate::error::{Result, StoreError};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// FNV-1a feature hashing embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(StoreError::validation("dimension must be positive"));
        }
        Ok(Self { dimension })
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        // Top bit picks the sign so collisions tend to cancel
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, word, WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "fnv1a-hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::cosine_similarity;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64).unwrap();
        let a = embedder.embed("Sjuksköterska i Stockholm").unwrap();
        let b = embedder.embed("Sjuksköterska i Stockholm").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashEmbedder::new(128).unwrap();
        let a = embedder.embed("Hej!").unwrap();
        let b = embedder.embed("hej").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_are_closer() {
        let embedder = HashEmbedder::new(384).unwrap();
        let query = embedder.embed("lärare matematik").unwrap();
        let related = embedder.embed("lärare i matematik och fysik").unwrap();
        let unrelated = embedder.embed("snickare bygg").unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8).unwrap();
        assert!(embedder.embed("  ...  ").unwrap().iter().all(|x| *x == 0.0));
        assert!(HashEmbedder::new(0).is_err());
    }
}
