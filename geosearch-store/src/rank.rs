//! Ranking
//!
//! The combined rank blends semantic similarity with spatial proximity.
//! Both inputs are mapped onto [0, 1] first so the weights mean what they
//! say regardless of the distance unit.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::geo::GeoPoint;
use crate::record::Record;

/// Weights for the combined rank
#[derive(Debug, Clone, PartialEq)]
pub struct RankWeights {
    /// Weight of normalized semantic similarity (default: 0.5)
    pub semantic: f32,
    /// Weight of spatial proximity (default: 0.5)
    pub spatial: f32,
    /// Distance at which proximity drops to 0.5 when no radius is given
    pub distance_scale_m: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            spatial: 0.5,
            distance_scale_m: 1_000.0,
        }
    }
}

impl RankWeights {
    /// Combined rank for one candidate.
    ///
    /// `spatial` is `Some(scale)` when the query has an origin; `distance`
    /// is the candidate's distance from it (absent for unpositioned records).
    pub fn rank(&self, similarity: f32, spatial: Option<f64>, distance: Option<f64>) -> f32 {
        let semantic = normalize_similarity(similarity);
        let Some(scale) = spatial else {
            return semantic;
        };

        let ws = self.semantic.max(0.0);
        let wg = self.spatial.max(0.0);
        let total = ws + wg;
        if total <= f32::EPSILON {
            return semantic;
        }

        let proximity = distance.map(|d| proximity(d, scale)).unwrap_or(0.0);
        (ws * semantic + wg * proximity) / total
    }
}

/// Map cosine similarity from [-1, 1] onto [0, 1]
pub fn normalize_similarity(similarity: f32) -> f32 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Inverse distance on [0, 1]: 1 at the origin, 0.5 at `scale_m`
pub fn proximity(distance_m: f64, scale_m: f64) -> f32 {
    let scale = if scale_m.is_finite() && scale_m > 0.0 {
        scale_m
    } else {
        1.0
    };
    (1.0 / (1.0 + distance_m.max(0.0) / scale)) as f32
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Nearest-neighbour request against the store
#[derive(Debug, Clone)]
pub struct NearestQuery<'a> {
    pub vector: &'a [f32],
    pub k: usize,
    pub origin: Option<GeoPoint>,
    pub radius_m: Option<f64>,
    pub weights: RankWeights,
}

impl<'a> NearestQuery<'a> {
    pub fn new(vector: &'a [f32], k: usize) -> Self {
        Self {
            vector,
            k,
            origin: None,
            radius_m: None,
            weights: RankWeights::default(),
        }
    }

    pub fn origin(mut self, origin: GeoPoint) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn radius(mut self, radius_m: f64) -> Self {
        self.radius_m = Some(radius_m);
        self
    }

    pub fn weights(mut self, weights: RankWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Same query without any spatial component
    pub fn semantic_only(&self) -> Self {
        Self {
            vector: self.vector,
            k: self.k,
            origin: None,
            radius_m: None,
            weights: self.weights.clone(),
        }
    }

    pub fn is_spatial(&self) -> bool {
        self.origin.is_some()
    }
}

/// A record scored against a query
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub record: Arc<Record>,
    /// Meters from the query origin, when both have a position
    pub distance_m: Option<f64>,
    /// Raw cosine similarity
    pub similarity: f32,
    /// Combined rank score
    pub rank: f32,
}

/// Order by rank descending, then newest first, then id
pub fn compare_ranked(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.rank
        .partial_cmp(&a.rank)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LanguageTag, RecordId};
    use chrono::{Duration, Utc};

    fn ranked(id: &str, rank: f32, age_secs: i64) -> RankedResult {
        let record = Record::builder()
            .id(RecordId::new(id).unwrap())
            .text("t")
            .embedding(vec![1.0])
            .language(LanguageTag::parse("sv").unwrap())
            .created_at(Utc::now() - Duration::seconds(age_secs))
            .build()
            .unwrap();
        RankedResult {
            record: Arc::new(record),
            distance_m: None,
            similarity: 0.0,
            rank,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_without_origin_is_semantic_only() {
        let weights = RankWeights::default();
        assert_eq!(weights.rank(1.0, None, None), 1.0);
        assert_eq!(weights.rank(0.0, None, Some(10.0)), 0.5);
    }

    #[test]
    fn test_rank_with_origin_blends() {
        let weights = RankWeights::default();
        // At the origin, perfect match
        assert!((weights.rank(1.0, Some(1000.0), Some(0.0)) - 1.0).abs() < 1e-6);
        // At the scale distance proximity is 0.5
        assert!((weights.rank(1.0, Some(1000.0), Some(1000.0)) - 0.75).abs() < 1e-6);
        // Unpositioned record gets no proximity credit
        assert!((weights.rank(1.0, Some(1000.0), None) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_zero_weights_fall_back_to_semantic() {
        let weights = RankWeights {
            semantic: 0.0,
            spatial: 0.0,
            distance_scale_m: 1000.0,
        };
        assert_eq!(weights.rank(1.0, Some(1000.0), Some(5.0)), 1.0);
    }

    #[test]
    fn test_proximity_monotonic() {
        assert_eq!(proximity(0.0, 100.0), 1.0);
        assert!(proximity(50.0, 100.0) > proximity(500.0, 100.0));
    }

    #[test]
    fn test_ties_broken_by_recency() {
        let mut results = vec![ranked("old", 0.9, 100), ranked("new", 0.9, 1), ranked("best", 0.95, 500)];
        results.sort_by(compare_ranked);
        let order: Vec<_> = results.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(order, vec!["best", "new", "old"]);
    }
}
