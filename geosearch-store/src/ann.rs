//! HNSW approximate nearest-neighbour index
//!
//! The graph is immutable once built, so it is rebuilt in bulk. Records
//! written since the last build are kept in a pending set and scored
//! exactly by the caller, which keeps fresh writes visible immediately.
//!
//! Every change gets a sequence number. A rebuild remembers the sequence at
//! which it started; installing the new graph only clears pending entries
//! up to that point, so writes racing with the build stay pending.

use instant_distance::{Builder, HnswMap, Point, Search};
use std::collections::HashMap;

use crate::rank::cosine_similarity;
use crate::record::RecordId;

/// HNSW point wrapper for semantic search
#[derive(Clone)]
pub(crate) struct VectorPoint(Vec<f32>);

impl Point for VectorPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - similarity (HNSW finds minimum)
        1.0 - cosine_similarity(&self.0, &other.0)
    }
}

/// When to build and rebuild the graph
#[derive(Debug, Clone)]
pub struct AnnConfig {
    /// Below this many records the store scans linearly
    pub min_points: usize,
    /// Rebuild once this many records changed since the last build
    pub max_pending: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            min_points: 256,
            max_pending: 64,
            ef_construction: 100,
            ef_search: 400,
        }
    }
}

pub(crate) struct AnnIndex {
    hnsw: Option<HnswMap<VectorPoint, RecordId>>,
    pending: HashMap<RecordId, u64>,
    seq: u64,
    building: bool,
}

pub(crate) type Graph = HnswMap<VectorPoint, RecordId>;

impl AnnIndex {
    pub(crate) fn new() -> Self {
        Self {
            hnsw: None,
            pending: HashMap::new(),
            seq: 0,
            building: false,
        }
    }

    pub(crate) fn is_built(&self) -> bool {
        self.hnsw.is_some()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record that `id` was inserted, replaced or deleted
    pub(crate) fn mark_changed(&mut self, id: &RecordId) {
        self.seq += 1;
        if self.hnsw.is_some() || self.building {
            self.pending.insert(id.clone(), self.seq);
        }
    }

    /// Whether a (re)build is due for a store holding `total` records
    pub(crate) fn needs_rebuild(&self, config: &AnnConfig, total: usize) -> bool {
        if self.building {
            return false;
        }
        match self.hnsw {
            None => total >= config.min_points,
            Some(_) => self.pending.len() >= config.max_pending.max(1),
        }
    }

    /// Claim the rebuild. Returns the sequence number the snapshot must
    /// cover, or `None` when another rebuild is already running.
    pub(crate) fn begin_rebuild(&mut self) -> Option<u64> {
        if self.building {
            return None;
        }
        self.building = true;
        Some(self.seq)
    }

    /// Build a graph from a snapshot; done without holding the index lock
    pub(crate) fn build(config: &AnnConfig, points: Vec<(RecordId, Vec<f32>)>) -> Option<Graph> {
        if points.is_empty() || points.len() < config.min_points {
            return None;
        }
        let (ids, vectors): (Vec<_>, Vec<_>) = points
            .into_iter()
            .map(|(id, vector)| (id, VectorPoint(vector)))
            .unzip();

        Some(
            Builder::default()
                .ef_construction(config.ef_construction)
                .ef_search(config.ef_search)
                .build(vectors, ids),
        )
    }

    /// Swap in a graph built from a snapshot taken at `snapshot_seq`
    pub(crate) fn install(&mut self, hnsw: Option<Graph>, snapshot_seq: u64) {
        self.building = false;
        match hnsw {
            Some(graph) => {
                self.pending.retain(|_, seq| *seq > snapshot_seq);
                self.hnsw = Some(graph);
            }
            None => {
                self.pending.clear();
                self.hnsw = None;
            }
        }
    }

    /// Approximate neighbours plus every pending id. `None` means the graph
    /// is not built and the caller must scan linearly.
    pub(crate) fn candidates(&self, query: &[f32], limit: usize) -> Option<Vec<RecordId>> {
        let hnsw = self.hnsw.as_ref()?;
        let query_point = VectorPoint(query.to_vec());
        let mut search = Search::default();

        let mut ids: Vec<RecordId> = Vec::with_capacity(limit + self.pending.len());
        for item in hnsw.search(&query_point, &mut search) {
            if ids.len() >= limit {
                break;
            }
            if self.pending.contains_key(item.value) {
                continue;
            }
            ids.push(item.value.clone());
        }
        ids.extend(self.pending.keys().cloned());
        Some(ids)
    }
}
