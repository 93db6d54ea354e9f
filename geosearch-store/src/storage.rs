//! RocksDB storage with spatial and HNSW indexing
//!
//! Persistent storage for records using RocksDB with LZ4 compression.
//! Every record is cached in memory at open; the spatial grid and the HNSW
//! graph are derived from that cache and never persisted.
//!
//! Lock order: a record's map entry is always taken before the grid or
//! HNSW locks, never the reverse.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::ann::{AnnConfig, AnnIndex};
use crate::capability::{Capability, CapabilityKind, InstalledCapability};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::geo::SpatialGrid;
use crate::migration;
use crate::rank::{compare_ranked, cosine_similarity, NearestQuery, RankedResult};
use crate::record::{LanguageTag, Record, RecordId};
use crate::retry::RetryPolicy;

const RECORD_PREFIX: &str = "rec:";
const CAPABILITY_PREFIX: &str = "cap:";

fn record_key(id: &RecordId) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

fn capability_key(name: &str) -> String {
    format!("{}{}", CAPABILITY_PREFIX, name)
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Embedding dimension every record must have
    pub dimension: usize,
    /// Languages accepted as a record's source language
    pub supported_languages: Vec<LanguageTag>,
    /// Retry policy for durable writes and for opening the database
    pub write_retry: RetryPolicy,
    /// HNSW build thresholds
    pub ann: AnnConfig,
    /// Spatial grid cell size in degrees
    pub grid_cell_degrees: f64,
    /// Sync the WAL on every write
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            supported_languages: ["en", "sv"]
                .iter()
                .filter_map(|tag| LanguageTag::parse(tag).ok())
                .collect(),
            write_retry: RetryPolicy::default(),
            ann: AnnConfig::default(),
            grid_cell_degrees: 0.1,
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn languages(mut self, languages: Vec<LanguageTag>) -> Self {
        self.supported_languages = languages;
        self
    }

    pub fn write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    pub fn ann(mut self, ann: AnnConfig) -> Self {
        self.ann = ann;
        self
    }

    pub fn supports(&self, language: &LanguageTag) -> bool {
        self.supported_languages.contains(language)
    }
}

/// RocksDB-based record store with spatial and vector indexing
pub struct GeoStore {
    db: Arc<DB>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    records: DashMap<RecordId, Arc<Record>>,
    grid: RwLock<SpatialGrid>,
    ann: RwLock<AnnIndex>,
    capabilities: DashMap<String, InstalledCapability>,
    /// Makes every write attempt fail with this error kind
    #[cfg(test)]
    write_fault: parking_lot::Mutex<Option<std::io::ErrorKind>>,
}

impl GeoStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    /// Open with an explicit time source
    pub fn open_with_clock(
        path: impl AsRef<Path>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if config.dimension == 0 {
            return Err(StoreError::validation("dimension must be positive"));
        }
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = config
            .write_retry
            .run(
                |_| DB::open(&opts, path).map_err(StoreError::from),
                StoreError::is_transient,
            )
            .map_err(|(attempts, err)| storage_error(attempts, err))?;

        let has_records = has_prefix(&db, RECORD_PREFIX)?;
        migration::ensure_schema(&db, has_records)?;

        log::info!("GeoStore opened at: {}", path.display());

        let store = Self {
            db: Arc::new(db),
            grid: RwLock::new(SpatialGrid::new(config.grid_cell_degrees)),
            ann: RwLock::new(AnnIndex::new()),
            config,
            clock,
            records: DashMap::new(),
            capabilities: DashMap::new(),
            #[cfg(test)]
            write_fault: parking_lot::Mutex::new(None),
        };

        store.load_cache()?;
        store.maybe_rebuild_ann();
        Ok(store)
    }

    /// Load records and capability markers into memory
    fn load_cache(&self) -> Result<()> {
        let mut count = 0;
        let mut skipped = 0;
        let mut grid = SpatialGrid::new(self.config.grid_cell_degrees);

        for item in self.db.iterator(IteratorMode::From(
            RECORD_PREFIX.as_bytes(),
            Direction::Forward,
        )) {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);
            let Some(id) = key_str.strip_prefix(RECORD_PREFIX) else {
                break;
            };

            // Gracefully handle deserialization errors
            let record = match bincode::deserialize::<Record>(&value) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Failed to deserialize record {}: {}. Skipping.", id, e);
                    skipped += 1;
                    continue;
                }
            };

            if record.embedding.len() != self.config.dimension {
                return Err(StoreError::schema(format!(
                    "record {} has embedding dimension {}, store is configured for {}",
                    record.id,
                    record.embedding.len(),
                    self.config.dimension
                )));
            }
            if !self.config.supports(&record.language) {
                log::warn!(
                    "Record {} has language '{}' outside the supported set",
                    record.id,
                    record.language
                );
            }

            grid.upsert(&record.id, record.position);
            self.records.insert(record.id.clone(), Arc::new(record));
            count += 1;
        }

        for item in self.db.iterator(IteratorMode::From(
            CAPABILITY_PREFIX.as_bytes(),
            Direction::Forward,
        )) {
            let (key, value) = item?;
            if !key.starts_with(CAPABILITY_PREFIX.as_bytes()) {
                break;
            }
            let marker: InstalledCapability = serde_json::from_slice(&value)?;
            self.capabilities.insert(marker.name.clone(), marker);
        }

        *self.grid.write() = grid;

        if count > 0 {
            log::info!("Loaded {} records from disk", count);
        }
        if skipped > 0 {
            log::warn!("Skipped {} records due to deserialization errors", skipped);
        }
        Ok(())
    }

    /// Readiness check: one read against the database
    pub fn probe(&self) -> Result<()> {
        self.db
            .get(migration::DB_VERSION_KEY)
            .map(|_| ())
            .map_err(|err| storage_error(1, err.into()))
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record by ID
    pub fn get(&self, id: &RecordId) -> Option<Arc<Record>> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// Insert or replace a record.
    ///
    /// On replacement the original `created_at` is kept. Both timestamps of
    /// a new record, and `updated_at` of a replaced one, come from the clock.
    pub fn put(&self, record: Record) -> Result<Arc<Record>> {
        self.validate(&record)?;
        let now = self.clock.now();
        let id = record.id.clone();
        let key = record_key(&id);

        // Holding the entry serializes writers for this id
        let entry = self.records.entry(id.clone());
        let created_at = match &entry {
            Entry::Occupied(existing) => existing.get().created_at,
            Entry::Vacant(_) => now,
        };
        let stored = Record {
            created_at,
            updated_at: now,
            ..record
        };

        let bytes = bincode::serialize(&stored)?;
        self.write(|batch| batch.put(key.as_bytes(), &bytes))?;

        let stored = Arc::new(stored);
        self.grid.write().upsert(&id, stored.position);
        self.ann.write().mark_changed(&id);
        match entry {
            Entry::Occupied(mut existing) => {
                existing.insert(stored.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored.clone());
            }
        }

        log::debug!("Stored record {}", id);
        Ok(stored)
    }

    /// Delete a record permanently. Deleting an absent id is a no-op.
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        let entry = match self.records.entry(id.clone()) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => return Ok(false),
        };

        let key = record_key(id);
        self.write(|batch| batch.delete(key.as_bytes()))?;

        self.grid.write().remove(id);
        self.ann.write().mark_changed(id);
        entry.remove();

        log::debug!("Deleted record {}", id);
        Ok(true)
    }

    /// Records ranked against a query vector, optionally filtered and ranked
    /// by distance from an origin
    pub fn nearest_by_similarity(&self, query: &NearestQuery<'_>) -> Result<Vec<RankedResult>> {
        self.check_vector(query.vector)?;
        if query.radius_m.is_some() && query.origin.is_none() {
            return Err(StoreError::validation("radius given without an origin"));
        }
        if let Some(radius) = query.radius_m {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(StoreError::validation(format!(
                    "radius must be positive, got {}",
                    radius
                )));
            }
        }
        if let Some(origin) = &query.origin {
            origin.validate()?;
        }

        if !self.has_capability(CapabilityKind::VectorIndex) {
            return Err(StoreError::CapabilityMissing(CapabilityKind::VectorIndex));
        }
        if query.is_spatial() && !self.has_capability(CapabilityKind::SpatialIndex) {
            return Err(StoreError::CapabilityMissing(CapabilityKind::SpatialIndex));
        }

        if query.k == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<RankedResult> = match (query.origin, query.radius_m) {
            (Some(origin), Some(radius)) => {
                let hits = self.grid.read().within(&origin, radius);
                // The grid only nominates; distance is taken from the record
                // actually returned, which may have moved since
                hits.into_iter()
                    .filter_map(|(id, _)| {
                        let record = self.get(&id)?;
                        let distance = origin.distance_to(&record.position?);
                        (distance <= radius).then(|| self.score(query, record, Some(distance)))
                    })
                    .collect()
            }
            (Some(origin), None) => {
                // Proximity changes the order, so every record is a candidate
                self.records
                    .iter()
                    .map(|e| {
                        let record = e.value().clone();
                        let distance = record.position.map(|p| origin.distance_to(&p));
                        self.score(query, record, distance)
                    })
                    .collect()
            }
            _ => self
                .vector_candidates(query.vector, query.k)
                .into_iter()
                .map(|record| self.score(query, record, None))
                .collect(),
        };

        results.sort_by(compare_ranked);
        results.truncate(query.k);
        Ok(results)
    }

    fn score(&self, query: &NearestQuery<'_>, record: Arc<Record>, distance: Option<f64>) -> RankedResult {
        let similarity = cosine_similarity(query.vector, &record.embedding);
        let scale = query
            .origin
            .map(|_| query.radius_m.unwrap_or(query.weights.distance_scale_m));
        let rank = query.weights.rank(similarity, scale, distance);
        RankedResult {
            record,
            distance_m: distance,
            similarity,
            rank,
        }
    }

    /// Semantic candidates: HNSW neighbours plus pending changes, or every
    /// record while the graph is not built
    fn vector_candidates(&self, vector: &[f32], k: usize) -> Vec<Arc<Record>> {
        self.maybe_rebuild_ann();

        let ids = self.ann.read().candidates(vector, k.saturating_mul(2));
        match ids {
            Some(ids) => {
                let mut seen = HashSet::with_capacity(ids.len());
                ids.into_iter()
                    .filter(|id| seen.insert(id.clone()))
                    .filter_map(|id| self.get(&id))
                    .collect()
            }
            None => self.records.iter().map(|e| e.value().clone()).collect(),
        }
    }

    /// Rebuild the HNSW graph if enough has changed
    fn maybe_rebuild_ann(&self) {
        // Count before taking the index lock to keep the lock order
        let total = self.records.len();
        let seq = {
            let mut ann = self.ann.write();
            if !ann.needs_rebuild(&self.config.ann, total) {
                return;
            }
            match ann.begin_rebuild() {
                Some(seq) => seq,
                None => return,
            }
        };

        let points: Vec<(RecordId, Vec<f32>)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().embedding.clone()))
            .collect();
        let count = points.len();
        let graph = AnnIndex::build(&self.config.ann, points);
        let built = graph.is_some();
        self.ann.write().install(graph, seq);

        if built {
            log::debug!("Rebuilt HNSW index over {} records", count);
        }
    }

    /// Install a capability. Returns false if it was already installed.
    pub fn install_capability(&self, capability: &Capability) -> Result<bool> {
        if capability.name.trim().is_empty() {
            return Err(StoreError::validation("capability name must not be empty"));
        }

        let entry = match self.capabilities.entry(capability.name.clone()) {
            Entry::Occupied(existing) => {
                let installed = existing.get();
                if installed.kind != capability.kind {
                    return Err(StoreError::validation(format!(
                        "capability '{}' is already installed as {}",
                        installed.name, installed.kind
                    )));
                }
                return Ok(false);
            }
            Entry::Vacant(vacant) => vacant,
        };

        let marker = InstalledCapability {
            name: capability.name.clone(),
            kind: capability.kind,
            installed_at: self.clock.now(),
        };
        let bytes = serde_json::to_vec(&marker)?;
        let key = capability_key(&capability.name);
        self.write(|batch| batch.put(key.as_bytes(), &bytes))?;
        entry.insert(marker);

        log::info!(
            "Installed capability '{}' ({})",
            capability.name,
            capability.kind
        );
        Ok(true)
    }

    pub fn is_capability_installed(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Whether any installed capability provides `kind`
    pub fn has_capability(&self, kind: CapabilityKind) -> bool {
        self.capabilities.iter().any(|e| e.value().kind == kind)
    }

    /// Installed capabilities, sorted by name
    pub fn capabilities(&self) -> Vec<InstalledCapability> {
        let mut installed: Vec<_> = self.capabilities.iter().map(|e| e.value().clone()).collect();
        installed.sort_by(|a, b| a.name.cmp(&b.name));
        installed
    }

    /// Get store statistics
    pub fn stats(&self) -> serde_json::Value {
        let mut by_language: BTreeMap<String, usize> = BTreeMap::new();
        let mut positioned = 0;

        for entry in self.records.iter() {
            let record = entry.value();
            *by_language
                .entry(record.language.to_string())
                .or_insert(0) += 1;
            if record.position.is_some() {
                positioned += 1;
            }
        }

        let (ann_built, ann_pending) = {
            let ann = self.ann.read();
            (ann.is_built(), ann.pending_len())
        };

        serde_json::json!({
            "totalRecords": self.records.len(),
            "positionedRecords": positioned,
            "byLanguage": by_language,
            "dimension": self.config.dimension,
            "capabilities": self.capabilities().iter().map(|c| &c.name).collect::<Vec<_>>(),
            "annIndexBuilt": ann_built,
            "annPending": ann_pending,
        })
    }

    fn validate(&self, record: &Record) -> Result<()> {
        if let Some(position) = &record.position {
            position.validate()?;
        }
        if record.text.trim().is_empty() {
            return Err(StoreError::validation("record text must not be empty"));
        }
        if !self.config.supports(&record.language) {
            return Err(StoreError::validation(format!(
                "unsupported language '{}'",
                record.language
            )));
        }
        self.check_vector(&record.embedding)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::validation("embedding contains non-finite values"));
        }
        Ok(())
    }

    /// Durable write with bounded retry on transient errors
    fn write(&self, fill: impl Fn(&mut WriteBatch)) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);

        self.config
            .write_retry
            .run(
                |_| {
                    #[cfg(test)]
                    {
                        if let Some(kind) = *self.write_fault.lock() {
                            return Err(StoreError::Io(std::io::Error::new(kind, "write rejected")));
                        }
                    }
                    let mut batch = WriteBatch::default();
                    fill(&mut batch);
                    self.db.write_opt(batch, &write_opts)?;
                    Ok(())
                },
                StoreError::is_transient,
            )
            .map_err(|(attempts, err)| storage_error(attempts, err))
    }
}

fn storage_error(attempts: u32, err: StoreError) -> StoreError {
    if err.is_transient() {
        StoreError::Unavailable {
            attempts,
            source: Box::new(err),
        }
    } else {
        err
    }
}

fn has_prefix(db: &DB, prefix: &str) -> Result<bool> {
    let mut iter = db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
    match iter.next() {
        Some(item) => {
            let (key, _) = item?;
            Ok(key.starts_with(prefix.as_bytes()))
        }
        None => Ok(false),
    }
}
