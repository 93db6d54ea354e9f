//! GeoSearch Store
//!
//! Persistent store for geotagged text records with vector embeddings.
//!
//! ## Features
//!
//! - **RocksDB persistence** - Records survive restarts, writes are synced and retried
//! - **Spatial index** - Lat/lon grid with great-circle distance filtering
//! - **Vector index** - HNSW graph with exact scoring of fresh writes
//! - **Capabilities** - Indexes are provisioned explicitly and queries fail fast without them
//! - **Embedding gateway** - FastEmbed models or deterministic feature hashing
//!
//! ## Example
//!
//! ```ignore
//! use geosearch_store::{Capability, GeoStore, NearestQuery, Record, StoreConfig, VectorEngine};
//!
//! let engine = VectorEngine::hashing(384)?;
//! let store = GeoStore::open(&db_path, StoreConfig::new(384))?;
//! store.install_capability(&Capability::geo_grid())?;
//! store.install_capability(&Capability::hnsw())?;
//!
//! let record = Record::builder()
//!     .at(59.33, 18.06)
//!     .text("hej")
//!     .language(LanguageTag::parse("sv")?)
//!     .embedding(engine.embed("hej")?)
//!     .build()?;
//! store.put(record)?;
//!
//! let vector = engine.embed("hej")?;
//! let origin = GeoPoint::new(59.331, 18.06)?;
//! let results = store.nearest_by_similarity(&NearestQuery::new(&vector, 10).origin(origin).radius(5_000.0))?;
//! ```

mod ann;
pub mod capability;
pub mod clock;
pub mod embedding;
pub mod error;
pub mod geo;
pub mod migration;
pub mod rank;
pub mod record;
pub mod retry;
pub mod storage;

// Re-exports for convenience
pub use ann::AnnConfig;
pub use capability::{Capability, CapabilityKind, InstalledCapability};
pub use clock::{Clock, ManualClock, SystemClock};
pub use embedding::{Embedder, FastEmbedBackend, HashEmbedder, VectorEngine};
pub use error::{Result, StoreError};
pub use geo::{haversine_m, GeoPoint};
pub use rank::{NearestQuery, RankWeights, RankedResult};
pub use record::{LanguageTag, Record, RecordBuilder, RecordBuilderError, RecordId};
pub use retry::RetryPolicy;
pub use storage::{GeoStore, StoreConfig};
