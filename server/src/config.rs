//! Command-line and environment configuration.

use clap::{Parser, ValueEnum};
use geosearch_store::{Capability, CapabilityKind, LanguageTag, RankWeights, StoreConfig};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::query::QueryConfig;
use crate::rpc::ServeLimits;
use crate::translate::LanguagePair;

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Deterministic feature hashing, no model files needed
    Hashing,
    /// ONNX text models via fastembed
    Fastembed,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "geosearch")]
#[command(about = "Cross-language geo-semantic search over JSON-RPC on stdio")]
#[command(version)]
pub struct CliArgs {
    /// Directory holding the database and translation models
    #[arg(long, env = "GEOSEARCH_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Database name (subdirectory of the data directory)
    #[arg(long, env = "GEOSEARCH_DATABASE", default_value = "geosearch")]
    pub database: String,

    /// Installed translation models [default: <data-dir>/translation]
    #[arg(long, env = "GEOSEARCH_TRANSLATION_MODELS")]
    pub models_dir: Option<PathBuf>,

    /// Directory to install missing translation model packages from
    #[arg(long, env = "GEOSEARCH_MODEL_PACKAGES")]
    pub model_packages: Option<PathBuf>,

    /// Supported languages, comma separated
    #[arg(long, env = "GEOSEARCH_LANGUAGES", default_value = "en,sv")]
    pub languages: String,

    /// Language all records are normalized to before embedding
    #[arg(long, env = "GEOSEARCH_CANONICAL_LANGUAGE", default_value = "sv")]
    pub canonical_language: String,

    /// Language assumed for queries without a language hint
    #[arg(long, env = "GEOSEARCH_QUERY_LANGUAGE", default_value = "en")]
    pub query_language: String,

    /// Embedding backend
    #[arg(long, env = "GEOSEARCH_EMBEDDER", value_enum, default_value = "hashing")]
    pub embedder: EmbedderKind,

    /// fastembed model name
    #[arg(long, env = "GEOSEARCH_EMBEDDING_MODEL", default_value = "all-minilm-l6-v2")]
    pub embedding_model: String,

    /// Embedding model cache directory [default: discovered]
    #[arg(long, env = "GEOSEARCH_MODELS_PATH")]
    pub embedding_cache: Option<PathBuf>,

    /// Embedding dimension
    #[arg(long, env = "GEOSEARCH_DIMENSION", default_value_t = 384)]
    pub dimension: usize,

    /// Weight of semantic similarity in the combined rank
    #[arg(long, env = "GEOSEARCH_SEMANTIC_WEIGHT", default_value_t = 0.5)]
    pub semantic_weight: f32,

    /// Weight of spatial proximity in the combined rank
    #[arg(long, env = "GEOSEARCH_SPATIAL_WEIGHT", default_value_t = 0.5)]
    pub spatial_weight: f32,

    /// Distance in meters at which proximity halves when no radius is given
    #[arg(long, env = "GEOSEARCH_DISTANCE_SCALE_M", default_value_t = 1000.0)]
    pub distance_scale_m: f64,

    /// Fall back to semantic-only search when the spatial index is missing
    #[arg(long = "allow-degraded-search", env = "GEOSEARCH_ALLOW_DEGRADED")]
    pub allow_degraded: bool,

    /// Milliseconds between store readiness probes
    #[arg(long, env = "GEOSEARCH_PROBE_INTERVAL_MS", default_value_t = 2000)]
    pub probe_interval_ms: u64,

    /// Consecutive bootstrap failures tolerated before giving up
    #[arg(long, env = "GEOSEARCH_MAX_BOOTSTRAP_FAILURES", default_value_t = 30)]
    pub max_bootstrap_failures: u32,

    /// Name of the spatial index capability
    #[arg(long, env = "GEOSEARCH_SPATIAL_CAPABILITY", default_value = "geo_grid")]
    pub spatial_capability: String,

    /// Name of the vector index capability
    #[arg(long, env = "GEOSEARCH_VECTOR_CAPABILITY", default_value = "hnsw")]
    pub vector_capability: String,

    /// Autocomplete labels in the canonical language, one per line
    #[arg(long, env = "GEOSEARCH_VOCABULARY")]
    pub vocabulary: Option<PathBuf>,

    /// Terms too broad to search without refinement, one per line
    #[arg(long, env = "GEOSEARCH_GENERAL_TERMS")]
    pub general_terms: Option<PathBuf>,

    /// Queries matching this many vocabulary labels need refinement (0 disables)
    #[arg(long, env = "GEOSEARCH_REFINE_THRESHOLD", default_value_t = 10)]
    pub refine_threshold: usize,

    /// Longest accepted request line in bytes
    #[arg(long, env = "GEOSEARCH_MAX_REQUEST_BYTES", default_value_t = 1024 * 1024)]
    pub max_request_bytes: usize,

    /// Requests handled at once; further lines wait
    #[arg(long, env = "GEOSEARCH_MAX_IN_FLIGHT", default_value_t = 64)]
    pub max_in_flight: usize,

    /// Also write logs to daily files in this directory
    #[arg(long, env = "GEOSEARCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store_path: PathBuf,
    pub models_dir: PathBuf,
    pub model_packages: Option<PathBuf>,
    pub languages: Vec<LanguageTag>,
    pub canonical_language: LanguageTag,
    pub query_language: LanguageTag,
    pub embedder: EmbedderKind,
    pub embedding_model: String,
    pub embedding_cache: Option<PathBuf>,
    pub dimension: usize,
    pub weights: RankWeights,
    pub allow_degradation: bool,
    pub probe_interval: Duration,
    pub max_bootstrap_failures: u32,
    pub spatial_capability: String,
    pub vector_capability: String,
    pub vocabulary: Option<PathBuf>,
    pub general_terms: Option<PathBuf>,
    pub refine_threshold: usize,
    pub serve_limits: ServeLimits,
}

fn parse_language(value: &str, what: &str) -> ServiceResult<LanguageTag> {
    LanguageTag::parse(value)
        .map_err(|_| ServiceError::validation(format!("invalid {} '{}'", what, value)))
}

impl CliArgs {
    /// Validate and resolve defaults.
    pub fn into_config(self) -> ServiceResult<ServiceConfig> {
        let mut languages = Vec::new();
        for raw in self.languages.split(',').filter(|s| !s.trim().is_empty()) {
            let tag = parse_language(raw, "language")?;
            if !languages.contains(&tag) {
                languages.push(tag);
            }
        }
        let canonical_language = parse_language(&self.canonical_language, "canonical language")?;
        let query_language = parse_language(&self.query_language, "query language")?;
        for tag in [&canonical_language, &query_language] {
            if !languages.contains(tag) {
                return Err(ServiceError::validation(format!(
                    "language '{}' is not in the supported set",
                    tag
                )));
            }
        }

        if self.dimension == 0 {
            return Err(ServiceError::validation("dimension must be positive"));
        }
        let weights_valid = [self.semantic_weight, self.spatial_weight]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0);
        if !weights_valid || self.semantic_weight + self.spatial_weight <= 0.0 {
            return Err(ServiceError::validation(
                "rank weights must be non-negative and not both zero",
            ));
        }
        if !self.distance_scale_m.is_finite() || self.distance_scale_m <= 0.0 {
            return Err(ServiceError::validation("distance scale must be positive"));
        }
        if self.probe_interval_ms == 0 || self.max_bootstrap_failures == 0 {
            return Err(ServiceError::validation(
                "probe interval and bootstrap failure limit must be positive",
            ));
        }
        let spatial_capability = self.spatial_capability.trim().to_string();
        let vector_capability = self.vector_capability.trim().to_string();
        if spatial_capability.is_empty() || vector_capability.is_empty() {
            return Err(ServiceError::validation("capability names must not be empty"));
        }
        // One marker per name: a shared name would mark both indexes installed
        if spatial_capability == vector_capability {
            return Err(ServiceError::validation(format!(
                "spatial and vector capabilities must have different names, both are '{}'",
                spatial_capability
            )));
        }
        if self.max_request_bytes == 0 || self.max_in_flight == 0 {
            return Err(ServiceError::validation(
                "request size and in-flight limits must be positive",
            ));
        }

        let models_dir = self
            .models_dir
            .unwrap_or_else(|| self.data_dir.join("translation"));

        Ok(ServiceConfig {
            store_path: self.data_dir.join(&self.database),
            models_dir,
            model_packages: self.model_packages,
            languages,
            canonical_language,
            query_language,
            embedder: self.embedder,
            embedding_model: self.embedding_model,
            embedding_cache: self.embedding_cache,
            dimension: self.dimension,
            weights: RankWeights {
                semantic: self.semantic_weight,
                spatial: self.spatial_weight,
                distance_scale_m: self.distance_scale_m,
            },
            allow_degradation: self.allow_degraded,
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            max_bootstrap_failures: self.max_bootstrap_failures,
            spatial_capability,
            vector_capability,
            vocabulary: self.vocabulary,
            general_terms: self.general_terms,
            refine_threshold: self.refine_threshold,
            serve_limits: ServeLimits {
                max_line_bytes: self.max_request_bytes,
                max_in_flight: self.max_in_flight,
            },
        })
    }
}

impl ServiceConfig {
    /// Pairs needed to normalize every supported language to the canonical
    /// one and to translate suggestions back.
    pub fn required_pairs(&self) -> Vec<LanguagePair> {
        self.languages
            .iter()
            .filter(|tag| **tag != self.canonical_language)
            .flat_map(|tag| {
                let inbound = LanguagePair::new(tag.clone(), self.canonical_language.clone());
                let outbound = inbound.reversed();
                [inbound, outbound]
            })
            .collect()
    }

    /// Store capabilities to provision
    pub fn store_capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new(&self.spatial_capability, CapabilityKind::SpatialIndex),
            Capability::new(&self.vector_capability, CapabilityKind::VectorIndex),
        ]
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.dimension).languages(self.languages.clone())
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            canonical_language: self.canonical_language.clone(),
            default_query_language: self.query_language.clone(),
            supported_languages: self.languages.clone(),
            weights: self.weights.clone(),
            allow_degradation: self.allow_degradation,
            refine_threshold: self.refine_threshold,
            ..QueryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["geosearch"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--data-dir", "/srv/geo"]).into_config().unwrap();
        assert_eq!(config.store_path, PathBuf::from("/srv/geo/geosearch"));
        assert_eq!(config.models_dir, PathBuf::from("/srv/geo/translation"));
        assert_eq!(config.canonical_language.as_str(), "sv");
        assert_eq!(config.query_language.as_str(), "en");
        assert_eq!(config.embedder, EmbedderKind::Hashing);
        assert_eq!(config.dimension, 384);
        assert_eq!(config.weights, RankWeights::default());
        assert!(!config.allow_degradation);
        assert_eq!(config.probe_interval, Duration::from_millis(2000));
        assert_eq!(config.max_bootstrap_failures, 30);
        assert_eq!(config.refine_threshold, 10);
        assert_eq!(config.serve_limits.max_line_bytes, 1024 * 1024);
        assert_eq!(config.serve_limits.max_in_flight, 64);
        assert!(config.general_terms.is_none());
    }

    #[test]
    fn test_required_pairs() {
        let config = parse(&["--languages", "en,sv,de"]).into_config().unwrap();
        let pairs: Vec<String> = config.required_pairs().iter().map(|p| p.to_string()).collect();
        assert_eq!(pairs, vec!["en-sv", "sv-en", "de-sv", "sv-de"]);
    }

    #[test]
    fn test_capability_names() {
        let config = parse(&["--spatial-capability", "rtree"]).into_config().unwrap();
        let caps = config.store_capabilities();
        assert_eq!(caps[0].name, "rtree");
        assert_eq!(caps[0].kind, CapabilityKind::SpatialIndex);
        assert_eq!(caps[1].name, "hnsw");
    }

    #[test]
    fn test_rejects_shared_capability_name() {
        let err = parse(&["--spatial-capability", "index", "--vector-capability", " index "])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(err.to_string().contains("'index'"));

        assert!(parse(&["--vector-capability", "geo_grid"]).into_config().is_err());
    }

    #[test]
    fn test_serve_limits_and_refinement() {
        let config = parse(&[
            "--max-request-bytes",
            "4096",
            "--max-in-flight",
            "8",
            "--refine-threshold",
            "0",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.serve_limits.max_line_bytes, 4096);
        assert_eq!(config.serve_limits.max_in_flight, 8);
        assert_eq!(config.query_config().refine_threshold, 0);

        assert!(parse(&["--max-request-bytes", "0"]).into_config().is_err());
        assert!(parse(&["--max-in-flight", "0"]).into_config().is_err());
    }

    #[test]
    fn test_rejects_invalid_settings() {
        assert!(parse(&["--canonical-language", "fi"]).into_config().is_err());
        assert!(parse(&["--languages", "en,s1"]).into_config().is_err());
        assert!(parse(&["--dimension", "0"]).into_config().is_err());
        assert!(parse(&["--semantic-weight", "0", "--spatial-weight", "0"])
            .into_config()
            .is_err());
        assert!(parse(&["--distance-scale-m", "-5"]).into_config().is_err());
    }

    #[test]
    fn test_flags() {
        let config = parse(&["--allow-degraded-search", "--embedder", "fastembed"])
            .into_config()
            .unwrap();
        assert!(config.allow_degradation);
        assert_eq!(config.embedder, EmbedderKind::Fastembed);
    }
}
