//! Model path discovery utilities
//!
//! Finds the local cache directory for ONNX embedding models.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable pointing at the embedding model cache
pub const MODELS_PATH_ENV: &str = "GEOSEARCH_MODELS_PATH";

/// Find the embedding model cache with priority:
/// 1. Explicit path (command line)
/// 2. GEOSEARCH_MODELS_PATH environment variable
/// 3. User home directory (~/.geosearch/models/embeddings)
/// 4. `.fastembed_cache` in the working directory
pub fn find_embedding_cache(explicit: Option<&Path>) -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    resolve_cache_dir(explicit, std::env::var_os(MODELS_PATH_ENV), home)
}

fn resolve_cache_dir(
    explicit: Option<&Path>,
    env_path: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(path) = explicit {
        log::info!("Using embedding cache: {}", path.display());
        return path.to_path_buf();
    }

    if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        log::info!("Using {}: {}", MODELS_PATH_ENV, path.display());
        return path;
    }

    if let Some(home) = home {
        return PathBuf::from(home)
            .join(".geosearch")
            .join("models")
            .join("embeddings");
    }

    log::warn!("No home directory found, caching models in .fastembed_cache");
    PathBuf::from(".fastembed_cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_cache_dir(
            Some(Path::new("/opt/models")),
            Some("/env/models".into()),
            Some("/home/u".into()),
        );
        assert_eq!(path, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_env_then_home() {
        let path = resolve_cache_dir(None, Some("/env/models".into()), Some("/home/u".into()));
        assert_eq!(path, PathBuf::from("/env/models"));

        let path = resolve_cache_dir(None, Some("".into()), Some("/home/u".into()));
        assert_eq!(path, PathBuf::from("/home/u/.geosearch/models/embeddings"));

        let path = resolve_cache_dir(None, None, None);
        assert_eq!(path, PathBuf::from(".fastembed_cache"));
    }
}
