//! Service wiring
//!
//! Builds the components from configuration, starts bootstrap in the
//! background and serves JSON-RPC on stdio until EOF or Ctrl-C.

use geosearch_store::embedding::find_embedding_cache;
use geosearch_store::{FastEmbedBackend, SystemClock, VectorEngine};
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;

use crate::bootstrap::{Bootstrap, BootstrapError, BootstrapPolicy};
use crate::config::{EmbedderKind, ServiceConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::provision::{ServiceProvisioner, TranslationProvision};
use crate::query::QueryService;
use crate::rpc::{serve, ServiceHandle};
use crate::suggest::Vocabulary;
use crate::translate::{ModelInstaller, TranslationAdapter};

/// Translations kept in the LRU cache
const TRANSLATION_CACHE_SIZE: usize = 1000;

/// Load the configured embedding backend
pub fn build_engine(config: &ServiceConfig) -> ServiceResult<VectorEngine> {
    let engine = match config.embedder {
        EmbedderKind::Hashing => VectorEngine::hashing(config.dimension)?,
        EmbedderKind::Fastembed => {
            let cache_dir = find_embedding_cache(config.embedding_cache.as_deref());
            let backend = FastEmbedBackend::load(&config.embedding_model, &cache_dir)?;
            VectorEngine::new(Arc::new(backend), config.dimension)?
        }
    };
    tracing::info!(
        "Embedding model: {} ({} dimensions)",
        engine.model_name(),
        engine.dimension()
    );
    Ok(engine)
}

fn unreadable(what: &str, path: &Path, e: std::io::Error) -> ServiceError {
    ServiceError::validation(format!("cannot read {} {}: {}", what, path.display(), e))
}

/// Autocomplete labels plus the general terms that need refinement
pub fn load_vocabulary(config: &ServiceConfig) -> ServiceResult<Vocabulary> {
    let vocabulary = match &config.vocabulary {
        Some(path) => Vocabulary::load(path).map_err(|e| unreadable("vocabulary", path, e))?,
        None => Vocabulary::default(),
    };
    match &config.general_terms {
        Some(path) => vocabulary
            .load_general_terms(path)
            .map_err(|e| unreadable("general terms", path, e)),
        None => Ok(vocabulary),
    }
}

/// Run the service until stdin closes or Ctrl-C. Returns an error when
/// bootstrap fails.
pub async fn run(config: ServiceConfig) -> ServiceResult<()> {
    let engine = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || build_engine(&config))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))??
    };
    let engine = Arc::new(engine);
    let vocabulary = Arc::new(load_vocabulary(&config)?);

    let adapter = Arc::new(TranslationAdapter::new(
        &config.models_dir,
        TRANSLATION_CACHE_SIZE,
    ));
    let provisioner = Arc::new(ServiceProvisioner::new(
        &config.store_path,
        config.store_config(),
        config.store_capabilities(),
        Some(TranslationProvision {
            installer: ModelInstaller::new(config.model_packages.clone(), &config.models_dir),
            adapter: adapter.clone(),
            pairs: config.required_pairs(),
        }),
    ));
    let bootstrap = Arc::new(Bootstrap::new(
        provisioner.clone(),
        provisioner.capability_names(),
        BootstrapPolicy::new(config.probe_interval, config.max_bootstrap_failures),
        Arc::new(SystemClock),
    ));
    let handle = Arc::new(ServiceHandle::new(bootstrap.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(
        "Store at {}, translation models in {}",
        config.store_path.display(),
        config.models_dir.display()
    );

    let mut boot_task = tokio::spawn({
        let handle = handle.clone();
        let query_config = config.query_config();
        async move {
            bootstrap.run(shutdown_rx).await?;
            let store = provisioner
                .store()
                .ok_or_else(|| BootstrapError::Failed("store was not opened".to_string()))?;
            let service = QueryService::new(store, engine, adapter, vocabulary, query_config);
            handle.set_ready(Arc::new(service));
            Ok::<(), BootstrapError>(())
        }
    });

    let server = serve(
        handle.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config.serve_limits,
    );
    tokio::pin!(server);

    let mut bootstrapping = true;
    let result = loop {
        tokio::select! {
            served = &mut server => {
                break served.map_err(|e| ServiceError::Internal(format!("stdio transport: {}", e)));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break Ok(());
            }
            booted = &mut boot_task, if bootstrapping => {
                bootstrapping = false;
                match booted {
                    Ok(Ok(())) => tracing::info!("Accepting queries"),
                    Ok(Err(BootstrapError::Cancelled)) => {}
                    Ok(Err(BootstrapError::Failed(reason))) => {
                        break Err(ServiceError::BootstrapFailed(reason));
                    }
                    Err(e) => break Err(ServiceError::Internal(format!("bootstrap task: {}", e))),
                }
            }
        }
    };

    let _ = shutdown_tx.send(true);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;
    use clap::Parser;
    use tempfile::{NamedTempFile, TempDir};

    fn config(extra: &[&str]) -> ServiceConfig {
        let mut argv = vec!["geosearch"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap().into_config().unwrap()
    }

    #[test]
    fn test_hashing_engine_uses_configured_dimension() {
        let engine = build_engine(&config(&["--dimension", "48"])).unwrap();
        assert_eq!(engine.dimension(), 48);
        assert_eq!(engine.embed("hej").unwrap().len(), 48);
    }

    #[test]
    fn test_vocabulary_loading() {
        assert!(load_vocabulary(&config(&[])).unwrap().is_empty());

        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, "Lärare\nLäkare\n\nLärare\n".as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(load_vocabulary(&config(&["--vocabulary", &path])).unwrap().len(), 2);

        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.txt");
        let err = load_vocabulary(&config(&["--vocabulary", missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn test_general_terms_loading() {
        let mut labels = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut labels, "Lärare
Läkare
".as_bytes()).unwrap();
        let mut general = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut general, "lärare
".as_bytes()).unwrap();

        let vocabulary = load_vocabulary(&config(&[
            "--vocabulary",
            labels.path().to_str().unwrap(),
            "--general-terms",
            general.path().to_str().unwrap(),
        ]))
        .unwrap();
        assert!(vocabulary.is_too_general("Lärare", 10));
        assert!(!vocabulary.is_too_general("Läkare", 10));

        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("general.txt");
        let err = load_vocabulary(&config(&["--general-terms", missing.to_str().unwrap()]))
            .unwrap_err();
        assert!(err.to_string().contains("general terms"));
    }
}
