//! Concrete provisioner over the embedded store and translation models

use geosearch_store::{Capability, GeoStore, StoreConfig};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::bootstrap::{ProvisionError, Provisioner};
use crate::translate::{LanguagePair, ModelInstaller, TranslationAdapter};

/// Capability name of the installed translation model packages
pub const TRANSLATION_CAPABILITY: &str = "translation_models";

/// Translation models needed by the service
pub struct TranslationProvision {
    pub installer: ModelInstaller,
    pub adapter: Arc<TranslationAdapter>,
    pub pairs: Vec<LanguagePair>,
}

/// Opens the store on the first successful probe and installs store
/// capabilities and translation models on request.
pub struct ServiceProvisioner {
    store_path: PathBuf,
    store_config: StoreConfig,
    store: OnceLock<Arc<GeoStore>>,
    capabilities: Vec<Capability>,
    translation: Option<TranslationProvision>,
}

impl ServiceProvisioner {
    pub fn new(
        store_path: impl Into<PathBuf>,
        store_config: StoreConfig,
        capabilities: Vec<Capability>,
        translation: Option<TranslationProvision>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            store_config,
            store: OnceLock::new(),
            capabilities,
            translation,
        }
    }

    /// Every capability bootstrap has to install, store ones first
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.iter().map(|c| c.name.clone()).collect();
        if self.translation.is_some() {
            names.push(TRANSLATION_CAPABILITY.to_string());
        }
        names
    }

    /// The store, once a probe has opened it
    pub fn store(&self) -> Option<Arc<GeoStore>> {
        self.store.get().cloned()
    }

    fn opened_store(&self) -> Result<&Arc<GeoStore>, ProvisionError> {
        self.store
            .get()
            .ok_or_else(|| ProvisionError::Unreachable("store has not been opened".into()))
    }

    fn store_capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }
}

impl Provisioner for ServiceProvisioner {
    fn probe(&self) -> Result<(), ProvisionError> {
        if let Some(store) = self.store.get() {
            return store
                .probe()
                .map_err(|e| ProvisionError::Unreachable(e.to_string()));
        }

        let store = GeoStore::open(&self.store_path, self.store_config.clone())
            .map_err(|e| ProvisionError::Unreachable(e.to_string()))?;
        tracing::info!(
            "Opened store at {} ({} records)",
            self.store_path.display(),
            store.len()
        );
        // Probes run one at a time, so the cell is still empty here
        let _ = self.store.set(Arc::new(store));
        Ok(())
    }

    fn is_installed(&self, capability: &str) -> Result<bool, ProvisionError> {
        if capability == TRANSLATION_CAPABILITY {
            return match &self.translation {
                Some(t) => Ok(t.installer.all_installed(&t.pairs) && t.adapter.is_loaded()),
                None => Err(ProvisionError::UnknownCapability(capability.to_string())),
            };
        }
        if self.store_capability(capability).is_none() {
            return Err(ProvisionError::UnknownCapability(capability.to_string()));
        }
        Ok(self.opened_store()?.is_capability_installed(capability))
    }

    fn install(&self, capability: &str) -> Result<(), ProvisionError> {
        let install_error = |reason: String| ProvisionError::Install {
            name: capability.to_string(),
            reason,
        };

        if capability == TRANSLATION_CAPABILITY {
            let t = self
                .translation
                .as_ref()
                .ok_or_else(|| ProvisionError::UnknownCapability(capability.to_string()))?;
            let installed = t
                .installer
                .install_missing(&t.pairs)
                .map_err(|e| install_error(e.to_string()))?;
            let loaded = t
                .adapter
                .load_installed(&t.pairs)
                .map_err(|e| install_error(e.to_string()))?;
            tracing::info!(
                "Translation models ready ({} loaded, {} newly installed)",
                loaded,
                installed.len()
            );
            return Ok(());
        }

        let spec = self
            .store_capability(capability)
            .ok_or_else(|| ProvisionError::UnknownCapability(capability.to_string()))?;
        self.opened_store()?
            .install_capability(spec)
            .map_err(|e| install_error(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{Bootstrap, BootstrapPolicy};
    use crate::translate::Translator;
    use geosearch_store::{LanguageTag, SystemClock};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    fn write_package(root: &Path, from: &str, to: &str, phrases: &str) {
        let dir = root.join(format!("{}_{}", from, to));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("metadata.json"),
            format!(r#"{{"from":"{}","to":"{}","version":"1"}}"#, from, to),
        )
        .unwrap();
        std::fs::write(dir.join("phrases.tsv"), phrases).unwrap();
    }

    fn provisioner(root: &Path) -> (ServiceProvisioner, Arc<TranslationAdapter>) {
        let packages = root.join("packages");
        write_package(&packages, "en", "sv", "hello\thej\n");
        write_package(&packages, "sv", "en", "hej\thello\n");

        let models = root.join("translation");
        let adapter = Arc::new(TranslationAdapter::new(&models, 16));
        let translation = TranslationProvision {
            installer: ModelInstaller::new(Some(packages), &models),
            adapter: adapter.clone(),
            pairs: vec![
                LanguagePair::parse("en-sv").unwrap(),
                LanguagePair::parse("sv-en").unwrap(),
            ],
        };
        let provisioner = ServiceProvisioner::new(
            root.join("db"),
            StoreConfig::new(8),
            vec![Capability::geo_grid(), Capability::hnsw()],
            Some(translation),
        );
        (provisioner, adapter)
    }

    #[test]
    fn test_capability_names() {
        let temp_dir = TempDir::new().unwrap();
        let (provisioner, _) = provisioner(temp_dir.path());
        assert_eq!(
            provisioner.capability_names(),
            vec!["geo_grid", "hnsw", TRANSLATION_CAPABILITY]
        );
    }

    #[test]
    fn test_probe_opens_store_once() {
        let temp_dir = TempDir::new().unwrap();
        let (provisioner, _) = provisioner(temp_dir.path());
        assert!(provisioner.store().is_none());
        assert!(matches!(
            provisioner.is_installed("hnsw"),
            Err(ProvisionError::Unreachable(_))
        ));

        provisioner.probe().unwrap();
        let store = provisioner.store().unwrap();
        provisioner.probe().unwrap();
        assert!(Arc::ptr_eq(&store, &provisioner.store().unwrap()));
    }

    #[test]
    fn test_probe_fails_on_unusable_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let provisioner = ServiceProvisioner::new(file, StoreConfig::new(8), Vec::new(), None);
        assert!(matches!(
            provisioner.probe(),
            Err(ProvisionError::Unreachable(_))
        ));
    }

    #[test]
    fn test_install_store_and_translation_capabilities() {
        let temp_dir = TempDir::new().unwrap();
        let (provisioner, adapter) = provisioner(temp_dir.path());
        provisioner.probe().unwrap();

        for name in provisioner.capability_names() {
            assert!(!provisioner.is_installed(&name).unwrap());
            provisioner.install(&name).unwrap();
            assert!(provisioner.is_installed(&name).unwrap());
            // Re-install is a no-op
            provisioner.install(&name).unwrap();
        }

        let en = LanguageTag::parse("en").unwrap();
        let sv = LanguageTag::parse("sv").unwrap();
        assert_eq!(adapter.translate("hello", &en, &sv).unwrap(), "hej");
        assert!(matches!(
            provisioner.install("fulltext"),
            Err(ProvisionError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_missing_package_fails_install() {
        let temp_dir = TempDir::new().unwrap();
        let models = temp_dir.path().join("translation");
        let translation = TranslationProvision {
            installer: ModelInstaller::new(None, &models),
            adapter: Arc::new(TranslationAdapter::new(&models, 16)),
            pairs: vec![LanguagePair::parse("en-sv").unwrap()],
        };
        let provisioner = ServiceProvisioner::new(
            temp_dir.path().join("db"),
            StoreConfig::new(8),
            Vec::new(),
            Some(translation),
        );
        assert!(matches!(
            provisioner.install(TRANSLATION_CAPABILITY),
            Err(ProvisionError::Install { .. })
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_twice_is_ready_both_times() {
        let temp_dir = TempDir::new().unwrap();
        let (provisioner, _) = provisioner(temp_dir.path());
        let provisioner = Arc::new(provisioner);
        let boot = Bootstrap::new(
            provisioner.clone(),
            provisioner.capability_names(),
            BootstrapPolicy::new(Duration::from_millis(5), 3),
            Arc::new(SystemClock),
        );
        let (_shutdown, rx) = watch::channel(false);

        boot.run(rx.clone()).await.unwrap();
        assert!(boot.is_ready());
        boot.run(rx.clone()).await.unwrap();
        assert!(boot.is_ready());

        let store = provisioner.store().unwrap();
        assert_eq!(store.capabilities().len(), 2);
    }
}
