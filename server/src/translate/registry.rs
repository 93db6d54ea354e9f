//! Loaded translation models
//!
//! The adapter starts empty and is filled once by bootstrap. Until then
//! every non-identity translation fails with `ModelNotInstalled`.

use geosearch_store::LanguageTag;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::install::{is_package_dir, INSTALLING_MARKER};
use super::{LanguagePair, PhraseModel, TranslationError, Translator};
use crate::cache::{CacheStats, TranslationCache};

type ModelSet = Arc<HashMap<LanguagePair, Arc<PhraseModel>>>;

/// Translation adapter over installed phrase models
pub struct TranslationAdapter {
    models_dir: PathBuf,
    models: RwLock<Option<ModelSet>>,
    cache: TranslationCache,
}

impl TranslationAdapter {
    pub fn new(models_dir: impl Into<PathBuf>, cache_capacity: usize) -> Self {
        Self {
            models_dir: models_dir.into(),
            models: RwLock::new(None),
            cache: TranslationCache::new(cache_capacity),
        }
    }

    /// Adapter with models already loaded
    pub fn with_models(models: Vec<PhraseModel>, cache_capacity: usize) -> Self {
        let adapter = Self::new(PathBuf::new(), cache_capacity);
        adapter.install_set(models);
        adapter
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn install_set(&self, models: Vec<PhraseModel>) -> usize {
        let set: HashMap<LanguagePair, Arc<PhraseModel>> = models
            .into_iter()
            .map(|m| (m.pair().clone(), Arc::new(m)))
            .collect();
        let count = set.len();
        if let Ok(mut guard) = self.models.write() {
            *guard = Some(Arc::new(set));
        }
        self.cache.clear();
        count
    }

    /// Load every complete package under the models directory. Fails if any
    /// of `required` is missing.
    pub fn load_installed(&self, required: &[LanguagePair]) -> Result<usize, TranslationError> {
        let mut models = Vec::new();
        if self.models_dir.is_dir() {
            for entry in std::fs::read_dir(&self.models_dir)? {
                let path = entry?.path();
                if !is_package_dir(&path) {
                    continue;
                }
                if path.join(INSTALLING_MARKER).exists() {
                    tracing::warn!("Skipping partially installed model: {}", path.display());
                    continue;
                }
                models.push(PhraseModel::load(&path)?);
            }
        }

        for pair in required {
            if !models.iter().any(|m| m.pair() == pair) {
                return Err(TranslationError::MissingPackage(pair.clone()));
            }
        }

        let count = self.install_set(models);
        tracing::info!(
            "Loaded {} translation model(s) from {}",
            count,
            self.models_dir.display()
        );
        Ok(count)
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Pairs that can currently be translated, sorted
    pub fn pairs(&self) -> Vec<LanguagePair> {
        let mut pairs: Vec<LanguagePair> = self
            .snapshot()
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default();
        pairs.sort_by_key(|p| p.to_string());
        pairs
    }

    pub fn supports(&self, pair: &LanguagePair) -> bool {
        pair.is_identity()
            || self
                .snapshot()
                .map(|set| set.contains_key(pair))
                .unwrap_or(false)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn snapshot(&self) -> Option<ModelSet> {
        self.models.read().ok()?.clone()
    }
}

impl Translator for TranslationAdapter {
    fn translate(
        &self,
        text: &str,
        from: &LanguageTag,
        to: &LanguageTag,
    ) -> Result<String, TranslationError> {
        let pair = LanguagePair::new(from.clone(), to.clone());
        if pair.is_identity() {
            return Ok(text.to_string());
        }

        let set = self.snapshot().ok_or(TranslationError::ModelNotInstalled)?;
        let model = set
            .get(&pair)
            .ok_or_else(|| TranslationError::UnsupportedLanguagePair(pair.clone()))?;

        if let Some(cached) = self.cache.get(&pair, text) {
            return Ok(cached);
        }
        let translated = model.translate(text);
        self.cache.put(&pair, text, translated.clone());
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::phrase_table::{METADATA_FILE, PHRASES_FILE};
    use tempfile::TempDir;

    fn tag(s: &str) -> LanguageTag {
        LanguageTag::parse(s).unwrap()
    }

    fn write_package(root: &Path, from: &str, to: &str, phrases: &str) {
        let dir = root.join(format!("{}_{}", from, to));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(METADATA_FILE),
            format!(r#"{{"from":"{}","to":"{}","version":"1"}}"#, from, to),
        )
        .unwrap();
        std::fs::write(dir.join(PHRASES_FILE), phrases).unwrap();
    }

    #[test]
    fn test_not_installed_until_loaded() {
        let adapter = TranslationAdapter::new("/nonexistent", 16);
        let err = adapter.translate("hello", &tag("en"), &tag("sv")).unwrap_err();
        assert!(matches!(err, TranslationError::ModelNotInstalled));

        // Identity pairs never need a model
        assert_eq!(adapter.translate("hej", &tag("sv"), &tag("sv")).unwrap(), "hej");
    }

    #[test]
    fn test_load_installed_and_translate() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), "en", "sv", "hello\thej\n");
        write_package(dir.path(), "sv", "en", "hej\thello\n");

        let adapter = TranslationAdapter::new(dir.path(), 16);
        let required = vec![LanguagePair::parse("en-sv").unwrap()];
        assert_eq!(adapter.load_installed(&required).unwrap(), 2);
        assert!(adapter.is_loaded());
        assert_eq!(adapter.pairs().len(), 2);

        assert_eq!(adapter.translate("hello", &tag("en"), &tag("sv")).unwrap(), "hej");
        assert_eq!(adapter.translate("hello", &tag("en"), &tag("sv")).unwrap(), "hej");
        assert_eq!(adapter.cache_stats().hits, 1);

        let err = adapter.translate("hallo", &tag("de"), &tag("sv")).unwrap_err();
        assert!(matches!(err, TranslationError::UnsupportedLanguagePair(_)));
    }

    #[test]
    fn test_missing_required_pair_fails() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), "en", "sv", "hello\thej\n");

        let adapter = TranslationAdapter::new(dir.path(), 16);
        let required = vec![LanguagePair::parse("sv-en").unwrap()];
        let err = adapter.load_installed(&required).unwrap_err();
        assert!(matches!(err, TranslationError::MissingPackage(_)));
        assert!(!adapter.is_loaded());
    }

    #[test]
    fn test_partial_install_is_ignored() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), "en", "sv", "hello\thej\n");
        std::fs::write(dir.path().join("en_sv").join(INSTALLING_MARKER), "").unwrap();

        let adapter = TranslationAdapter::new(dir.path(), 16);
        assert_eq!(adapter.load_installed(&[]).unwrap(), 0);
        assert!(adapter.is_loaded());
        assert!(!adapter.supports(&LanguagePair::parse("en-sv").unwrap()));
    }
}
