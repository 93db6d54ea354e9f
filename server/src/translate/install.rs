//! Installation of translation model packages
//!
//! Packages are copied from a source directory (e.g. a mounted volume or a
//! release bundle) into the models directory. A `.installing` marker is
//! written first and removed last, so an interrupted install is detected
//! and redone on the next start.

use std::fs;
use std::path::{Path, PathBuf};

use super::phrase_table::{METADATA_FILE, OVERRIDES_FILE, PHRASES_FILE};
use super::{LanguagePair, PhraseModel, TranslationError};

pub(crate) const INSTALLING_MARKER: &str = ".installing";

const PACKAGE_FILES: &[&str] = &[METADATA_FILE, PHRASES_FILE];
const OPTIONAL_FILES: &[&str] = &[OVERRIDES_FILE];

pub(crate) fn is_package_dir(path: &Path) -> bool {
    path.is_dir() && path.join(METADATA_FILE).exists()
}

/// Copies missing language-pair packages into the models directory
#[derive(Debug, Clone)]
pub struct ModelInstaller {
    source: Option<PathBuf>,
    target: PathBuf,
}

impl ModelInstaller {
    pub fn new(source: Option<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source,
            target: target.into(),
        }
    }

    /// A pair is installed when its package is complete
    pub fn is_installed(&self, pair: &LanguagePair) -> bool {
        let dir = self.target.join(pair.dir_name());
        PACKAGE_FILES.iter().all(|f| dir.join(f).exists()) && !dir.join(INSTALLING_MARKER).exists()
    }

    pub fn all_installed(&self, pairs: &[LanguagePair]) -> bool {
        pairs.iter().all(|p| self.is_installed(p))
    }

    /// Install every pair that is not installed yet. Returns the pairs that
    /// were newly installed.
    pub fn install_missing(
        &self,
        pairs: &[LanguagePair],
    ) -> Result<Vec<LanguagePair>, TranslationError> {
        let mut installed = Vec::new();
        for pair in pairs {
            if self.is_installed(pair) {
                tracing::debug!("Translation model {} already installed", pair);
                continue;
            }
            self.install(pair)?;
            installed.push(pair.clone());
        }
        Ok(installed)
    }

    fn install(&self, pair: &LanguagePair) -> Result<(), TranslationError> {
        let source_dir = self
            .source
            .as_ref()
            .map(|s| s.join(pair.dir_name()))
            .filter(|dir| is_package_dir(dir))
            .ok_or_else(|| TranslationError::MissingPackage(pair.clone()))?;
        let target_dir = self.target.join(pair.dir_name());
        let marker = target_dir.join(INSTALLING_MARKER);

        // Clean up partial installs from a previous interrupted attempt
        if target_dir.exists() {
            tracing::warn!("Found incomplete model {}, cleaning up...", pair);
            fs::remove_dir_all(&target_dir)?;
        }

        fs::create_dir_all(&target_dir)?;
        fs::write(&marker, "")?;

        tracing::info!(
            "Installing translation model {} from {}",
            pair,
            source_dir.display()
        );

        for filename in PACKAGE_FILES {
            fs::copy(source_dir.join(filename), target_dir.join(filename))?;
        }
        for filename in OPTIONAL_FILES {
            let source = source_dir.join(filename);
            if source.exists() {
                fs::copy(source, target_dir.join(filename))?;
            }
        }

        // The copy must load and match the directory it was installed under
        let model = PhraseModel::load(&target_dir)?;
        if model.pair() != pair {
            return Err(TranslationError::package(
                &target_dir,
                format!("metadata declares {}, expected {}", model.pair(), pair),
            ));
        }

        // Remove marker on success
        fs::remove_file(&marker)?;
        tracing::info!("Installed translation model {}", pair);
        Ok(())
    }
}
