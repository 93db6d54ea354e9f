//! Offline translation
//!
//! Text is translated with phrase-table models, one package per ordered
//! language pair. Models are loaded once at bootstrap and are immutable
//! afterwards; translation itself is pure.

mod install;
mod phrase_table;
mod registry;

pub use install::ModelInstaller;
pub use phrase_table::{clean_translation, PackageMetadata, PhraseModel};
pub use registry::TranslationAdapter;

use geosearch_store::LanguageTag;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from translation and model management
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Unsupported language pair: {0}")]
    UnsupportedLanguagePair(LanguagePair),

    #[error("Translation models are not installed")]
    ModelNotInstalled,

    #[error("No model package available for {0}")]
    MissingPackage(LanguagePair),

    #[error("Invalid model package {path}: {reason}")]
    Package { path: PathBuf, reason: String },

    #[error("Invalid language pair: {0}")]
    InvalidPair(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranslationError {
    pub(crate) fn package(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Package {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Ordered (from, to) language pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair {
    pub from: LanguageTag,
    pub to: LanguageTag,
}

impl LanguagePair {
    pub fn new(from: LanguageTag, to: LanguageTag) -> Self {
        Self { from, to }
    }

    /// Parse `en-sv` or `en_sv`
    pub fn parse(s: &str) -> Result<Self, TranslationError> {
        let (from, to) = s
            .trim()
            .split_once(|c: char| c == '-' || c == '_')
            .ok_or_else(|| TranslationError::InvalidPair(s.to_string()))?;
        let from = LanguageTag::parse(from).map_err(|_| TranslationError::InvalidPair(s.to_string()))?;
        let to = LanguageTag::parse(to).map_err(|_| TranslationError::InvalidPair(s.to_string()))?;
        Ok(Self { from, to })
    }

    /// Package directory name, e.g. `en_sv`
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.from, self.to)
    }

    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl std::str::FromStr for LanguagePair {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Anything that can translate text between two languages
pub trait Translator: Send + Sync {
    fn translate(
        &self,
        text: &str,
        from: &LanguageTag,
        to: &LanguageTag,
    ) -> Result<String, TranslationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_parse_and_display() {
        let pair = LanguagePair::parse("en-sv").unwrap();
        assert_eq!(pair.to_string(), "en-sv");
        assert_eq!(pair.dir_name(), "en_sv");
        assert_eq!(LanguagePair::parse("EN_SV").unwrap(), pair);
        assert_eq!(pair.reversed().to_string(), "sv-en");
        assert!(!pair.is_identity());

        assert!(LanguagePair::parse("ensv").is_err());
        assert!(LanguagePair::parse("en-").is_err());
    }
}
