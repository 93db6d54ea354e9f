//! Phrase-table translation models
//!
//! A package directory holds `metadata.json`, `phrases.tsv` and optionally
//! `overrides.tsv`. Phrases are matched greedily, longest first, over
//! whitespace tokens; overrides replace the whole text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{LanguagePair, TranslationError};

pub const METADATA_FILE: &str = "metadata.json";
pub const PHRASES_FILE: &str = "phrases.tsv";
pub const OVERRIDES_FILE: &str = "overrides.tsv";

/// Contents of `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub version: String,
}

/// A loaded translation model for one language pair
#[derive(Debug, Clone)]
pub struct PhraseModel {
    pair: LanguagePair,
    version: String,
    phrases: HashMap<String, String>,
    overrides: HashMap<String, String>,
    max_phrase_len: usize,
}

/// Lowercase and collapse whitespace
fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a token into leading punctuation, word core and trailing punctuation
fn split_token(token: &str) -> (&str, &str, &str) {
    let start = token
        .char_indices()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let end = token
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(start);
    (&token[..start], &token[start..end], &token[end..])
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_tsv(content: &str, path: &Path) -> Result<Vec<(String, String)>, TranslationError> {
    let mut entries = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let (source, target) = line.split_once('\t').ok_or_else(|| {
            TranslationError::package(path, format!("line {}: expected a tab", line_no + 1))
        })?;
        if source.trim().is_empty() {
            return Err(TranslationError::package(
                path,
                format!("line {}: empty source phrase", line_no + 1),
            ));
        }
        entries.push((source.trim().to_string(), target.trim().to_string()));
    }
    Ok(entries)
}

/// Collapse consecutive duplicate words, comparing case-insensitively
pub fn clean_translation(text: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        match words.last() {
            Some(last) if last.to_lowercase() == word.to_lowercase() => {}
            _ => words.push(word),
        }
    }
    words.join(" ")
}

impl PhraseModel {
    /// Build a model from in-memory tables
    pub fn from_entries<S: AsRef<str>>(
        pair: LanguagePair,
        phrases: impl IntoIterator<Item = (S, S)>,
        overrides: impl IntoIterator<Item = (S, S)>,
    ) -> Self {
        let phrases: HashMap<String, String> = phrases
            .into_iter()
            .map(|(s, t)| (normalize_key(s.as_ref()), t.as_ref().trim().to_string()))
            .filter(|(s, _)| !s.is_empty())
            .collect();
        let overrides = overrides
            .into_iter()
            .map(|(s, t)| (normalize_key(s.as_ref()), t.as_ref().trim().to_string()))
            .filter(|(s, _)| !s.is_empty())
            .collect();
        let max_phrase_len = phrases
            .keys()
            .map(|k| k.split(' ').count())
            .max()
            .unwrap_or(1);

        Self {
            pair,
            version: String::new(),
            phrases,
            overrides,
            max_phrase_len,
        }
    }

    /// Load a package directory
    pub fn load(dir: &Path) -> Result<Self, TranslationError> {
        let metadata_path = dir.join(METADATA_FILE);
        let metadata: PackageMetadata = serde_json::from_str(&std::fs::read_to_string(&metadata_path)?)
            .map_err(|e| TranslationError::package(&metadata_path, e.to_string()))?;
        let pair = LanguagePair::parse(&format!("{}-{}", metadata.from, metadata.to))
            .map_err(|e| TranslationError::package(&metadata_path, e.to_string()))?;

        let phrases_path = dir.join(PHRASES_FILE);
        let phrases = parse_tsv(&std::fs::read_to_string(&phrases_path)?, &phrases_path)?;

        let overrides_path = dir.join(OVERRIDES_FILE);
        let overrides = if overrides_path.exists() {
            parse_tsv(&std::fs::read_to_string(&overrides_path)?, &overrides_path)?
        } else {
            Vec::new()
        };

        let mut model = Self::from_entries(pair, phrases, overrides);
        model.version = metadata.version;

        tracing::debug!(
            "Loaded translation model {} v{} ({} phrases, {} overrides)",
            model.pair,
            model.version,
            model.phrases.len(),
            model.overrides.len()
        );
        Ok(model)
    }

    pub fn pair(&self) -> &LanguagePair {
        &self.pair
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Translate text. Unknown words pass through unchanged.
    pub fn translate(&self, text: &str) -> String {
        let key = normalize_key(text);
        if key.is_empty() {
            return String::new();
        }
        if let Some(manual) = self.overrides.get(&key) {
            return manual.clone();
        }

        let tokens: Vec<(&str, &str, &str)> = text.split_whitespace().map(split_token).collect();
        let keys: Vec<String> = tokens.iter().map(|(_, core, _)| core.to_lowercase()).collect();

        let mut output: Vec<String> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let longest = self.max_phrase_len.min(tokens.len() - i);
            let matched = (1..=longest).rev().find_map(|len| {
                let span = &keys[i..i + len];
                if span.iter().any(String::is_empty) {
                    return None;
                }
                self.phrases.get(&span.join(" ")).map(|target| (len, target))
            });

            match matched {
                Some((len, target)) => {
                    let (prefix, first_core, _) = tokens[i];
                    let (_, _, suffix) = tokens[i + len - 1];
                    let starts_upper = first_core.chars().next().is_some_and(char::is_uppercase);
                    let target = if starts_upper {
                        capitalize(target)
                    } else {
                        target.clone()
                    };
                    output.push(format!("{}{}{}", prefix, target, suffix));
                    i += len;
                }
                None => {
                    let (prefix, core, suffix) = tokens[i];
                    output.push(format!("{}{}{}", prefix, core, suffix));
                    i += 1;
                }
            }
        }

        clean_translation(&output.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn en_sv() -> PhraseModel {
        PhraseModel::from_entries(
            LanguagePair::parse("en-sv").unwrap(),
            vec![
                ("hello", "hej"),
                ("teacher", "lärare"),
                ("nurse", "sjuksköterska"),
                ("in", "i"),
                ("good morning", "god morgon"),
                ("good", "bra"),
                ("software developer", "mjukvaruutvecklare"),
                ("developer", "utvecklare"),
            ],
            vec![("plumber", "rörmokare")],
        )
    }

    #[test]
    fn test_single_words_and_passthrough() {
        let model = en_sv();
        assert_eq!(model.translate("hello"), "hej");
        assert_eq!(model.translate("nurse in Stockholm"), "sjuksköterska i Stockholm");
        assert_eq!(model.translate("   "), "");
    }

    #[test]
    fn test_longest_phrase_wins() {
        let model = en_sv();
        assert_eq!(model.translate("good morning"), "god morgon");
        assert_eq!(model.translate("good teacher"), "bra lärare");
        assert_eq!(model.translate("senior software developer"), "senior mjukvaruutvecklare");
    }

    #[test]
    fn test_case_and_punctuation_preserved() {
        let model = en_sv();
        assert_eq!(model.translate("Hello!"), "Hej!");
        assert_eq!(model.translate("(Teacher),"), "(Lärare),");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let model = en_sv();
        assert_eq!(model.translate("  PLUMBER "), "rörmokare");
    }

    #[test]
    fn test_duplicate_words_collapsed() {
        assert_eq!(clean_translation("lärare lärare i  skolan"), "lärare i skolan");
        assert_eq!(clean_translation("Hej hej"), "Hej");
        assert_eq!(clean_translation("a b a"), "a b a");

        let model = en_sv();
        assert_eq!(model.translate("developer developer"), "utvecklare");
    }

    #[test]
    fn test_load_package() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"from":"en","to":"sv","version":"1.2"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(PHRASES_FILE),
            "# english to swedish\nhello\thej\n\nteacher\tlärare\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(OVERRIDES_FILE), "doctor\tläkare\n").unwrap();

        let model = PhraseModel::load(dir.path()).unwrap();
        assert_eq!(model.pair().to_string(), "en-sv");
        assert_eq!(model.version(), "1.2");
        assert_eq!(model.phrase_count(), 2);
        assert_eq!(model.translate("doctor"), "läkare");
        assert_eq!(model.translate("hello teacher"), "hej lärare");
    }

    #[test]
    fn test_load_rejects_malformed_phrases() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), r#"{"from":"en","to":"sv"}"#).unwrap();
        std::fs::write(dir.path().join(PHRASES_FILE), "hello hej\n").unwrap();

        let err = PhraseModel::load(dir.path()).unwrap_err();
        assert!(matches!(err, TranslationError::Package { .. }));
    }
}
