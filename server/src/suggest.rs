//! Autocomplete vocabulary
//!
//! A fixed list of canonical-language labels loaded at startup, one per
//! line. Matching is a case-insensitive substring test; labels starting
//! with the query rank ahead of the rest.
//!
//! The vocabulary also decides when a query is too general to search as
//! given: it names one of the configured general terms, or it matches too
//! many labels.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

#[derive(Debug, Default)]
pub struct Vocabulary {
    labels: Vec<String>,
    lowered: Vec<String>,
    /// Lowercased terms that always need refinement
    general: HashSet<String>,
}

fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}

impl Vocabulary {
    /// Sorted, de-duplicated vocabulary
    pub fn new<S: AsRef<str>>(labels: impl IntoIterator<Item = S>) -> Self {
        let labels: BTreeSet<String> = labels
            .into_iter()
            .map(|l| l.as_ref().trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let labels: Vec<String> = labels.into_iter().collect();
        let lowered = labels.iter().map(|l| l.to_lowercase()).collect();
        Self {
            labels,
            lowered,
            general: HashSet::new(),
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let vocabulary = Self::new(read_lines(path)?);
        tracing::info!(
            "Loaded {} vocabulary labels from {}",
            vocabulary.len(),
            path.display()
        );
        Ok(vocabulary)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Add terms, in the canonical language, that are too broad to search
    /// without refinement
    pub fn with_general_terms<S: AsRef<str>>(mut self, terms: impl IntoIterator<Item = S>) -> Self {
        self.general.extend(
            terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
        self
    }

    pub fn load_general_terms(self, path: &Path) -> std::io::Result<Self> {
        let vocabulary = self.with_general_terms(read_lines(path)?);
        tracing::info!(
            "Loaded {} general terms from {}",
            vocabulary.general.len(),
            path.display()
        );
        Ok(vocabulary)
    }

    /// Number of labels containing `query`
    pub fn count_matching(&self, query: &str) -> usize {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return 0;
        }
        self.lowered.iter().filter(|l| l.contains(&query)).count()
    }

    /// Whether `query` is a general term or matches at least `max_matches`
    /// labels. A `max_matches` of zero disables the count rule.
    pub fn is_too_general(&self, query: &str, max_matches: usize) -> bool {
        let lowered = query.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        self.general.contains(&lowered)
            || (max_matches > 0 && self.count_matching(&lowered) >= max_matches)
    }

    /// Labels containing `query`, prefix matches first, at most `limit`
    pub fn matching(&self, query: &str, limit: usize) -> Vec<&str> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut prefix = Vec::new();
        let mut infix = Vec::new();
        for (label, lowered) in self.labels.iter().zip(&self.lowered) {
            if lowered.starts_with(&query) {
                prefix.push(label.as_str());
            } else if lowered.contains(&query) {
                infix.push(label.as_str());
            }
        }

        prefix.into_iter().chain(infix).take(limit).collect()
    }
}
