//! Record types and builders
//!
//! A record is a piece of text pinned (optionally) to a place, together with
//! the embedding of its canonical-language form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::GeoPoint;

/// Longest accepted identifier
pub const MAX_ID_LEN: usize = 128;

/// Unique, immutable record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Validate a caller-supplied identifier
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StoreError::validation("record id must not be empty"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(StoreError::validation(format!(
                "record id longer than {} bytes",
                MAX_ID_LEN
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(StoreError::validation(
                "record id must not contain control characters",
            ));
        }
        Ok(Self(id))
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lowercase ISO-639 style language code (2 or 3 ASCII letters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    pub fn parse(tag: &str) -> Result<Self, StoreError> {
        let tag = tag.trim();
        if !(2..=3).contains(&tag.len()) || !tag.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StoreError::validation(format!(
                "invalid language tag '{}'",
                tag
            )));
        }
        Ok(Self(tag.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for LanguageTag {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A stored, geotagged, embedded piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier
    pub id: RecordId,
    /// Where the record is pinned, if anywhere
    #[serde(default)]
    pub position: Option<GeoPoint>,
    /// Original text in its source language
    pub text: String,
    /// Canonical-language text that was embedded
    #[serde(default)]
    pub normalized_text: Option<String>,
    /// Embedding of the normalized text
    pub embedding: Vec<f32>,
    /// Source language of `text`
    pub language: LanguageTag,
    /// When the record was first stored
    pub created_at: DateTime<Utc>,
    /// When the record was last re-embedded
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a new builder for Record
    pub fn builder() -> RecordBuilder {
        RecordBuilder::new()
    }

    /// Text that the embedding represents
    pub fn embedded_text(&self) -> &str {
        self.normalized_text.as_deref().unwrap_or(&self.text)
    }
}

/// Builder for Record with fluent API
#[derive(Debug, Default)]
pub struct RecordBuilder {
    id: Option<RecordId>,
    position: Option<GeoPoint>,
    text: Option<String>,
    normalized_text: Option<String>,
    embedding: Option<Vec<f32>>,
    language: Option<LanguageTag>,
    created_at: Option<DateTime<Utc>>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record ID (auto-generated if not set)
    pub fn id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn position(mut self, position: GeoPoint) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the position from raw coordinates (validated by the store)
    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.position = Some(GeoPoint { lat, lon });
        self
    }

    pub fn maybe_position(mut self, position: Option<GeoPoint>) -> Self {
        self.position = position;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn normalized_text(mut self, text: impl Into<String>) -> Self {
        self.normalized_text = Some(text.into());
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn language(mut self, language: LanguageTag) -> Self {
        self.language = Some(language);
        self
    }

    /// Set the creation time (defaults to now)
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Build the Record
    pub fn build(self) -> Result<Record, RecordBuilderError> {
        let text = self.text.ok_or(RecordBuilderError::MissingText)?;
        let embedding = self.embedding.ok_or(RecordBuilderError::MissingEmbedding)?;
        let language = self.language.ok_or(RecordBuilderError::MissingLanguage)?;
        let created_at = self.created_at.unwrap_or_else(Utc::now);

        Ok(Record {
            id: self.id.unwrap_or_else(RecordId::generate),
            position: self.position,
            text,
            normalized_text: self.normalized_text,
            embedding,
            language,
            created_at,
            updated_at: created_at,
        })
    }
}

/// Errors that can occur when building a Record
#[derive(Debug, thiserror::Error)]
pub enum RecordBuilderError {
    #[error("Missing required field: text")]
    MissingText,
    #[error("Missing required field: embedding")]
    MissingEmbedding,
    #[error("Missing required field: language")]
    MissingLanguage,
}
