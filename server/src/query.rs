//! Query service
//!
//! Composes translation, embedding and the store into the search contract.
//! Every stored record is embedded from its canonical-language form, so a
//! query is translated to the canonical language before it is embedded.
//!
//! All operations block; callers on the async runtime go through
//! `spawn_blocking`.

use chrono::{DateTime, Utc};
use geosearch_store::{
    CapabilityKind, GeoPoint, GeoStore, LanguageTag, NearestQuery, RankWeights, RankedResult,
    Record, RecordId, StoreError, VectorEngine,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ServiceError, ServiceResult};
use crate::suggest::Vocabulary;
use crate::translate::Translator;

/// Query service settings
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Language records are normalized to before embedding
    pub canonical_language: LanguageTag,
    /// Language assumed when a request has no hint
    pub default_query_language: LanguageTag,
    pub supported_languages: Vec<LanguageTag>,
    pub weights: RankWeights,
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_multi_queries: usize,
    /// Re-run spatial queries semantic-only when the spatial index is missing
    pub allow_degradation: bool,
    /// A query matching this many vocabulary labels needs refinement; zero
    /// disables the count rule
    pub refine_threshold: usize,
    /// Suggestions offered with a refinement request
    pub refine_suggestions: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let tag = |s: &str| LanguageTag::parse(s).ok();
        let supported: Vec<LanguageTag> = ["en", "sv"].iter().filter_map(|s| tag(s)).collect();
        Self {
            canonical_language: supported[1].clone(),
            default_query_language: supported[0].clone(),
            supported_languages: supported,
            weights: RankWeights::default(),
            default_limit: 10,
            max_limit: 100,
            max_multi_queries: 2,
            allow_degradation: false,
            refine_threshold: 10,
            refine_suggestions: 10,
        }
    }
}

/// A search request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    #[serde(default)]
    pub origin: Option<GeoPoint>,
    /// Language of `text`; defaults to the configured query language
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Run the query as given even if it is too general
    #[serde(default, alias = "allow_raw_search")]
    pub refined: bool,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn near(mut self, origin: GeoPoint, radius_m: Option<f64>) -> Self {
        self.origin = Some(origin);
        self.radius_m = radius_m;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn refined(mut self) -> Self {
        self.refined = true;
        self
    }
}

/// Record as returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub id: String,
    pub text: String,
    pub language: String,
    pub position: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Record> for RecordView {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.to_string(),
            text: record.text.clone(),
            language: record.language.to_string(),
            position: record.position,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: RecordView,
    pub distance_m: Option<f64>,
    pub similarity: f32,
    pub rank: f32,
}

impl From<RankedResult> for SearchHit {
    fn from(result: RankedResult) -> Self {
        Self {
            record: RecordView::from(result.record.as_ref()),
            distance_m: result.distance_m,
            similarity: result.similarity,
            rank: result.rank,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Query text as given
    pub query: String,
    /// Canonical-language text that was embedded
    pub normalized_query: String,
    /// Language the query was interpreted in
    pub language: String,
    /// True when the spatial part of the query was dropped
    pub degraded: bool,
    pub results: Vec<SearchHit>,
    /// The query is too general and was not run
    pub need_refine: bool,
    /// Narrower labels to pick from, shown in the query language
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Resending with `refined: true` runs the query as given
    pub allow_raw_search: bool,
    /// The request asked to skip the generality check
    pub refined: bool,
}

/// Answer to several searches. When any query needs refinement no results
/// are returned, only the suggestions for those queries.
#[derive(Debug, Clone, Serialize)]
pub struct MultiSearchResponse {
    pub need_refine: bool,
    /// Indices of the queries that need refinement
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refine_which: Vec<usize>,
    /// Suggestions per query, empty for specific ones
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_raw_search: Vec<bool>,
    pub responses: Vec<SearchResponse>,
}

/// A record to store
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub position: Option<GeoPoint>,
    pub language: String,
}

pub struct QueryService {
    store: Arc<GeoStore>,
    engine: Arc<VectorEngine>,
    translator: Arc<dyn Translator>,
    vocabulary: Arc<Vocabulary>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(
        store: Arc<GeoStore>,
        engine: Arc<VectorEngine>,
        translator: Arc<dyn Translator>,
        vocabulary: Arc<Vocabulary>,
        config: QueryConfig,
    ) -> Self {
        Self {
            store,
            engine,
            translator,
            vocabulary,
            config,
        }
    }

    pub fn store(&self) -> &Arc<GeoStore> {
        &self.store
    }

    /// Ranked records for a free-text query
    pub fn search(&self, request: &SearchRequest) -> ServiceResult<SearchResponse> {
        let started = Instant::now();
        let text = non_empty(&request.text, "query text")?;
        let language = self.language(request.language.as_deref())?;
        let limit = self.limit(request.limit)?;

        if let Some(origin) = &request.origin {
            origin.validate()?;
        }
        match request.radius_m {
            Some(_) if request.origin.is_none() => {
                return Err(ServiceError::validation("radius_m requires an origin"));
            }
            Some(radius) if !radius.is_finite() || radius <= 0.0 => {
                return Err(ServiceError::validation(format!(
                    "radius_m must be positive, got {}",
                    radius
                )));
            }
            _ => {}
        }

        let normalized = self.normalize(text, &language)?;

        if !request.refined
            && self
                .vocabulary
                .is_too_general(&normalized, self.config.refine_threshold)
        {
            let suggestions =
                self.render_labels(&normalized, &language, self.config.refine_suggestions)?;
            tracing::info!(
                "[usage] search lang={} query={:?} normalized={:?} need_refine=true suggestions={} elapsed_ms={}",
                language,
                text,
                normalized,
                suggestions.len(),
                started.elapsed().as_millis()
            );
            return Ok(SearchResponse {
                query: text.to_string(),
                normalized_query: normalized,
                language: language.to_string(),
                degraded: false,
                results: Vec::new(),
                need_refine: true,
                suggestions,
                allow_raw_search: true,
                refined: false,
            });
        }

        let vector = self.engine.embed(&normalized)?;

        let mut query = NearestQuery::new(&vector, limit).weights(self.config.weights.clone());
        if let Some(origin) = request.origin {
            query = query.origin(origin);
        }
        if let Some(radius) = request.radius_m {
            query = query.radius(radius);
        }

        let (results, degraded) = match self.store.nearest_by_similarity(&query) {
            Ok(results) => (results, false),
            Err(StoreError::CapabilityMissing(CapabilityKind::SpatialIndex))
                if self.config.allow_degradation && query.is_spatial() =>
            {
                tracing::warn!("Spatial index missing, answering '{}' semantic-only", text);
                (self.store.nearest_by_similarity(&query.semantic_only())?, true)
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            "[usage] search lang={} query={:?} normalized={:?} spatial={} refined={} results={} degraded={} elapsed_ms={}",
            language,
            text,
            normalized,
            request.origin.is_some(),
            request.refined,
            results.len(),
            degraded,
            started.elapsed().as_millis()
        );

        Ok(SearchResponse {
            query: text.to_string(),
            normalized_query: normalized,
            language: language.to_string(),
            degraded,
            results: results.into_iter().map(SearchHit::from).collect(),
            need_refine: false,
            suggestions: Vec::new(),
            allow_raw_search: false,
            refined: request.refined,
        })
    }

    /// Several searches at once, answered in request order
    pub fn multi_search(&self, requests: &[SearchRequest]) -> ServiceResult<MultiSearchResponse> {
        if requests.is_empty() {
            return Err(ServiceError::validation("at least one query is required"));
        }
        if requests.len() > self.config.max_multi_queries {
            return Err(ServiceError::validation(format!(
                "at most {} queries per request, got {}",
                self.config.max_multi_queries,
                requests.len()
            )));
        }

        let started = Instant::now();
        let responses = std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.search(request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| ServiceError::Internal("search worker panicked".into()))?
                })
                .collect::<ServiceResult<Vec<_>>>()
        })?;

        let refine_which: Vec<usize> = responses
            .iter()
            .enumerate()
            .filter(|(_, r)| r.need_refine)
            .map(|(i, _)| i)
            .collect();
        tracing::info!(
            "[usage] multi_search queries={} refine_which={:?} elapsed_ms={}",
            requests.len(),
            refine_which,
            started.elapsed().as_millis()
        );

        if refine_which.is_empty() {
            return Ok(MultiSearchResponse {
                need_refine: false,
                refine_which,
                suggestions: Vec::new(),
                allow_raw_search: Vec::new(),
                responses,
            });
        }
        Ok(MultiSearchResponse {
            need_refine: true,
            refine_which,
            allow_raw_search: responses.iter().map(|r| r.allow_raw_search).collect(),
            suggestions: responses.into_iter().map(|r| r.suggestions).collect(),
            responses: Vec::new(),
        })
    }

    /// Normalize, embed and store a record
    pub fn ingest(&self, request: IngestRequest) -> ServiceResult<RecordView> {
        let text = non_empty(&request.text, "record text")?;
        let language = self.language(Some(&request.language))?;
        let id = match request.id {
            Some(id) => RecordId::new(id)?,
            None => RecordId::generate(),
        };

        let record = self.embed_record(id, text, language, request.position)?;
        let stored = self.store.put(record)?;
        tracing::debug!("Ingested record {}", stored.id);
        Ok(RecordView::from(stored.as_ref()))
    }

    /// Replace a record's text and re-embed it
    pub fn update_text(
        &self,
        id: &str,
        text: &str,
        language: Option<&str>,
    ) -> ServiceResult<RecordView> {
        let id = RecordId::new(id)?;
        let existing = self
            .store
            .get(&id)
            .ok_or_else(|| ServiceError::not_found(format!("record '{}'", id)))?;
        let text = non_empty(text, "record text")?;
        let language = match language {
            Some(hint) => self.language(Some(hint))?,
            None => existing.language.clone(),
        };

        let record = self.embed_record(id, text, language, existing.position)?;
        let stored = self.store.put(record)?;
        Ok(RecordView::from(stored.as_ref()))
    }

    pub fn delete(&self, id: &str) -> ServiceResult<bool> {
        let id = RecordId::new(id)?;
        Ok(self.store.delete(&id)?)
    }

    pub fn get(&self, id: &str) -> ServiceResult<RecordView> {
        let id = RecordId::new(id)?;
        self.store
            .get(&id)
            .map(|record| RecordView::from(record.as_ref()))
            .ok_or_else(|| ServiceError::not_found(format!("record '{}'", id)))
    }

    /// Vocabulary labels matching the query, shown in the query language.
    ///
    /// A label that translates to something different is rendered as
    /// `"<translated> (<label>)"`.
    pub fn suggest(
        &self,
        text: &str,
        language: Option<&str>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<String>> {
        let text = non_empty(text, "suggestion prefix")?;
        let language = self.language(language)?;
        let limit = self.limit(limit)?;
        let normalized = self.normalize(text, &language)?;
        self.render_labels(&normalized, &language, limit)
    }

    /// Labels matching canonical-language text, rendered in `language`
    fn render_labels(
        &self,
        normalized: &str,
        language: &LanguageTag,
        limit: usize,
    ) -> ServiceResult<Vec<String>> {
        let canonical = &self.config.canonical_language;
        self.vocabulary
            .matching(normalized, limit)
            .into_iter()
            .map(|label| {
                if language == canonical {
                    return Ok(label.to_string());
                }
                let translated = self.translator.translate(label, canonical, language)?;
                if translated.to_lowercase() == label.to_lowercase() {
                    Ok(label.to_string())
                } else {
                    Ok(format!("{} ({})", translated, label))
                }
            })
            .collect()
    }

    /// Direct translation between two supported languages
    pub fn translate(&self, text: &str, from: &str, to: &str) -> ServiceResult<String> {
        let from = self.language(Some(from))?;
        let to = self.language(Some(to))?;
        Ok(self.translator.translate(text, &from, &to)?)
    }

    fn embed_record(
        &self,
        id: RecordId,
        text: &str,
        language: LanguageTag,
        position: Option<GeoPoint>,
    ) -> ServiceResult<Record> {
        let normalized = self.normalize(text, &language)?;
        let embedding = self.engine.embed(&normalized)?;
        let record = Record::builder()
            .id(id)
            .maybe_position(position)
            .text(text)
            .normalized_text(normalized)
            .embedding(embedding)
            .language(language)
            .build()
            .map_err(StoreError::from)?;
        Ok(record)
    }

    /// Translate into the canonical language when needed
    fn normalize(&self, text: &str, language: &LanguageTag) -> ServiceResult<String> {
        let canonical = &self.config.canonical_language;
        if language == canonical {
            return Ok(text.to_string());
        }
        let translated = self.translator.translate(text, language, canonical)?;
        tracing::debug!("Normalized {:?} ({}) to {:?}", text, language, translated);
        Ok(translated)
    }

    fn language(&self, hint: Option<&str>) -> ServiceResult<LanguageTag> {
        let Some(hint) = hint else {
            return Ok(self.config.default_query_language.clone());
        };
        let tag = LanguageTag::parse(hint)?;
        if !self.config.supported_languages.contains(&tag) {
            return Err(ServiceError::validation(format!(
                "unsupported language '{}'",
                tag
            )));
        }
        Ok(tag)
    }

    fn limit(&self, limit: Option<usize>) -> ServiceResult<usize> {
        match limit {
            None => Ok(self.config.default_limit),
            Some(n) if (1..=self.config.max_limit).contains(&n) => Ok(n),
            Some(n) => Err(ServiceError::validation(format!(
                "limit must be between 1 and {}, got {}",
                self.config.max_limit, n
            ))),
        }
    }
}

fn non_empty<'a>(text: &'a str, what: &str) -> ServiceResult<&'a str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}
