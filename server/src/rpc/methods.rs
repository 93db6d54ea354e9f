//! Method names and parameter types

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};
use crate::query::SearchRequest;

/// Every method the server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Health,
    StoreCheck,
    Capabilities,
    Search,
    MultiSearch,
    RecordPut,
    RecordUpdate,
    RecordGet,
    RecordDelete,
    Suggest,
    Translate,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::Health,
        Method::StoreCheck,
        Method::Capabilities,
        Method::Search,
        Method::MultiSearch,
        Method::RecordPut,
        Method::RecordUpdate,
        Method::RecordGet,
        Method::RecordDelete,
        Method::Suggest,
        Method::Translate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::StoreCheck => "store.check",
            Self::Capabilities => "capabilities",
            Self::Search => "search",
            Self::MultiSearch => "search.multi",
            Self::RecordPut => "record.put",
            Self::RecordUpdate => "record.update",
            Self::RecordGet => "record.get",
            Self::RecordDelete => "record.delete",
            Self::Suggest => "suggest",
            Self::Translate => "translate",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

#[derive(Debug, Deserialize)]
pub struct MultiSearchParams {
    pub queries: Vec<SearchRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RecordUpdateParams {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordIdParams {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateParams {
    pub text: String,
    pub from: String,
    pub to: String,
}

/// Decode `params`, treating a missing value as an empty object
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> ServiceResult<T> {
    let params = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(params)
        .map_err(|e| ServiceError::validation(format!("Invalid params: {}", e)))
}
