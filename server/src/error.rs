//! Error types for the geosearch server.

use geosearch_store::{CapabilityKind, StoreError};
use serde_json::json;
use thiserror::Error;

use crate::rpc::JsonRpcError;
use crate::translate::TranslationError;

/// Errors surfaced by the query service and the RPC layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unsupported language pair: {0}")]
    UnsupportedLanguagePair(String),

    #[error("Translation models not installed: {0}")]
    ModelNotInstalled(String),

    #[error("Capability missing: {0}")]
    CapabilityMissing(CapabilityKind),

    #[error("Service not ready: {0}")]
    NotReady(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("Translation error: {0}")]
    Translation(TranslationError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Stable snake_case name carried in RPC error data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::UnsupportedLanguagePair(_) => "unsupported_language_pair",
            Self::ModelNotInstalled(_) => "model_not_installed",
            Self::CapabilityMissing(_) => "capability_missing",
            Self::NotReady(_) => "not_ready",
            Self::NotFound(_) => "not_found",
            Self::BootstrapFailed(_) => "bootstrap_failed",
            Self::Translation(_) => "translation",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }

    /// JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Validation(_) => -32602,
            Self::StorageUnavailable(_) => -32001,
            Self::UnsupportedLanguagePair(_) => -32002,
            Self::ModelNotInstalled(_) => -32003,
            Self::CapabilityMissing(_) => -32004,
            Self::NotReady(_) => -32005,
            Self::NotFound(_) => -32006,
            Self::BootstrapFailed(_) => -32007,
            Self::Translation(_) | Self::Store(_) | Self::Internal(_) => -32603,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CapabilityMissing(kind) => Self::CapabilityMissing(kind),
            e if e.is_validation() => Self::Validation(e.to_string()),
            e if e.is_unavailable() => Self::StorageUnavailable(e.to_string()),
            e => Self::Store(e),
        }
    }
}

impl From<TranslationError> for ServiceError {
    fn from(err: TranslationError) -> Self {
        match err {
            TranslationError::UnsupportedLanguagePair(pair) => {
                Self::UnsupportedLanguagePair(pair.to_string())
            }
            TranslationError::ModelNotInstalled => {
                Self::ModelNotInstalled("no translation models are loaded".to_string())
            }
            TranslationError::MissingPackage(pair) => Self::ModelNotInstalled(pair.to_string()),
            TranslationError::InvalidPair(pair) => {
                Self::Validation(format!("invalid language pair '{}'", pair))
            }
            e => Self::Translation(e),
        }
    }
}

impl From<ServiceError> for JsonRpcError {
    fn from(err: ServiceError) -> Self {
        JsonRpcError {
            code: err.code(),
            message: err.to_string(),
            data: Some(json!({ "kind": err.kind() })),
        }
    }
}

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
