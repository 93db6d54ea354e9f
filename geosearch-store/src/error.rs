//! Error types for geosearch-store

use thiserror::Error;

use crate::capability::CapabilityKind;

/// Errors that can occur in the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input rejected before touching storage
    #[error("Validation error: {0}")]
    Validation(String),

    /// Embedding length differs from the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Backing store could not be reached after retrying
    #[error("Storage unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// Non-transient RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Query needs a capability that has not been installed
    #[error("Capability missing: {0}")]
    CapabilityMissing(CapabilityKind),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// On-disk schema is incompatible with this build
    #[error("Schema error: {0}")]
    Schema(String),

    /// Model loading error
    #[error("Model error: {0}")]
    Model(String),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] crate::record::RecordBuilderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// True for errors caused by the caller's input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::DimensionMismatch { .. } | Self::Builder(_)
        )
    }

    /// True when the backing store could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether retrying the failed call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => is_transient(err),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Whether a RocksDB error is worth retrying
fn is_transient(err: &rocksdb::Error) -> bool {
    use rocksdb::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::IOError
            | ErrorKind::Busy
            | ErrorKind::TryAgain
            | ErrorKind::TimedOut
            | ErrorKind::Incomplete
            | ErrorKind::Aborted
    )
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(StoreError::validation("bad").is_validation());
        assert!(StoreError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
        .is_validation());
        assert!(!StoreError::embedding("boom").is_validation());
    }

    #[test]
    fn test_display_messages() {
        let err = StoreError::DimensionMismatch {
            expected: 384,
            actual: 256,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 256");

        let err = StoreError::CapabilityMissing(CapabilityKind::SpatialIndex);
        assert_eq!(err.to_string(), "Capability missing: spatial_index");
    }

    #[test]
    fn test_transient_classification() {
        let timeout = StoreError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"));
        assert!(timeout.is_transient());
        let missing = StoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!missing.is_transient());
        assert!(!StoreError::validation("bad").is_transient());

        let unavailable = StoreError::Unavailable {
            attempts: 3,
            source: Box::new(timeout),
        };
        assert!(unavailable.is_unavailable());
        assert_eq!(
            unavailable.to_string(),
            "Storage unavailable after 3 attempt(s): IO error: slow disk"
        );
    }
}
