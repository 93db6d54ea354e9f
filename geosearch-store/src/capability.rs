//! Store capabilities
//!
//! Indexes are provisioned explicitly. A capability has a free-form name
//! (the indexing backend) and a kind (what queries it enables), so an
//! equivalent backend can be swapped in under a different name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a capability enables at query time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Radius filtering and distance ranking
    SpatialIndex,
    /// Nearest-neighbour lookup over embeddings
    VectorIndex,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpatialIndex => "spatial_index",
            Self::VectorIndex => "vector_index",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spatial" | "spatial_index" => Ok(Self::SpatialIndex),
            "vector" | "vector_index" => Ok(Self::VectorIndex),
            other => Err(format!("unknown capability kind: {}", other)),
        }
    }
}

/// A named capability to provision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub kind: CapabilityKind,
}

impl Capability {
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Default grid-based spatial index
    pub fn geo_grid() -> Self {
        Self::new("geo_grid", CapabilityKind::SpatialIndex)
    }

    /// Default HNSW vector index
    pub fn hnsw() -> Self {
        Self::new("hnsw", CapabilityKind::VectorIndex)
    }
}

/// Marker persisted once a capability is installed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledCapability {
    pub name: String,
    pub kind: CapabilityKind,
    pub installed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "spatial".parse::<CapabilityKind>().unwrap(),
            CapabilityKind::SpatialIndex
        );
        assert_eq!(
            "Vector_Index".parse::<CapabilityKind>().unwrap(),
            CapabilityKind::VectorIndex
        );
        assert!("fulltext".parse::<CapabilityKind>().is_err());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&CapabilityKind::VectorIndex).unwrap();
        assert_eq!(json, "\"vector_index\"");
    }
}
