//! Index Manifest
//!
//! One manifest per artifact root: identity, capability level, embedding
//! configuration, stats, and the last indexed commit. The semver `major`
//! decides mergeability; embedding fields exist only at L2 and above.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::IndexLevel;

/// Manifest schema version written by this engine.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Engine version recorded as `kdd_version`.
pub const KDD_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by manifest validation and compatibility checks.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid manifest version '{0}': {1}")]
    InvalidVersion(String, semver::Error),

    #[error("incompatible manifest versions: {0} vs {1}")]
    IncompatibleVersion(String, String),

    #[error("incompatible embedding models: {0:?} vs {1:?}")]
    IncompatibleEmbeddingModel(Option<String>, Option<String>),

    #[error("incompatible index structures: {0} vs {1}")]
    IncompatibleStructure(String, String),

    #[error("manifest invariant broken: {0}")]
    Invariant(String),
}

/// Result type for manifest operations.
pub type Result<T> = std::result::Result<T, ManifestError>;

// ============================================================================
// Manifest
// ============================================================================

/// Single- vs multi-domain index layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Structure {
    SingleDomain,
    MultiDomain,
}

impl Structure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Structure::SingleDomain => "single-domain",
            Structure::MultiDomain => "multi-domain",
        }
    }
}

/// Artifact counts; must equal the actual on-disk counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub nodes: usize,
    pub edges: usize,
    pub embeddings: usize,
    pub enrichments: usize,
}

/// The persisted index manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Manifest schema version (semver; major gates mergeability).
    pub version: String,
    /// Engine version that produced this index.
    pub kdd_version: String,
    /// Present iff `index_level >= L2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<usize>,
    pub indexed_at: DateTime<Utc>,
    /// Producer identity (`indexer`, `merge`, hostname, ...).
    pub indexed_by: String,
    pub structure: Structure,
    pub index_level: IndexLevel,
    pub stats: ManifestStats,
    /// Required iff `structure` is multi-domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

impl IndexManifest {
    /// A fresh manifest for a new index.
    pub fn new(structure: Structure, index_level: IndexLevel, indexed_by: &str) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            kdd_version: KDD_VERSION.to_string(),
            embedding_model: None,
            embedding_dimensions: None,
            indexed_at: Utc::now(),
            indexed_by: indexed_by.to_string(),
            structure,
            index_level,
            stats: ManifestStats::default(),
            domains: match structure {
                Structure::MultiDomain => Some(Vec::new()),
                Structure::SingleDomain => None,
            },
            git_commit: None,
        }
    }

    /// Attach embedding configuration, raising the level to at least L2.
    pub fn with_embeddings(mut self, model: &str, dimensions: usize) -> Self {
        self.embedding_model = Some(model.to_string());
        self.embedding_dimensions = Some(dimensions);
        if self.index_level < IndexLevel::L2 {
            self.index_level = IndexLevel::L2;
        }
        self
    }

    pub fn parsed_version(&self) -> Result<semver::Version> {
        semver::Version::parse(&self.version)
            .map_err(|e| ManifestError::InvalidVersion(self.version.clone(), e))
    }

    /// Check internal invariants.
    pub fn validate(&self) -> Result<()> {
        self.parsed_version()?;
        let has_embedding = self.embedding_model.is_some() && self.embedding_dimensions.is_some();
        match self.index_level {
            IndexLevel::L1 => {
                if self.embedding_model.is_some() || self.embedding_dimensions.is_some() {
                    return Err(ManifestError::Invariant(
                        "embedding fields must be absent at L1".to_string(),
                    ));
                }
            }
            IndexLevel::L2 | IndexLevel::L3 => {
                if !has_embedding {
                    return Err(ManifestError::Invariant(
                        "embedding model and dimensions are required at L2+".to_string(),
                    ));
                }
            }
        }
        if self.structure == Structure::MultiDomain && self.domains.is_none() {
            return Err(ManifestError::Invariant(
                "multi-domain index requires a domains list".to_string(),
            ));
        }
        Ok(())
    }

    /// Pairwise merge compatibility: same semver major, same embedding model
    /// when either side is L2+, same structure.
    pub fn check_compatible(&self, other: &IndexManifest) -> Result<()> {
        let a = self.parsed_version()?;
        let b = other.parsed_version()?;
        if a.major != b.major {
            return Err(ManifestError::IncompatibleVersion(
                self.version.clone(),
                other.version.clone(),
            ));
        }
        let either_embedded =
            self.index_level >= IndexLevel::L2 || other.index_level >= IndexLevel::L2;
        if either_embedded && self.embedding_model != other.embedding_model {
            return Err(ManifestError::IncompatibleEmbeddingModel(
                self.embedding_model.clone(),
                other.embedding_model.clone(),
            ));
        }
        if self.structure != other.structure {
            return Err(ManifestError::IncompatibleStructure(
                self.structure.as_str().to_string(),
                other.structure.as_str().to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn l2_manifest(model: &str) -> IndexManifest {
        IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "test")
            .with_embeddings(model, 768)
    }

    #[test]
    fn test_l1_forbids_embedding_fields() {
        let mut manifest = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "test");
        assert!(manifest.validate().is_ok());
        manifest.embedding_model = Some("m".to_string());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_l2_requires_embedding_fields() {
        let manifest = l2_manifest("nomic-embed-text-v1.5");
        assert_eq!(manifest.index_level, IndexLevel::L2);
        assert!(manifest.validate().is_ok());

        let mut broken = manifest.clone();
        broken.embedding_dimensions = None;
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_multi_domain_requires_domains() {
        let manifest = IndexManifest::new(Structure::MultiDomain, IndexLevel::L1, "test");
        assert!(manifest.validate().is_ok());
        let mut broken = manifest.clone();
        broken.domains = None;
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_compatibility_major_version() {
        let a = l2_manifest("m");
        let mut b = l2_manifest("m");
        b.version = "2.0.0".to_string();
        assert!(matches!(
            a.check_compatible(&b),
            Err(ManifestError::IncompatibleVersion(_, _))
        ));
    }

    #[test]
    fn test_compatibility_embedding_model() {
        let a = l2_manifest("nomic-embed-text-v1.5");
        let b = l2_manifest("bge-small-en-v1.5");
        assert!(matches!(
            a.check_compatible(&b),
            Err(ManifestError::IncompatibleEmbeddingModel(_, _))
        ));
    }

    #[test]
    fn test_compatibility_l1_pair_ignores_models() {
        let a = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "a");
        let b = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "b");
        assert!(a.check_compatible(&b).is_ok());
    }

    #[test]
    fn test_compatibility_structure() {
        let a = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "a");
        let b = IndexManifest::new(Structure::MultiDomain, IndexLevel::L1, "b");
        assert!(matches!(
            a.check_compatible(&b),
            Err(ManifestError::IncompatibleStructure(_, _))
        ));
    }
}
