//! KDD Configuration Management
//!
//! Layered TOML configuration:
//! - Global config: `~/.kdd/config.toml`
//! - Local config: `.kdd/config.toml` (next to the spec tree)
//! - CLI overrides via [`ConfigOverrides`]
//!
//! Configuration is merged in order: defaults → global → local → overrides.

mod error;

pub use error::{ConfigError, Result};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Root configuration for the KDD engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct KddConfig {
    /// Index build configuration
    pub index: IndexConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Query engine configuration
    pub query: QueryConfig,

    /// Event bus configuration
    pub events: EventsConfig,
}

/// Index build configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Artifact root directory, relative to the repository root.
    pub artifact_root: String,

    /// Spec tree directory under the repository root.
    pub spec_dir: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            artifact_root: ".kdd-index".to_string(),
            spec_dir: "specs".to_string(),
        }
    }
}

/// Embedding provider selection.
///
/// # Example TOML
///
/// ```toml
/// [embedding]
/// provider = "openai"  # or "none" or "stub"
/// model = "nomic-embed-text-v1.5"
/// dimensions = 768
/// ```
///
/// The endpoint URL and API key come from `KDD_EMBED_BASE_URL` and
/// `KDD_EMBED_API_KEY`; the engine itself reads no environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::None,
            model: "nomic-embed-text-v1.5".to_string(),
            dimensions: 768,
        }
    }
}

/// Embedding provider type selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProviderType {
    /// No provider: the index stays at L1.
    #[default]
    None,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Deterministic stub, for tests and offline runs.
    Stub,
}

impl std::fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Openai => write!(f, "openai"),
            Self::Stub => write!(f, "stub"),
        }
    }
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "openai" => Ok(Self::Openai),
            "stub" => Ok(Self::Stub),
            _ => Err(ConfigError::Validation(format!(
                "unknown embedding provider: '{s}'. Valid values: none, openai, stub"
            ))),
        }
    }
}

/// Query engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Soft deadline in milliseconds; past it queries return partial results.
    pub soft_deadline_ms: u64,
    /// Hard deadline in milliseconds; past it queries abort with TIMEOUT.
    pub hard_deadline_ms: u64,
    /// Default result limit.
    pub default_limit: usize,
    /// Default token budget for hybrid and context queries.
    pub max_tokens: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            soft_deadline_ms: 300,
            hard_deadline_ms: 2000,
            default_limit: 10,
            max_tokens: 4000,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Consumers slower than this are detached.
    pub slow_consumer_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { slow_consumer_ms: 50 }
    }
}

/// CLI-provided overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub artifact_root: Option<String>,
    pub spec_dir: Option<String>,
    pub embedding_provider: Option<EmbeddingProviderType>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

impl KddConfig {
    /// Load the merged configuration for a repository root.
    pub fn load(repo_root: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = KddConfig::default();

        if let Some(base_dirs) = directories::BaseDirs::new() {
            let global = base_dirs.home_dir().join(".kdd").join("config.toml");
            if global.is_file() {
                debug!(path = %global.display(), "loading global config");
                config.merge_file(&global)?;
            }
        }
        let local = repo_root.join(".kdd").join("config.toml");
        if local.is_file() {
            debug!(path = %local.display(), "loading local config");
            config.merge_file(&local)?;
        }

        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &PathBuf) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let layer: KddConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        *self = merge_configs(std::mem::take(self), layer);
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(root) = &overrides.artifact_root {
            self.index.artifact_root = root.clone();
        }
        if let Some(dir) = &overrides.spec_dir {
            self.index.spec_dir = dir.clone();
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = &overrides.embedding_model {
            self.embedding.model = model.clone();
        }
        if let Some(dimensions) = overrides.embedding_dimensions {
            self.embedding.dimensions = dimensions;
        }
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<()> {
        if self.index.artifact_root.is_empty() {
            return Err(ConfigError::Validation(
                "index.artifact_root must not be empty".to_string(),
            ));
        }
        if self.index.spec_dir.is_empty() {
            return Err(ConfigError::Validation(
                "index.spec_dir must not be empty".to_string(),
            ));
        }
        if self.embedding.provider != EmbeddingProviderType::None
            && self.embedding.dimensions == 0
        {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        if self.query.hard_deadline_ms < self.query.soft_deadline_ms {
            return Err(ConfigError::Validation(
                "query.hard_deadline_ms must be >= query.soft_deadline_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Merging
// ============================================================================

/// Merge two configurations, field by field, so a later layer only overrides
/// what it actually sets. Overlay values that still equal the defaults keep
/// the base value.
fn merge_configs(base: KddConfig, overlay: KddConfig) -> KddConfig {
    KddConfig {
        index: merge_index(base.index, overlay.index),
        embedding: merge_embedding(base.embedding, overlay.embedding),
        query: merge_query(base.query, overlay.query),
        events: merge_events(base.events, overlay.events),
    }
}

fn merge_index(base: IndexConfig, overlay: IndexConfig) -> IndexConfig {
    let defaults = IndexConfig::default();
    IndexConfig {
        artifact_root: if overlay.artifact_root != defaults.artifact_root {
            overlay.artifact_root
        } else {
            base.artifact_root
        },
        spec_dir: if overlay.spec_dir != defaults.spec_dir {
            overlay.spec_dir
        } else {
            base.spec_dir
        },
    }
}

fn merge_embedding(base: EmbeddingConfig, overlay: EmbeddingConfig) -> EmbeddingConfig {
    let defaults = EmbeddingConfig::default();
    EmbeddingConfig {
        provider: if overlay.provider != defaults.provider {
            overlay.provider
        } else {
            base.provider
        },
        model: if overlay.model != defaults.model {
            overlay.model
        } else {
            base.model
        },
        dimensions: if overlay.dimensions != defaults.dimensions {
            overlay.dimensions
        } else {
            base.dimensions
        },
    }
}

fn merge_query(base: QueryConfig, overlay: QueryConfig) -> QueryConfig {
    let defaults = QueryConfig::default();
    QueryConfig {
        soft_deadline_ms: if overlay.soft_deadline_ms != defaults.soft_deadline_ms {
            overlay.soft_deadline_ms
        } else {
            base.soft_deadline_ms
        },
        hard_deadline_ms: if overlay.hard_deadline_ms != defaults.hard_deadline_ms {
            overlay.hard_deadline_ms
        } else {
            base.hard_deadline_ms
        },
        default_limit: if overlay.default_limit != defaults.default_limit {
            overlay.default_limit
        } else {
            base.default_limit
        },
        max_tokens: if overlay.max_tokens != defaults.max_tokens {
            overlay.max_tokens
        } else {
            base.max_tokens
        },
    }
}

fn merge_events(base: EventsConfig, overlay: EventsConfig) -> EventsConfig {
    let defaults = EventsConfig::default();
    EventsConfig {
        slow_consumer_ms: if overlay.slow_consumer_ms != defaults.slow_consumer_ms {
            overlay.slow_consumer_ms
        } else {
            base.slow_consumer_ms
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = KddConfig::default();
        assert_eq!(config.index.artifact_root, ".kdd-index");
        assert_eq!(config.index.spec_dir, "specs");
        assert_eq!(config.embedding.provider, EmbeddingProviderType::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_config_and_overrides() {
        let dir = TempDir::new().unwrap();
        let kdd_dir = dir.path().join(".kdd");
        std::fs::create_dir_all(&kdd_dir).unwrap();
        std::fs::write(
            kdd_dir.join("config.toml"),
            "[embedding]\nprovider = \"stub\"\nmodel = \"test-model\"\ndimensions = 64\n",
        )
        .unwrap();

        let config = KddConfig::load(dir.path(), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProviderType::Stub);
        assert_eq!(config.embedding.dimensions, 64);

        let overrides = ConfigOverrides {
            embedding_dimensions: Some(128),
            ..Default::default()
        };
        let config = KddConfig::load(dir.path(), &overrides).unwrap();
        assert_eq!(config.embedding.dimensions, 128);
    }

    #[test]
    fn test_partial_layer_preserves_base_values() {
        let mut base = KddConfig::default();
        base.index.artifact_root = ".custom-index".to_string();
        base.query.max_tokens = 8000;

        // A layer that only sets [embedding] must not reset other sections.
        let overlay: KddConfig = toml::from_str(
            "[embedding]\nprovider = \"stub\"\nmodel = \"test-model\"\ndimensions = 64\n",
        )
        .unwrap();
        let merged = merge_configs(base, overlay);

        assert_eq!(merged.embedding.provider, EmbeddingProviderType::Stub);
        assert_eq!(merged.embedding.dimensions, 64);
        // Base values survive (the overlay didn't set them).
        assert_eq!(merged.index.artifact_root, ".custom-index");
        assert_eq!(merged.query.max_tokens, 8000);
        assert_eq!(merged.index.spec_dir, "specs");
    }

    #[test]
    fn test_partial_layer_file_preserves_global_section() {
        let dir = TempDir::new().unwrap();
        let kdd_dir = dir.path().join(".kdd");
        std::fs::create_dir_all(&kdd_dir).unwrap();
        // Local config sets only [index]; embedding settings come from the
        // override layer standing in for a broader base.
        std::fs::write(kdd_dir.join("config.toml"), "[index]\nspec_dir = \"docs\"\n").unwrap();

        let overrides = ConfigOverrides {
            embedding_provider: Some(EmbeddingProviderType::Stub),
            ..Default::default()
        };
        let config = KddConfig::load(dir.path(), &overrides).unwrap();
        assert_eq!(config.index.spec_dir, "docs");
        assert_eq!(config.embedding.provider, EmbeddingProviderType::Stub);
    }

    #[test]
    fn test_invalid_deadlines_rejected() {
        let mut config = KddConfig::default();
        config.query.soft_deadline_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!(
            "openai".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::Openai
        );
        assert!("quantum".parse::<EmbeddingProviderType>().is_err());
    }
}
