//! CLI command implementations.
//!
//! Each command builds a [`CliContext`] and calls one engine entry point.
//! Exit codes: 0 ok, 1 recoverable (partial failure), 2 fatal, 3 user error.

pub mod context;
pub mod coverage;
pub mod graph;
pub mod impact;
pub mod index;
pub mod merge;
pub mod orphans;
pub mod search;
pub mod status;
pub mod violations;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use kdd_config::{ConfigOverrides, KddConfig};
use kdd_core::{ArtifactStore, EmbeddingModel, EventBus, LogConsumer};
use kdd_search::{ProviderKind, QueryEngine, QueryError};

pub const EXIT_OK: u8 = 0;
pub const EXIT_PARTIAL: u8 = 1;
pub const EXIT_FATAL: u8 = 2;
pub const EXIT_USER: u8 = 3;

/// Turn one of the documented codes into a process exit code.
pub fn exit(code: u8) -> ExitCode {
    ExitCode::from(code)
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub repo: PathBuf,
    pub index_root: Option<String>,
    pub embedding_provider: Option<String>,
}

/// Shared engine context for one command invocation.
pub struct CliContext {
    pub config: KddConfig,
    pub repo_root: PathBuf,
    pub store: ArtifactStore,
    pub bus: Arc<EventBus>,
    pub model: Option<Arc<dyn EmbeddingModel>>,
}

impl CliContext {
    pub fn build(global: &GlobalOptions) -> Result<Self> {
        let repo_root = global
            .repo
            .canonicalize()
            .with_context(|| format!("repository root not found: {}", global.repo.display()))?;

        let overrides = ConfigOverrides {
            artifact_root: global.index_root.clone(),
            embedding_provider: global
                .embedding_provider
                .as_deref()
                .map(str::parse)
                .transpose()?,
            ..Default::default()
        };
        let config = KddConfig::load(&repo_root, &overrides)?;

        let store = ArtifactStore::new(repo_root.join(&config.index.artifact_root));
        let bus = Arc::new(EventBus::new(std::time::Duration::from_millis(
            config.events.slow_consumer_ms,
        )));
        bus.register(Box::new(LogConsumer));

        let provider = match config.embedding.provider {
            kdd_config::EmbeddingProviderType::None => ProviderKind::None,
            kdd_config::EmbeddingProviderType::Openai => ProviderKind::OpenAi,
            kdd_config::EmbeddingProviderType::Stub => ProviderKind::Stub,
        };
        let model = kdd_search::create_model(
            provider,
            &config.embedding.model,
            config.embedding.dimensions,
        )?;

        Ok(Self {
            config,
            repo_root,
            store,
            bus,
            model,
        })
    }

    /// Open the query engine over the current artifacts.
    pub fn engine(&self) -> Result<QueryEngine> {
        let engine = QueryEngine::open(&self.store, self.bus.clone(), self.model.clone())
            .context("failed to load the index; run `kdd index` first")?;
        Ok(engine.with_deadlines(kdd_search::QueryDeadlines {
            soft: std::time::Duration::from_millis(self.config.query.soft_deadline_ms),
            hard: std::time::Duration::from_millis(self.config.query.hard_deadline_ms),
        }))
    }
}

/// Map a query error onto the documented exit codes.
pub fn exit_code_for(error: &QueryError) -> ExitCode {
    let code = match error {
        QueryError::NodeNotFound(_)
        | QueryError::InvalidDepth { .. }
        | QueryError::InvalidParams(_)
        | QueryError::UnknownEdgeType(_)
        | QueryError::EmptyHints
        | QueryError::QueryTooShort => EXIT_USER,
        QueryError::NoEmbeddings | QueryError::Timeout => EXIT_PARTIAL,
        QueryError::IndexUnavailable(_) | QueryError::Embedding(_) | QueryError::Vector(_) => {
            EXIT_FATAL
        }
    };
    ExitCode::from(code)
}

/// Print a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
