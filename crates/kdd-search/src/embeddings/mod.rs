//! Embedding providers
//!
//! Implementations of [`kdd_core::EmbeddingModel`]:
//! - [`OpenAiCompatModel`] - any OpenAI-compatible `/embeddings` endpoint
//!   (OpenAI, Azure OpenAI, Ollama, llama.cpp server)
//! - [`StubModel`] - deterministic hash-seeded vectors for tests and offline
//!   L2 runs

mod openai;
mod stub;

pub use openai::{OpenAiCompatModel, API_KEY_ENV, BASE_URL_ENV};
pub use stub::StubModel;

use std::sync::Arc;

use kdd_core::EmbeddingModel;

/// Provider selection, mirrored by the configuration crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// No provider: index at L1.
    #[default]
    None,
    /// OpenAI-compatible HTTP endpoint.
    OpenAi,
    /// Deterministic stub.
    Stub,
}

/// Build the configured provider, if any.
pub fn create_model(
    kind: ProviderKind,
    model_id: &str,
    dimensions: usize,
) -> kdd_core::embed::Result<Option<Arc<dyn EmbeddingModel>>> {
    match kind {
        ProviderKind::None => Ok(None),
        ProviderKind::OpenAi => Ok(Some(Arc::new(OpenAiCompatModel::from_env(
            model_id, dimensions,
        )?))),
        ProviderKind::Stub => Ok(Some(Arc::new(StubModel::new(model_id, dimensions)))),
    }
}
