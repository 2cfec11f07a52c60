//! Embedding Model Abstraction
//!
//! The engine never talks to a model directly: it consumes an
//! [`EmbeddingModel`] that maps text to a fixed-dimension vector. Providers
//! (remote HTTP, deterministic stub) live in the search crate; the contract
//! here is that `embed` is pure per input so two producers generate
//! byte-identical artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Kind;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by an embedding provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The provider returned a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider call failed or timed out.
    #[error("embedding generation failed: {0}")]
    Generation(String),

    /// The provider is not configured (missing API key, ...).
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

// ============================================================================
// Model trait
// ============================================================================

/// Abstract embedding model: text in, fixed-dimension vector out.
///
/// Implementations must be pure (deterministic per input) and `Send + Sync`
/// so ingestion workers can share one instance.
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier persisted into the manifest (e.g.
    /// `nomic-embed-text-v1.5`).
    fn model_id(&self) -> &str;

    /// Output vector length.
    fn dimensions(&self) -> usize;

    /// Embed one text. The returned vector must have `dimensions()` entries.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// Embedding record
// ============================================================================

/// A persisted embedding for one chunk of one document section.
///
/// Identity: `{document_id}:{section_path}:{chunk_index}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub document_id: String,
    pub document_kind: Kind,
    /// Dotted section path (`Pedido.Descripción`).
    pub section_path: String,
    /// 0-based within the section.
    pub chunk_index: usize,
    /// The chunk text as authored.
    pub raw_text: String,
    /// Identity line + ancestor summaries + raw text; the embedded input.
    pub context_text: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
    /// SHA-256 of `context_text`; regeneration is skipped while it matches.
    pub text_hash: String,
    pub generated_at: DateTime<Utc>,
}

impl Embedding {
    /// Build the identity for a chunk.
    pub fn make_id(document_id: &str, section_path: &str, chunk_index: usize) -> String {
        format!("{document_id}:{section_path}:{chunk_index}")
    }
}
