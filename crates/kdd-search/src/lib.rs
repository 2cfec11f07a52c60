//! KDD Search - Hybrid retrieval over KDD indexes
//!
//! The read side of the KDD engine:
//! - In-memory HNSW vector store over embedding artifacts
//! - Embedding providers (OpenAI-compatible HTTP, deterministic stub)
//! - The query engine: graph traversal, semantic similarity, hybrid fusion,
//!   impact analysis, coverage, layer violations, orphan edges, and context
//!   amplification

pub mod analysis;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod hybrid;
pub mod vector;

// Re-exports for convenience
pub use analysis::{
    CoverageCategory, CoverageReport, CoverageStatus, ImpactResult, ImpactedNode,
    LayerViolation, OrphanReport, ViolationReport,
};
pub use context::{ContextItem, ContextResult, MatchMethod, ResolvedEntity, DEFAULT_MAX_TOKENS};
pub use embeddings::{create_model, OpenAiCompatModel, ProviderKind, StubModel};
pub use engine::{
    kind_priority, GraphQueryResult, IndexSnapshot, QueryDeadlines, QueryEngine, QueryFilters,
    RelatedNode, SemanticHit, DEFAULT_MIN_SCORE,
};
pub use error::{QueryError, Result};
pub use hybrid::{HybridHit, HybridResult};
pub use vector::{VectorError, VectorStore};
