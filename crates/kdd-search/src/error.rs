//! Error types for kdd-search
//!
//! Query failures carry a stable machine-readable code that the CLI and
//! event log surface verbatim (`NODE_NOT_FOUND`, `NO_EMBEDDINGS`, ...).

use thiserror::Error;

use kdd_core::EmbedError;

/// Errors that terminate a single query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("depth must be within {min}..={max}, got {got}")]
    InvalidDepth { got: usize, min: usize, max: usize },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("unknown edge type: {0}")]
    UnknownEdgeType(String),

    #[error("hints must not be empty")]
    EmptyHints,

    #[error("query text must be at least 3 characters")]
    QueryTooShort,

    #[error("index has no embeddings (level L1)")]
    NoEmbeddings,

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("query exceeded its hard deadline")]
    Timeout,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector index error: {0}")]
    Vector(String),
}

impl QueryError {
    /// Stable error code for events and API surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::NodeNotFound(_) => "NODE_NOT_FOUND",
            QueryError::InvalidDepth { .. } => "INVALID_DEPTH",
            QueryError::InvalidParams(_) => "INVALID_PARAMS",
            QueryError::UnknownEdgeType(_) => "UNKNOWN_EDGE_TYPE",
            QueryError::EmptyHints => "EMPTY_HINTS",
            QueryError::QueryTooShort => "QUERY_TOO_SHORT",
            QueryError::NoEmbeddings => "NO_EMBEDDINGS",
            QueryError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            QueryError::Timeout => "TIMEOUT",
            QueryError::Embedding(_) => "EMBEDDING_FAILED",
            QueryError::Vector(_) => "INDEX_UNAVAILABLE",
        }
    }
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(QueryError::NodeNotFound("x".into()).code(), "NODE_NOT_FOUND");
        assert_eq!(QueryError::EmptyHints.code(), "EMPTY_HINTS");
        assert_eq!(QueryError::NoEmbeddings.code(), "NO_EMBEDDINGS");
        assert_eq!(
            QueryError::InvalidDepth {
                got: 9,
                min: 1,
                max: 5
            }
            .code(),
            "INVALID_DEPTH"
        );
    }
}
