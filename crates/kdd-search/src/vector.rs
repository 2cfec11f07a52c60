//! In-Memory Vector Store
//!
//! HNSW index over cosine similarity, backed by USearch. Embedding ids are
//! strings; the store keeps the string↔u64 key maps and per-id kind metadata
//! for post-filtering. Scores are mapped from cosine distance into [0, 1].
//!
//! ANN order at equal scores is not guaranteed by the backend; search results
//! are therefore re-sorted by (score desc, id asc) so callers see a stable
//! ordering.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use kdd_core::{Embedding, Kind};

/// HNSW connectivity parameter (higher = better recall, more memory).
const DEFAULT_CONNECTIVITY: usize = 16;

/// Expansion factor while building the index.
const DEFAULT_EXPANSION_ADD: usize = 128;

/// Expansion factor while searching (higher = better recall, slower).
const DEFAULT_EXPANSION_SEARCH: usize = 64;

// ============================================================================
// Errors
// ============================================================================

/// Vector store failures.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector index creation failed: {0}")]
    Creation(String),

    #[error("failed to add vector: {0}")]
    Add(String),

    #[error("vector search failed: {0}")]
    Search(String),

    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

/// Result type for vector store operations.
pub type Result<T> = std::result::Result<T, VectorError>;

// ============================================================================
// Store
// ============================================================================

/// Per-id metadata needed by search hydration and filtering.
#[derive(Debug, Clone)]
struct VectorMeta {
    key: u64,
    document_id: String,
    document_kind: Kind,
}

/// In-memory ANN index over equal-dimension embeddings.
pub struct VectorStore {
    index: Index,
    dimensions: usize,
    by_id: HashMap<String, VectorMeta>,
    by_key: HashMap<u64, String>,
    next_key: u64,
}

impl VectorStore {
    pub fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| VectorError::Creation(e.to_string()))?;
        Ok(Self {
            index,
            dimensions,
            by_id: HashMap::new(),
            by_key: HashMap::new(),
            next_key: 0,
        })
    }

    /// One-shot build from a batch of embeddings of identical length.
    pub fn build(embeddings: &[Embedding]) -> Result<Self> {
        let dimensions = embeddings.first().map(|e| e.dimensions).unwrap_or(0);
        let mut store = Self::new(dimensions.max(1))?;
        store.reserve(embeddings.len().max(16))?;
        for embedding in embeddings {
            store.add(embedding)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn reserve(&self, capacity: usize) -> Result<()> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorError::Creation(format!("failed to reserve capacity: {e}")))
    }

    /// Insert or replace one embedding.
    pub fn add(&mut self, embedding: &Embedding) -> Result<()> {
        if embedding.vector.len() != self.dimensions {
            return Err(VectorError::InvalidDimensions {
                expected: self.dimensions,
                got: embedding.vector.len(),
            });
        }
        if let Some(meta) = self.by_id.get(&embedding.id) {
            let key = meta.key;
            self.index
                .remove(key)
                .map_err(|e| VectorError::Add(e.to_string()))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(key, &embedding.vector)
                .map_err(|e| VectorError::Add(e.to_string()))?;
            return Ok(());
        }

        // USearch needs reserved capacity ahead of every add.
        if self.index.size() >= self.index.capacity() {
            let capacity = (self.index.capacity() * 2).max(16);
            self.reserve(capacity)?;
        }

        let key = self.next_key;
        self.next_key += 1;
        self.index
            .add(key, &embedding.vector)
            .map_err(|e| VectorError::Add(e.to_string()))?;
        self.by_id.insert(
            embedding.id.clone(),
            VectorMeta {
                key,
                document_id: embedding.document_id.clone(),
                document_kind: embedding.document_kind,
            },
        );
        self.by_key.insert(key, embedding.id.clone());
        Ok(())
    }

    /// Remove one embedding by id. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let Some(meta) = self.by_id.remove(id) else {
            return Ok(false);
        };
        self.by_key.remove(&meta.key);
        self.index
            .remove(meta.key)
            .map_err(|e| VectorError::Add(e.to_string()))?;
        Ok(true)
    }

    /// Remove every embedding of one document.
    pub fn remove_document(&mut self, document_id: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .by_id
            .iter()
            .filter(|(_, meta)| meta.document_id == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.remove(&id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Nearest neighbors of a query vector: up to `top_k`
    /// `(embedding_id, score ∈ [0, 1])` pairs, score descending, ties broken
    /// by id. `kinds` post-filters by the owning document's kind.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        kinds: Option<&[Kind]>,
    ) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dimensions {
            return Err(VectorError::InvalidDimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch when a kind filter will discard candidates.
        let fetch = match kinds {
            Some(_) => (top_k * 4).min(self.len()),
            None => top_k.min(self.len()),
        };
        let matches = self
            .index
            .search(query, fetch)
            .map_err(|e| VectorError::Search(e.to_string()))?;

        let mut hits: Vec<(String, f32)> = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(id) = self.by_key.get(key) else {
                continue;
            };
            if let Some(kinds) = kinds {
                let meta = &self.by_id[id];
                if !kinds.contains(&meta.document_kind) {
                    continue;
                }
            }
            // Cosine distance in [0, 2] -> similarity clamped into [0, 1].
            let score = (1.0 - distance).clamp(0.0, 1.0);
            hits.push((id.clone(), score));
        }
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// The document id owning an embedding id.
    pub fn document_of(&self, embedding_id: &str) -> Option<(&str, Kind)> {
        self.by_id
            .get(embedding_id)
            .map(|m| (m.document_id.as_str(), m.document_kind))
    }
}

// ============================================================================
// Tests
// ============================================================================
