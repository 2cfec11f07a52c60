//! Query Engine
//!
//! Read side of the KDD engine. Loads an artifact root into an immutable
//! snapshot (graph store + vector store + manifest) and answers the query
//! primitives over it. Incremental rebuilds swap in a fresh snapshot by
//! pointer exchange; readers in flight keep the old one.
//!
//! Every query validates its input, emits `Query-Received`, and finishes
//! with `Query-Completed` or `Query-Failed` carrying the error code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use kdd_core::{
    load_index, ArtifactStore, EdgeType, Embedding, EmbeddingModel, EventBus, EventKind,
    GraphEdge, GraphNode, GraphStore, IndexLevel, IndexManifest, Kind, Layer,
    TraversalDirection, TraverseOptions,
};

use crate::error::{QueryError, Result};
use crate::vector::VectorStore;

/// Graph-shaped queries accept depths in this range.
pub const DEPTH_RANGE: std::ops::RangeInclusive<usize> = 1..=5;

/// Default semantic similarity floor.
pub const DEFAULT_MIN_SCORE: f32 = 0.7;

/// Snippets are capped at this many characters.
pub const SNIPPET_CHARS: usize = 200;

// ============================================================================
// Filters + deadlines
// ============================================================================

/// Filters shared by every query.
#[derive(Debug, Clone)]
pub struct QueryFilters {
    pub include_kinds: Option<Vec<Kind>>,
    pub include_layers: Option<Vec<Layer>>,
    /// Exclude results only reachable through layer-violating edges.
    pub respect_layers: bool,
    /// Result cap, 1..=100.
    pub limit: usize,
    /// Minimum score; queries apply their own default when unset.
    pub min_score: Option<f32>,
}

impl Default for QueryFilters {
    fn default() -> Self {
        Self {
            include_kinds: None,
            include_layers: None,
            respect_layers: false,
            limit: 10,
            min_score: None,
        }
    }
}

impl QueryFilters {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.limit) {
            return Err(QueryError::InvalidParams(format!(
                "limit must be within 1..=100, got {}",
                self.limit
            )));
        }
        if let Some(score) = self.min_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(QueryError::InvalidParams(format!(
                    "min_score must be within 0..=1, got {score}"
                )));
            }
        }
        Ok(())
    }

    /// Whether a node passes the kind/layer filters.
    pub fn admits(&self, node: &GraphNode) -> bool {
        if let Some(kinds) = &self.include_kinds {
            if !kinds.contains(&node.kind) {
                return false;
            }
        }
        if let Some(layers) = &self.include_layers {
            if !layers.contains(&node.layer) {
                return false;
            }
        }
        true
    }
}

/// Soft/hard query deadlines.
#[derive(Debug, Clone, Copy)]
pub struct QueryDeadlines {
    /// Past this, the query returns what it has with `partial = true`.
    pub soft: Duration,
    /// Past this, the query aborts with `TIMEOUT`.
    pub hard: Duration,
}

impl Default for QueryDeadlines {
    fn default() -> Self {
        Self {
            soft: Duration::from_millis(300),
            hard: Duration::from_secs(2),
        }
    }
}

/// Per-query clock checked at phase boundaries.
pub(crate) struct QueryClock {
    started: Instant,
    deadlines: QueryDeadlines,
}

impl QueryClock {
    fn new(deadlines: QueryDeadlines) -> Self {
        Self {
            started: Instant::now(),
            deadlines,
        }
    }

    pub(crate) fn soft_expired(&self) -> bool {
        self.started.elapsed() > self.deadlines.soft
    }

    pub(crate) fn check_hard(&self) -> Result<()> {
        if self.started.elapsed() > self.deadlines.hard {
            Err(QueryError::Timeout)
        } else {
            Ok(())
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable view over one loaded index.
pub struct IndexSnapshot {
    pub manifest: IndexManifest,
    pub graph: GraphStore,
    /// Present iff the index carries embeddings.
    pub vectors: Option<VectorStore>,
    /// Embedding id -> record, for hit hydration.
    pub embeddings: HashMap<String, Embedding>,
}

impl IndexSnapshot {
    /// Load an artifact root whole. The vector store is built only when the
    /// manifest says L2+ and embeddings exist.
    pub fn open(store: &ArtifactStore) -> Result<Self> {
        let loaded =
            load_index(store).map_err(|e| QueryError::IndexUnavailable(e.to_string()))?;
        let vectors = if loaded.manifest.index_level >= IndexLevel::L2
            && !loaded.embeddings.is_empty()
        {
            Some(
                VectorStore::build(&loaded.embeddings)
                    .map_err(|e| QueryError::Vector(e.to_string()))?,
            )
        } else {
            None
        };
        let embeddings = loaded
            .embeddings
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        Ok(Self {
            manifest: loaded.manifest,
            graph: loaded.graph,
            vectors,
            embeddings,
        })
    }

    /// Node owning an embedding, via `{KindPrefix}:{document_id}`.
    pub fn node_of_embedding(&self, embedding: &Embedding) -> Option<&GraphNode> {
        self.graph
            .get_node(&embedding.document_kind.node_id(&embedding.document_id))
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Multi-reader query engine over swap-in snapshots.
pub struct QueryEngine {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    bus: Arc<EventBus>,
    model: Option<Arc<dyn EmbeddingModel>>,
    deadlines: QueryDeadlines,
}

impl QueryEngine {
    pub fn open(
        store: &ArtifactStore,
        bus: Arc<EventBus>,
        model: Option<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self> {
        let snapshot = IndexSnapshot::open(store)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            bus,
            model,
            deadlines: QueryDeadlines::default(),
        })
    }

    pub fn with_deadlines(mut self, deadlines: QueryDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Swap in a freshly loaded snapshot; readers in flight keep the old one.
    pub fn reload(&self, store: &ArtifactStore) -> Result<()> {
        let fresh = Arc::new(IndexSnapshot::open(store)?);
        *self.snapshot.write() = fresh;
        Ok(())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    pub(crate) fn model(&self) -> Option<&Arc<dyn EmbeddingModel>> {
        self.model.as_ref()
    }

    /// Run one query with events and the deadline clock.
    pub(crate) fn instrument<T>(
        &self,
        query: &str,
        body: impl FnOnce(&QueryClock) -> Result<(T, usize)>,
    ) -> Result<T> {
        self.bus.emit(EventKind::QueryReceived {
            query: query.to_string(),
        });
        let clock = QueryClock::new(self.deadlines);
        match body(&clock) {
            Ok((value, results)) => {
                self.bus.emit(EventKind::QueryCompleted {
                    query: query.to_string(),
                    results,
                    duration_ms: clock.elapsed_ms(),
                });
                Ok(value)
            }
            Err(e) => {
                warn!(query, code = e.code(), "query failed");
                self.bus.emit(EventKind::QueryFailed {
                    query: query.to_string(),
                    code: e.code().to_string(),
                });
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Q-graph
    // ------------------------------------------------------------------------

    /// Graph traversal from a root node.
    pub fn graph(
        &self,
        root: &str,
        depth: usize,
        edge_types: Option<&[String]>,
        filters: &QueryFilters,
    ) -> Result<GraphQueryResult> {
        self.instrument(&format!("graph:{root}"), |clock| {
            filters.validate()?;
            if !DEPTH_RANGE.contains(&depth) {
                return Err(QueryError::InvalidDepth {
                    got: depth,
                    min: *DEPTH_RANGE.start(),
                    max: *DEPTH_RANGE.end(),
                });
            }
            let parsed_types = parse_edge_types(edge_types)?;

            let snapshot = self.snapshot();
            let center = snapshot
                .graph
                .get_node(root)
                .ok_or_else(|| QueryError::NodeNotFound(root.to_string()))?
                .clone();

            let traversal = snapshot.graph.traverse(
                root,
                &TraverseOptions {
                    depth,
                    direction: TraversalDirection::Both,
                    edge_types: parsed_types,
                    respect_layers: filters.respect_layers,
                },
            );
            clock.check_hard()?;

            let related: Vec<RelatedNode> = traversal
                .nodes
                .iter()
                .filter_map(|reached| {
                    let node = snapshot.graph.get_node(&reached.id)?;
                    filters.admits(node).then(|| RelatedNode {
                        node: node.clone(),
                        distance: reached.distance,
                    })
                })
                .take(filters.limit)
                .collect();

            let count = related.len();
            Ok((
                GraphQueryResult {
                    center,
                    related,
                    edges: traversal.edges,
                    partial: clock.soft_expired(),
                },
                count,
            ))
        })
    }

    // ------------------------------------------------------------------------
    // Q-semantic
    // ------------------------------------------------------------------------

    /// Vector similarity search. Hard-fails with `NO_EMBEDDINGS` on an L1
    /// index.
    pub fn semantic(&self, query_text: &str, filters: &QueryFilters) -> Result<Vec<SemanticHit>> {
        self.instrument(&format!("semantic:{query_text}"), |clock| {
            filters.validate()?;
            if query_text.chars().count() < 3 {
                return Err(QueryError::QueryTooShort);
            }
            let snapshot = self.snapshot();
            let (Some(vectors), Some(model)) = (&snapshot.vectors, self.model()) else {
                return Err(QueryError::NoEmbeddings);
            };
            let min_score = filters.min_score.unwrap_or(DEFAULT_MIN_SCORE);

            let query_vector = model.embed(query_text)?;
            clock.check_hard()?;
            let pool = vectors
                .search(
                    &query_vector,
                    filters.limit * 4,
                    filters.include_kinds.as_deref(),
                )
                .map_err(|e| QueryError::Vector(e.to_string()))?;
            clock.check_hard()?;

            let mut hits = Vec::new();
            for (embedding_id, score) in pool {
                if score < min_score {
                    continue;
                }
                let Some(embedding) = snapshot.embeddings.get(&embedding_id) else {
                    continue;
                };
                let Some(node) = snapshot.node_of_embedding(embedding) else {
                    continue;
                };
                if !filters.admits(node) {
                    continue;
                }
                hits.push(SemanticHit {
                    node: node.clone(),
                    section_path: embedding.section_path.clone(),
                    snippet: truncate_chars(&embedding.raw_text, SNIPPET_CHARS),
                    raw_text: embedding.raw_text.clone(),
                    score,
                });
                if hits.len() == filters.limit {
                    break;
                }
            }
            let count = hits.len();
            Ok((hits, count))
        })
    }
}

// ============================================================================
// Result types
// ============================================================================

/// A node reached by Q-graph.
#[derive(Debug, Clone)]
pub struct RelatedNode {
    pub node: GraphNode,
    pub distance: usize,
}

/// Q-graph result.
#[derive(Debug, Clone)]
pub struct GraphQueryResult {
    pub center: GraphNode,
    pub related: Vec<RelatedNode>,
    pub edges: Vec<GraphEdge>,
    pub partial: bool,
}

/// One Q-semantic hit.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub node: GraphNode,
    pub section_path: String,
    pub snippet: String,
    pub raw_text: String,
    pub score: f32,
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse edge type strings, rejecting anything outside the grammar.
pub(crate) fn parse_edge_types(types: Option<&[String]>) -> Result<Option<Vec<EdgeType>>> {
    let Some(types) = types else {
        return Ok(None);
    };
    if types.is_empty() {
        return Ok(None);
    }
    let mut parsed = Vec::with_capacity(types.len());
    for value in types {
        parsed.push(
            EdgeType::parse(value).ok_or_else(|| QueryError::UnknownEdgeType(value.clone()))?,
        );
    }
    Ok(Some(parsed))
}

/// Truncate on a char boundary, appending an ellipsis when cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

/// Tier used for ranking ties and context prioritization: constraints first,
/// then entity invariants, then behavior, then the rest.
pub fn kind_priority(kind: Kind) -> u8 {
    match kind {
        Kind::BusinessRule | Kind::BusinessPolicy | Kind::CrossPolicy => 0,
        Kind::Entity => 1,
        Kind::Command | Kind::UseCase | Kind::Requirement => 2,
        _ => 3,
    }
}

/// Estimated token footprint of a text: `ceil(chars / 4)`.
pub(crate) fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_validation() {
        let mut filters = QueryFilters::default();
        assert!(filters.validate().is_ok());
        filters.limit = 0;
        assert!(filters.validate().is_err());
        filters.limit = 101;
        assert!(filters.validate().is_err());
        filters.limit = 100;
        filters.min_score = Some(1.5);
        assert!(filters.validate().is_err());
    }

    #[test]
    fn test_parse_edge_types() {
        let types = vec!["EMITS".to_string(), "pertenece_a".to_string()];
        let parsed = parse_edge_types(Some(&types)).unwrap().unwrap();
        assert_eq!(parsed.len(), 2);

        let bad = vec!["NOT_A_TYPE".to_string()];
        assert!(matches!(
            parse_edge_types(Some(&bad)),
            Err(QueryError::UnknownEdgeType(_))
        ));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("corto", 10), "corto");
        let long = "x".repeat(20);
        let cut = truncate_chars(&long, 10);
        assert_eq!(cut.chars().count(), 11);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_kind_priority_tiers() {
        assert_eq!(kind_priority(Kind::BusinessRule), 0);
        assert_eq!(kind_priority(Kind::Entity), 1);
        assert_eq!(kind_priority(Kind::UseCase), 2);
        assert_eq!(kind_priority(Kind::Event), 3);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }
}
