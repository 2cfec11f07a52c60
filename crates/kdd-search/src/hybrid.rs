//! Hybrid Retrieval
//!
//! The principal query: three sub-passes (semantic, lexical, graph
//! expansion) fused into one ranked, token-budgeted result set.
//!
//! Fusion weights are fixed: `0.6 · semantic + 0.3 · graph + 0.1 · lexical`,
//! plus a +0.05 bonus for nodes matched by more than one source, capped at
//! 1.0. Ordering is stable: fused score descending, then kind priority, then
//! node id. On an L1 index the semantic pass degrades to a warning and the
//! graph + lexical passes carry the result alone.

use std::collections::{BTreeMap, HashMap};

use kdd_core::graph::tokenize_query;
use kdd_core::{GraphNode, TraversalDirection, TraverseOptions};

use crate::engine::{
    estimate_tokens, kind_priority, truncate_chars, QueryEngine, QueryFilters, DEPTH_RANGE,
    SNIPPET_CHARS,
};
use crate::error::{QueryError, Result};

/// Fusion weights.
const SEMANTIC_WEIGHT: f32 = 0.6;
const GRAPH_WEIGHT: f32 = 0.3;
const LEXICAL_WEIGHT: f32 = 0.1;

/// Bonus when more than one sub-pass matched a node.
const MULTI_SOURCE_BONUS: f32 = 0.05;

/// Exact-phrase bonus inside the lexical score.
const PHRASE_BONUS: f32 = 0.5;

// ============================================================================
// Result types
// ============================================================================

/// One fused hit.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub node: GraphNode,
    /// Fused score in [0, 1].
    pub score: f32,
    /// `semantic`, `lexical`, `graph`, or `fusion` when several matched.
    pub match_source: String,
    /// Per-source raw scores.
    pub source_scores: BTreeMap<&'static str, f32>,
    pub snippet: String,
    pub estimated_tokens: usize,
}

/// Q-hybrid result.
#[derive(Debug, Clone, Default)]
pub struct HybridResult {
    pub hits: Vec<HybridHit>,
    pub total_tokens: usize,
    /// Soft degradations (`NO_EMBEDDINGS`, `TOKEN_LIMIT_EXCEEDED`).
    pub warnings: Vec<String>,
    pub partial: bool,
}

impl QueryEngine {
    /// Hybrid retrieval over semantic + lexical + graph expansion.
    pub fn hybrid(
        &self,
        query_text: &str,
        depth: usize,
        max_tokens: usize,
        filters: &QueryFilters,
    ) -> Result<HybridResult> {
        self.instrument(&format!("hybrid:{query_text}"), |clock| {
            filters.validate()?;
            if query_text.chars().count() < 3 {
                return Err(QueryError::QueryTooShort);
            }
            if !DEPTH_RANGE.contains(&depth) {
                return Err(QueryError::InvalidDepth {
                    got: depth,
                    min: *DEPTH_RANGE.start(),
                    max: *DEPTH_RANGE.end(),
                });
            }
            if max_tokens == 0 {
                return Err(QueryError::InvalidParams(
                    "max_tokens must be positive".to_string(),
                ));
            }

            let snapshot = self.snapshot();
            let mut warnings = Vec::new();

            // Pass 1: semantic. Soft-degrades on an L1 index.
            let mut semantic: HashMap<String, f32> = HashMap::new();
            match (&snapshot.vectors, self.model()) {
                (Some(vectors), Some(model)) => {
                    let query_vector = model.embed(query_text)?;
                    let pool = vectors
                        .search(&query_vector, filters.limit * 4, None)
                        .map_err(|e| QueryError::Vector(e.to_string()))?;
                    for (embedding_id, score) in pool {
                        if let Some(embedding) = snapshot.embeddings.get(&embedding_id) {
                            let node_id = embedding
                                .document_kind
                                .node_id(&embedding.document_id);
                            let best = semantic.entry(node_id).or_insert(0.0);
                            *best = best.max(score);
                        }
                    }
                }
                _ => warnings.push("NO_EMBEDDINGS".to_string()),
            }
            clock.check_hard()?;

            // Pass 2: lexical. Token-ratio scoring with an exact-phrase bonus.
            let tokens = tokenize_query(query_text);
            let mut lexical: HashMap<String, f32> = HashMap::new();
            if !tokens.is_empty() {
                let mut matched_counts: HashMap<String, usize> = HashMap::new();
                for token in &tokens {
                    for id in snapshot.graph.token_hits(token) {
                        *matched_counts.entry(id.to_string()).or_insert(0) += 1;
                    }
                }
                for (id, matched) in matched_counts {
                    let mut score = (matched as f32 / tokens.len() as f32) * 0.5;
                    if snapshot.graph.phrase_match(&id, query_text) {
                        score += PHRASE_BONUS;
                    }
                    lexical.insert(id, score.min(1.0));
                }
            }
            clock.check_hard()?;

            // Pass 3: graph expansion from every seed.
            let mut seeds: HashMap<String, f32> = HashMap::new();
            for (id, score) in semantic.iter().chain(lexical.iter()) {
                let best = seeds.entry(id.clone()).or_insert(0.0);
                *best = best.max(*score);
            }
            let mut graph_scores: HashMap<String, f32> = HashMap::new();
            for (seed, seed_score) in &seeds {
                let traversal = snapshot.graph.traverse(
                    seed,
                    &TraverseOptions {
                        depth,
                        direction: TraversalDirection::Both,
                        edge_types: None,
                        respect_layers: filters.respect_layers,
                    },
                );
                for reached in traversal.nodes {
                    let score = seed_score / (1.0 + reached.distance as f32);
                    let best = graph_scores.entry(reached.id).or_insert(0.0);
                    *best = best.max(score);
                }
            }
            clock.check_hard()?;

            // Fusion.
            let mut node_ids: Vec<String> = semantic
                .keys()
                .chain(lexical.keys())
                .chain(graph_scores.keys())
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            // Stable base order: id ascending; the sort below is by score.
            node_ids.sort();

            let min_score = filters.min_score.unwrap_or(0.0);
            let mut fused: Vec<HybridHit> = Vec::new();
            for node_id in node_ids {
                let Some(node) = snapshot.graph.get_node(&node_id) else {
                    continue;
                };
                if !filters.admits(node) {
                    continue;
                }
                let mut source_scores: BTreeMap<&'static str, f32> = BTreeMap::new();
                if let Some(s) = semantic.get(&node_id) {
                    source_scores.insert("semantic", *s);
                }
                if let Some(s) = graph_scores.get(&node_id) {
                    source_scores.insert("graph", *s);
                }
                if let Some(s) = lexical.get(&node_id) {
                    source_scores.insert("lexical", *s);
                }

                let mut score = SEMANTIC_WEIGHT * source_scores.get("semantic").copied().unwrap_or(0.0)
                    + GRAPH_WEIGHT * source_scores.get("graph").copied().unwrap_or(0.0)
                    + LEXICAL_WEIGHT * source_scores.get("lexical").copied().unwrap_or(0.0);
                if source_scores.len() > 1 {
                    score += MULTI_SOURCE_BONUS;
                }
                let score = score.min(1.0);
                if score < min_score {
                    continue;
                }

                let match_source = if source_scores.len() == 1 {
                    source_scores
                        .keys()
                        .next()
                        .copied()
                        .unwrap_or("fusion")
                        .to_string()
                } else {
                    "fusion".to_string()
                };
                let snippet = truncate_chars(&snippet_for(node), SNIPPET_CHARS);
                let estimated_tokens = estimate_tokens(snippet.chars().count());
                fused.push(HybridHit {
                    node: node.clone(),
                    score,
                    match_source,
                    source_scores,
                    snippet,
                    estimated_tokens,
                });
            }

            fused.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| kind_priority(a.node.kind).cmp(&kind_priority(b.node.kind)))
                    .then_with(|| a.node.id.cmp(&b.node.id))
            });

            // Token budget: stop before the hit that would overflow.
            let mut hits = Vec::new();
            let mut total_tokens = 0usize;
            let mut truncated = false;
            for hit in fused {
                if hits.len() == filters.limit {
                    break;
                }
                if total_tokens + hit.estimated_tokens > max_tokens {
                    truncated = true;
                    break;
                }
                total_tokens += hit.estimated_tokens;
                hits.push(hit);
            }
            if truncated {
                warnings.push("TOKEN_LIMIT_EXCEEDED".to_string());
            }

            let count = hits.len();
            Ok((
                HybridResult {
                    hits,
                    total_tokens,
                    warnings,
                    partial: clock.soft_expired(),
                },
                count,
            ))
        })
    }
}

/// The snippet shown for a node: its most descriptive indexed field.
fn snippet_for(node: &GraphNode) -> String {
    for key in ["description", "declaration", "purpose", "summary", "context"] {
        if let Some(text) = node.field_str(key) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    node.id.clone()
}
