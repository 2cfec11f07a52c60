//! Context Amplification
//!
//! Three-phase operator turning a set of loose hints (node ids, file paths,
//! keywords) into a token-budgeted bundle of constraints and behavior for an
//! AI agent:
//!
//! 1. *Resolution* - each hint becomes zero or more nodes (exact id, path
//!    basename with kind-prefix trials, keyword search).
//! 2. *Discovery* - neighbors of every resolved node up to `depth` hops;
//!    first (shortest) discovery wins.
//! 3. *Extraction + prioritization* - a per-kind content field, truncated,
//!    tiered (constraints, invariants, behavior, other), distance-sorted
//!    within each tier, accumulated under the token budget.

use std::collections::HashMap;

use serde::Serialize;

use kdd_core::{GraphNode, Kind, TraversalDirection, TraverseOptions, ALL_KINDS};

use crate::engine::{
    estimate_tokens, kind_priority, truncate_chars, QueryEngine, DEPTH_RANGE,
};
use crate::error::{QueryError, Result};

/// Default token budget for one context bundle.
pub const DEFAULT_MAX_TOKENS: usize = 4000;

/// Extracted content is capped at this many characters.
const MAX_CONTENT_CHARS: usize = 300;

// ============================================================================
// Result types
// ============================================================================

/// How a hint resolved to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Basename,
    TextSearch,
}

/// One resolved hint.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEntity {
    pub node_id: String,
    /// The hint that produced this resolution.
    pub matched_from: String,
    pub match_method: MatchMethod,
}

/// One context item handed to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub node_id: String,
    pub kind: Kind,
    /// Extracted content, truncated to 300 chars.
    pub content: String,
    pub source_file: String,
    /// The resolved node this item was discovered from.
    pub reached_via: String,
    pub distance: usize,
    pub estimated_tokens: usize,
}

/// Q-context result.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ContextResult {
    pub resolved: Vec<ResolvedEntity>,
    /// Priority tiers 0-1: rules, policies, entity invariants.
    pub constraints: Vec<ContextItem>,
    /// Priority tiers 2-3: commands, use cases, requirements, the rest.
    pub behavior: Vec<ContextItem>,
    pub total_tokens: usize,
    /// One warning per hint that resolved to nothing, plus
    /// `TOKEN_LIMIT_EXCEEDED` when the budget truncated the item list.
    pub warnings: Vec<String>,
    pub partial: bool,
}

// ============================================================================
// Engine
// ============================================================================

impl QueryEngine {
    /// Amplify a set of hints into constraints + behavior context.
    pub fn context(
        &self,
        hints: &[String],
        depth: usize,
        max_tokens: usize,
    ) -> Result<ContextResult> {
        self.instrument(&format!("context:{}", hints.join(",")), |clock| {
            if hints.iter().all(|h| h.trim().is_empty()) {
                return Err(QueryError::EmptyHints);
            }
            if !DEPTH_RANGE.contains(&depth) {
                return Err(QueryError::InvalidDepth {
                    got: depth,
                    min: *DEPTH_RANGE.start(),
                    max: *DEPTH_RANGE.end(),
                });
            }

            let snapshot = self.snapshot();
            let mut warnings = Vec::new();

            // Phase 1: resolution.
            let mut resolved: Vec<ResolvedEntity> = Vec::new();
            for hint in hints {
                let hint = hint.trim();
                if hint.is_empty() {
                    continue;
                }
                let matches = resolve_hint(&snapshot.graph, hint);
                if matches.is_empty() {
                    warnings.push(format!("hint '{hint}' resolved to no node"));
                    continue;
                }
                for (node_id, method) in matches {
                    if resolved.iter().any(|r| r.node_id == node_id) {
                        continue;
                    }
                    resolved.push(ResolvedEntity {
                        node_id,
                        matched_from: hint.to_string(),
                        match_method: method,
                    });
                }
            }
            clock.check_hard()?;

            // Phase 2: discovery. Shortest discovery wins.
            struct Discovered {
                distance: usize,
                reached_via: String,
            }
            let mut discovered: HashMap<String, Discovered> = HashMap::new();
            let mut order: Vec<String> = Vec::new();
            for entity in &resolved {
                if !discovered.contains_key(&entity.node_id) {
                    discovered.insert(
                        entity.node_id.clone(),
                        Discovered {
                            distance: 0,
                            reached_via: entity.node_id.clone(),
                        },
                    );
                    order.push(entity.node_id.clone());
                }
                let traversal = snapshot.graph.traverse(
                    &entity.node_id,
                    &TraverseOptions {
                        depth,
                        direction: TraversalDirection::Both,
                        edge_types: None,
                        respect_layers: false,
                    },
                );
                for reached in traversal.nodes {
                    let entry = discovered.entry(reached.id.clone());
                    match entry {
                        std::collections::hash_map::Entry::Occupied(mut slot) => {
                            if reached.distance < slot.get().distance {
                                slot.insert(Discovered {
                                    distance: reached.distance,
                                    reached_via: entity.node_id.clone(),
                                });
                            }
                        }
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            slot.insert(Discovered {
                                distance: reached.distance,
                                reached_via: entity.node_id.clone(),
                            });
                            order.push(reached.id);
                        }
                    }
                }
            }
            clock.check_hard()?;

            // Phase 3: extraction + prioritization.
            let mut items: Vec<(u8, ContextItem)> = Vec::new();
            for node_id in order {
                let Some(node) = snapshot.graph.get_node(&node_id) else {
                    continue;
                };
                let info = &discovered[&node_id];
                let content = truncate_chars(&content_for(node), MAX_CONTENT_CHARS);
                let chars = node.id.chars().count()
                    + node.kind.as_str().chars().count()
                    + content.chars().count()
                    + node.source_file.chars().count()
                    + info.reached_via.chars().count();
                items.push((
                    kind_priority(node.kind),
                    ContextItem {
                        node_id: node.id.clone(),
                        kind: node.kind,
                        content,
                        source_file: node.source_file.clone(),
                        reached_via: info.reached_via.clone(),
                        distance: info.distance,
                        estimated_tokens: estimate_tokens(chars),
                    },
                ));
            }
            items.sort_by(|a, b| {
                a.0.cmp(&b.0)
                    .then_with(|| a.1.distance.cmp(&b.1.distance))
                    .then_with(|| a.1.node_id.cmp(&b.1.node_id))
            });

            let mut constraints = Vec::new();
            let mut behavior = Vec::new();
            let mut total_tokens = 0usize;
            let mut truncated = false;
            for (priority, item) in items {
                if total_tokens + item.estimated_tokens > max_tokens {
                    truncated = true;
                    break;
                }
                total_tokens += item.estimated_tokens;
                if priority <= 1 {
                    constraints.push(item);
                } else {
                    behavior.push(item);
                }
            }
            if truncated {
                warnings.push("TOKEN_LIMIT_EXCEEDED".to_string());
            }

            let count = constraints.len() + behavior.len();
            Ok((
                ContextResult {
                    resolved,
                    constraints,
                    behavior,
                    total_tokens,
                    warnings,
                    partial: clock.soft_expired(),
                },
                count,
            ))
        })
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve one hint to node ids with the method that matched.
fn resolve_hint(
    graph: &kdd_core::GraphStore,
    hint: &str,
) -> Vec<(String, MatchMethod)> {
    // (a) exact node id.
    if hint.contains(':') {
        if graph.has_node(hint) {
            return vec![(hint.to_string(), MatchMethod::Exact)];
        }
        return Vec::new();
    }

    // (b) file path: derive the basename and try kind prefixes against the
    // original and Capitalized spellings.
    if hint.contains('/') || hint.contains('.') {
        let basename = basename_of(hint);
        for candidate in spelling_variants(&basename) {
            for kind in ALL_KINDS {
                let id = kind.node_id(&candidate);
                if graph.has_node(&id) {
                    return vec![(id, MatchMethod::Basename)];
                }
            }
        }
        return Vec::new();
    }

    // (c) keyword: prefix trials first, then lexical search.
    for candidate in spelling_variants(hint) {
        for kind in ALL_KINDS {
            let id = kind.node_id(&candidate);
            if graph.has_node(&id) {
                return vec![(id, MatchMethod::Exact)];
            }
        }
    }
    graph
        .text_search(hint)
        .into_iter()
        .map(|n| (n.id.clone(), MatchMethod::TextSearch))
        .collect()
}

/// Strip directories and every extension from a path-ish hint.
fn basename_of(hint: &str) -> String {
    let name = hint.rsplit(['/', '\\']).next().unwrap_or(hint);
    name.split('.').next().unwrap_or(name).to_string()
}

/// The hint as written plus its Capitalized form.
fn spelling_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string()];
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        let capitalized: String = first.to_uppercase().chain(chars).collect();
        if capitalized != name {
            variants.push(capitalized);
        }
    }
    variants
}

// ============================================================================
// Extraction
// ============================================================================

/// The per-kind content field shown in a context item.
fn content_for(node: &GraphNode) -> String {
    let first_of = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|k| node.field_str(k))
            .find(|t| !t.is_empty())
            .map(str::to_string)
    };
    let picked = match node.kind {
        Kind::BusinessRule | Kind::BusinessPolicy | Kind::CrossPolicy => {
            first_of(&["declaration"])
        }
        Kind::Entity => first_of(&["invariants", "description"]),
        Kind::Command => first_of(&["preconditions", "postconditions"]),
        Kind::UseCase => first_of(&["description", "preconditions"]),
        Kind::Requirement => first_of(&["description"]),
        _ => first_of(&["description", "purpose"]),
    };
    picked.unwrap_or_else(|| node.id.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_of() {
        assert_eq!(basename_of("src/entities/pedido.ts"), "pedido");
        assert_eq!(basename_of("pedido.ts"), "pedido");
        assert_eq!(basename_of("Pedido.entity.ts"), "Pedido");
    }

    #[test]
    fn test_spelling_variants() {
        assert_eq!(
            spelling_variants("pedido"),
            vec!["pedido".to_string(), "Pedido".to_string()]
        );
        assert_eq!(spelling_variants("Pedido"), vec!["Pedido".to_string()]);
    }
}
