//! Graph Analysis Queries
//!
//! Impact analysis (who depends on a node), coverage scoring against the
//! per-kind category tables, layer-violation reporting, and orphan-edge
//! reporting.

use std::collections::BTreeSet;

use serde::Serialize;

use kdd_core::{
    EdgeType, GraphEdge, Kind, Layer, OrphanEdge, StructuralEdge, TraversalDirection,
    TraverseOptions,
};

use crate::engine::{parse_edge_types, QueryEngine, QueryFilters, DEPTH_RANGE};
use crate::error::{QueryError, Result};

// ============================================================================
// Q-impact
// ============================================================================

/// A node affected by a change, with the dependency path that reached it.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactedNode {
    pub node_id: String,
    pub kind: Kind,
    pub distance: usize,
    /// Ids from the changed node to this one.
    pub path: Vec<String>,
}

/// Q-impact result.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactResult {
    pub node_id: String,
    /// Dependents at distance 1.
    pub direct: Vec<ImpactedNode>,
    /// Dependents at distance > 1.
    pub transitive: Vec<ImpactedNode>,
    /// Validating nodes (BDD coverage) reached via VALIDATES edges into any
    /// affected node.
    pub validated_by: Vec<String>,
    pub partial: bool,
}

impl QueryEngine {
    /// Who depends on this node: incoming-edge traversal up to `depth`.
    pub fn impact(&self, node_id: &str, depth: usize) -> Result<ImpactResult> {
        self.instrument(&format!("impact:{node_id}"), |clock| {
            if !DEPTH_RANGE.contains(&depth) {
                return Err(QueryError::InvalidDepth {
                    got: depth,
                    min: *DEPTH_RANGE.start(),
                    max: *DEPTH_RANGE.end(),
                });
            }
            let snapshot = self.snapshot();
            if !snapshot.graph.has_node(node_id) {
                return Err(QueryError::NodeNotFound(node_id.to_string()));
            }

            let traversal = snapshot.graph.traverse(
                node_id,
                &TraverseOptions {
                    depth,
                    direction: TraversalDirection::Incoming,
                    edge_types: None,
                    respect_layers: false,
                },
            );
            clock.check_hard()?;

            let mut direct = Vec::new();
            let mut transitive = Vec::new();
            for reached in &traversal.nodes {
                let Some(node) = snapshot.graph.get_node(&reached.id) else {
                    continue;
                };
                let impacted = ImpactedNode {
                    node_id: reached.id.clone(),
                    kind: node.kind,
                    distance: reached.distance,
                    path: reached.path.clone(),
                };
                if reached.distance == 1 {
                    direct.push(impacted);
                } else {
                    transitive.push(impacted);
                }
            }

            // BDD scenarios: VALIDATES edges pointing at any affected node.
            let mut validated_by: BTreeSet<String> = BTreeSet::new();
            let affected: Vec<&str> = std::iter::once(node_id)
                .chain(traversal.nodes.iter().map(|n| n.id.as_str()))
                .collect();
            let validates = [EdgeType::Structural(StructuralEdge::Validates)];
            for id in affected {
                for edge in snapshot.graph.incoming_edges(id, Some(&validates)) {
                    validated_by.insert(edge.from_node.clone());
                }
            }

            let count = direct.len() + transitive.len();
            Ok((
                ImpactResult {
                    node_id: node_id.to_string(),
                    direct,
                    transitive,
                    validated_by: validated_by.into_iter().collect(),
                    partial: clock.soft_expired(),
                },
                count,
            ))
        })
    }
}

// ============================================================================
// Q-coverage
// ============================================================================

/// Coverage status of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Covered,
    Partial,
    Missing,
}

/// One category line of a coverage report.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageCategory {
    pub name: &'static str,
    pub status: CoverageStatus,
    /// Node ids satisfying the category, id-sorted.
    pub found: Vec<String>,
}

/// Q-coverage result.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub node_id: String,
    pub kind: Kind,
    pub categories: Vec<CoverageCategory>,
    /// `covered / total × 100`.
    pub coverage_percent: f64,
}

/// Which adjacency a category inspects.
#[derive(Clone, Copy)]
enum Side {
    Outgoing,
    Incoming,
}

/// One expected-relationship category: a dedicated edge type satisfies it
/// fully; a plain wiki-link from/to the expected kind satisfies it partially.
struct CategorySpec {
    name: &'static str,
    side: Side,
    edge: StructuralEdge,
    /// Counterpart kind a WIKI_LINK fallback must involve, when any.
    fallback_kind: Option<Kind>,
}

fn categories_for(kind: Kind) -> Vec<CategorySpec> {
    match kind {
        Kind::Entity => vec![
            CategorySpec {
                name: "emits_event",
                side: Side::Outgoing,
                edge: StructuralEdge::Emits,
                fallback_kind: Some(Kind::Event),
            },
            CategorySpec {
                name: "has_business_rule",
                side: Side::Incoming,
                edge: StructuralEdge::EntityRule,
                fallback_kind: Some(Kind::BusinessRule),
            },
            CategorySpec {
                name: "referenced_by_use_case",
                side: Side::Incoming,
                edge: StructuralEdge::WikiLink,
                fallback_kind: Some(Kind::UseCase),
            },
            CategorySpec {
                name: "traced_from_requirement",
                side: Side::Incoming,
                edge: StructuralEdge::ReqTracesTo,
                fallback_kind: Some(Kind::Requirement),
            },
        ],
        Kind::Event => vec![
            CategorySpec {
                name: "emitted_by",
                side: Side::Incoming,
                edge: StructuralEdge::Emits,
                fallback_kind: None,
            },
            CategorySpec {
                name: "consumed_by",
                side: Side::Incoming,
                edge: StructuralEdge::Consumes,
                fallback_kind: None,
            },
        ],
        Kind::BusinessRule | Kind::BusinessPolicy | Kind::CrossPolicy => vec![
            CategorySpec {
                name: "applies_to_entity",
                side: Side::Outgoing,
                edge: if kind == Kind::BusinessRule {
                    StructuralEdge::EntityRule
                } else {
                    StructuralEdge::EntityPolicy
                },
                fallback_kind: Some(Kind::Entity),
            },
            CategorySpec {
                name: "applied_by_use_case",
                side: Side::Incoming,
                edge: StructuralEdge::UcAppliesRule,
                fallback_kind: Some(Kind::UseCase),
            },
        ],
        Kind::Command => vec![
            CategorySpec {
                name: "executed_by_use_case",
                side: Side::Incoming,
                edge: StructuralEdge::UcExecutesCmd,
                fallback_kind: Some(Kind::UseCase),
            },
            CategorySpec {
                name: "emits_event",
                side: Side::Outgoing,
                edge: StructuralEdge::Emits,
                fallback_kind: Some(Kind::Event),
            },
        ],
        Kind::UseCase => vec![
            CategorySpec {
                name: "applies_rules",
                side: Side::Outgoing,
                edge: StructuralEdge::UcAppliesRule,
                fallback_kind: Some(Kind::BusinessRule),
            },
            CategorySpec {
                name: "executes_commands",
                side: Side::Outgoing,
                edge: StructuralEdge::UcExecutesCmd,
                fallback_kind: Some(Kind::Command),
            },
            CategorySpec {
                name: "traced_from_requirement",
                side: Side::Incoming,
                edge: StructuralEdge::ReqTracesTo,
                fallback_kind: Some(Kind::Requirement),
            },
            CategorySpec {
                name: "validated",
                side: Side::Incoming,
                edge: StructuralEdge::Validates,
                fallback_kind: None,
            },
        ],
        Kind::Requirement => vec![CategorySpec {
            name: "traces_to",
            side: Side::Outgoing,
            edge: StructuralEdge::ReqTracesTo,
            fallback_kind: None,
        }],
        _ => vec![CategorySpec {
            name: "referenced",
            side: Side::Incoming,
            edge: StructuralEdge::WikiLink,
            fallback_kind: None,
        }],
    }
}

impl QueryEngine {
    /// Coverage of a node against its kind's expected relationships.
    pub fn coverage(&self, node_id: &str) -> Result<CoverageReport> {
        self.instrument(&format!("coverage:{node_id}"), |_clock| {
            let snapshot = self.snapshot();
            let node = snapshot
                .graph
                .get_node(node_id)
                .ok_or_else(|| QueryError::NodeNotFound(node_id.to_string()))?;

            let specs = categories_for(node.kind);
            let total = specs.len();
            let mut categories = Vec::with_capacity(total);
            let mut covered = 0usize;

            for spec in specs {
                let dedicated = [EdgeType::Structural(spec.edge)];
                let edges = match spec.side {
                    Side::Outgoing => snapshot.graph.outgoing_edges(node_id, Some(&dedicated)),
                    Side::Incoming => snapshot.graph.incoming_edges(node_id, Some(&dedicated)),
                };
                let other_end = |e: &GraphEdge| match spec.side {
                    Side::Outgoing => e.to_node.clone(),
                    Side::Incoming => e.from_node.clone(),
                };
                let mut found: BTreeSet<String> = match spec.fallback_kind {
                    // The dedicated edge counts only toward the expected kind
                    // when one is named (a WIKI_LINK category needs its
                    // counterpart kind).
                    Some(expected) if spec.edge == StructuralEdge::WikiLink => edges
                        .iter()
                        .map(|e| other_end(e))
                        .filter(|id| {
                            snapshot
                                .graph
                                .get_node(id)
                                .is_some_and(|n| n.kind == expected)
                        })
                        .collect(),
                    _ => edges.iter().map(|e| other_end(e)).collect(),
                };

                let status = if !found.is_empty() {
                    covered += 1;
                    CoverageStatus::Covered
                } else if let Some(expected) = spec.fallback_kind {
                    // Fallback: a plain wiki-link involving the expected kind.
                    let wiki = [EdgeType::Structural(StructuralEdge::WikiLink)];
                    let fallback_edges = match spec.side {
                        Side::Outgoing => snapshot.graph.outgoing_edges(node_id, Some(&wiki)),
                        Side::Incoming => snapshot.graph.incoming_edges(node_id, Some(&wiki)),
                    };
                    found = fallback_edges
                        .iter()
                        .map(|e| other_end(e))
                        .filter(|id| {
                            snapshot
                                .graph
                                .get_node(id)
                                .is_some_and(|n| n.kind == expected)
                        })
                        .collect();
                    if found.is_empty() {
                        CoverageStatus::Missing
                    } else {
                        CoverageStatus::Partial
                    }
                } else {
                    CoverageStatus::Missing
                };

                categories.push(CoverageCategory {
                    name: spec.name,
                    status,
                    found: found.into_iter().collect(),
                });
            }

            let coverage_percent = if total == 0 {
                100.0
            } else {
                round2(covered as f64 / total as f64 * 100.0)
            };
            Ok((
                CoverageReport {
                    node_id: node_id.to_string(),
                    kind: node.kind,
                    categories,
                    coverage_percent,
                },
                total,
            ))
        })
    }
}

// ============================================================================
// Q-layer-violations
// ============================================================================

/// One layer violation.
#[derive(Debug, Clone, Serialize)]
pub struct LayerViolation {
    pub from_node: String,
    pub to_node: String,
    pub edge_type: String,
    pub from_layer: Layer,
    pub to_layer: Option<Layer>,
    pub source_file: String,
    /// Section the offending reference came from, when recorded.
    pub section: Option<String>,
    pub explanation: String,
}

/// Q-layer-violations result.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationReport {
    pub violations: Vec<LayerViolation>,
    pub total_edges: usize,
    /// `violations / total_edges × 100`, two decimals.
    pub violation_rate: f64,
}

impl QueryEngine {
    /// Every loaded edge flagged as a layer violation.
    pub fn layer_violations(&self, filters: &QueryFilters) -> Result<ViolationReport> {
        self.instrument("layer-violations", |_clock| {
            filters.validate()?;
            let snapshot = self.snapshot();
            let total_edges = snapshot.graph.edge_count();

            let mut violations = Vec::new();
            for edge in snapshot.graph.iter_edges() {
                if !edge.layer_violation {
                    continue;
                }
                let Some(from) = snapshot.graph.get_node(&edge.from_node) else {
                    continue;
                };
                if !filters.admits(from) {
                    continue;
                }
                let to_layer = snapshot.graph.get_node(&edge.to_node).map(|n| n.layer);
                let explanation = match to_layer {
                    Some(to) => format!(
                        "{} ({}) references {} ({}): lower layers must not depend on higher ones",
                        edge.from_node, from.layer, edge.to_node, to
                    ),
                    None => format!(
                        "{} ({}) references {} in a higher layer",
                        edge.from_node, from.layer, edge.to_node
                    ),
                };
                violations.push(LayerViolation {
                    from_node: edge.from_node.clone(),
                    to_node: edge.to_node.clone(),
                    edge_type: edge.edge_type.as_str().to_string(),
                    from_layer: from.layer,
                    to_layer,
                    source_file: edge.source_file.clone(),
                    section: edge
                        .metadata
                        .get("section")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    explanation,
                });
            }
            violations.sort_by(|a, b| {
                (&a.from_node, &a.to_node, &a.edge_type)
                    .cmp(&(&b.from_node, &b.to_node, &b.edge_type))
            });

            let violation_rate = if total_edges == 0 {
                0.0
            } else {
                round2(violations.len() as f64 / total_edges as f64 * 100.0)
            };
            let count = violations.len();
            Ok((
                ViolationReport {
                    violations,
                    total_edges,
                    violation_rate,
                },
                count,
            ))
        })
    }
}

// ============================================================================
// Q-orphans
// ============================================================================

/// Q-orphans result. This query never fails; an empty index reports zeros.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanReport {
    pub orphans: Vec<OrphanEdge>,
    pub total_orphans: usize,
    pub total_edges_on_disk: usize,
    /// `orphans / (loaded + orphans) × 100`, two decimals.
    pub orphan_rate: f64,
}

impl QueryEngine {
    /// Edges whose endpoints are missing from the index.
    pub fn orphans(&self, include_edge_types: Option<&[String]>) -> Result<OrphanReport> {
        self.instrument("orphans", |_clock| {
            let types = parse_edge_types(include_edge_types)?;
            let snapshot = self.snapshot();

            let mut orphans: Vec<OrphanEdge> = snapshot
                .graph
                .orphan_edges()
                .iter()
                .filter(|o| {
                    types
                        .as_ref()
                        .is_none_or(|t| t.contains(&o.edge.edge_type))
                })
                .cloned()
                .collect();
            orphans.sort_by(|a, b| a.edge.key().cmp(&b.edge.key()));

            // The rate always counts every orphan, filtered or not.
            let all_orphans = snapshot.graph.orphan_edges().len();
            let loaded = snapshot.graph.edge_count();
            let on_disk = loaded + all_orphans;
            let orphan_rate = if on_disk == 0 {
                0.0
            } else {
                round2(all_orphans as f64 / on_disk as f64 * 100.0)
            };

            let count = orphans.len();
            Ok((
                OrphanReport {
                    orphans,
                    total_orphans: all_orphans,
                    total_edges_on_disk: on_disk,
                    orphan_rate,
                },
                count,
            ))
        })
    }
}

/// Round to two decimals.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(75.0), 75.0);
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
    }

    #[test]
    fn test_category_tables() {
        assert_eq!(categories_for(Kind::Entity).len(), 4);
        assert_eq!(categories_for(Kind::Event).len(), 2);
        assert_eq!(categories_for(Kind::UseCase).len(), 4);
        assert_eq!(categories_for(Kind::Prd).len(), 1);
    }
}
