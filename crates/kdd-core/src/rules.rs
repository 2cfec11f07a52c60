//! Rule Engine
//!
//! Pure deterministic rules with no I/O: kind routing, layer derivation and
//! validation, the embeddable-section table, index-level capability
//! detection, and merge conflict resolution. Everything here must produce
//! identical answers on every machine.

use std::path::Path;

use crate::document::{parse_kind, parse_layer, FrontMatter, Kind, Layer};
use crate::graph::GraphNode;

// ============================================================================
// Kind Routing
// ============================================================================

/// Outcome of routing a document by its front-matter `kind` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Recognized kind. `layer_mismatch` is set when the source path's layer
    /// disagrees with the layer this kind belongs to; the kind still wins.
    Known { kind: Kind, layer_mismatch: bool },
    /// `kind` present but not in the closed set.
    Unknown { value: String },
    /// No `kind` field at all.
    Missing,
}

/// Route a document from its front-matter. The path layer is consulted only
/// for the agreement warning; the `kind` field always wins.
pub fn route_document(front_matter: &FrontMatter, path_layer: Layer) -> Routing {
    let Some(value) = front_matter.get_str("kind") else {
        return Routing::Missing;
    };
    match parse_kind(value) {
        Some(kind) => Routing::Known {
            kind,
            layer_mismatch: expected_layer(kind).is_some_and(|l| l != path_layer),
        },
        None => Routing::Unknown {
            value: value.to_string(),
        },
    }
}

/// The layer a kind's documents are expected to live under. `None` means the
/// kind may live anywhere (ADRs accompany the decision they document).
pub fn expected_layer(kind: Kind) -> Option<Layer> {
    match kind {
        Kind::Requirement | Kind::Objective | Kind::Prd => Some(Layer::Requirements),
        Kind::Entity
        | Kind::Event
        | Kind::BusinessRule
        | Kind::BusinessPolicy
        | Kind::CrossPolicy => Some(Layer::Domain),
        Kind::Command | Kind::Query | Kind::Process | Kind::UseCase => Some(Layer::Behavior),
        Kind::UiView | Kind::UiComponent => Some(Layer::Experience),
        Kind::Adr => None,
    }
}

// ============================================================================
// Layers
// ============================================================================

/// Derive the layer from a source path: the leading numeric-prefixed segment
/// of the first path component under `specs/`. Paths outside a recognized
/// layer directory default to `00-requirements`.
pub fn layer_of_path(path: &str) -> Layer {
    let normalized = path.replace('\\', "/");
    // Only segments after a `specs/` component count, when one is present.
    let segments: Vec<&str> = normalized.split('/').collect();
    let start = segments
        .iter()
        .position(|s| *s == "specs")
        .map(|i| i + 1)
        .unwrap_or(0);
    for segment in &segments[start..] {
        if let Some(layer) = parse_layer(segment) {
            return layer;
        }
    }
    Layer::Requirements
}

/// Domain from a `domains/<name>/` path segment, when present.
pub fn domain_of_path(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();
    segments
        .iter()
        .position(|s| *s == "domains")
        .and_then(|i| segments.get(i + 1))
        .filter(|s| !s.is_empty() && !s.contains('.'))
        .map(|s| s.to_string())
}

/// Whether an edge `from -> to` violates the layer order.
///
/// Layers `01`..`04` are strictly ordered; an edge pointing to a strictly
/// higher-numbered layer violates. `00-requirements` is exempt in both
/// directions.
pub fn is_layer_violation(from: Layer, to: Layer) -> bool {
    if from == Layer::Requirements || to == Layer::Requirements {
        return false;
    }
    to.number() > from.number()
}

// ============================================================================
// Embeddable Sections
// ============================================================================

/// The fixed table of embeddable section headings per kind.
///
/// `event` is never embedded; `entity` embeds only its description. The table
/// mirrors the KDD embedding rule for authored spec sections.
pub fn embeddable_sections(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::Entity => &["Descripción"],
        Kind::Event => &[],
        Kind::BusinessRule | Kind::BusinessPolicy | Kind::CrossPolicy => {
            &["Declaración", "Cuándo aplica"]
        }
        Kind::Command => &["Propósito", "Precondiciones", "Postcondiciones"],
        Kind::Query => &["Propósito"],
        Kind::Process => &["Descripción"],
        Kind::UseCase => &["Descripción", "Flujo Principal"],
        Kind::UiView => &["Descripción"],
        Kind::UiComponent => &["Descripción"],
        Kind::Requirement => &["Descripción"],
        Kind::Objective => &["Descripción"],
        Kind::Prd => &["Resumen"],
        Kind::Adr => &["Contexto", "Decisión"],
    }
}

// ============================================================================
// Index Level
// ============================================================================

/// Index capability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum IndexLevel {
    L1,
    L2,
    L3,
}

impl IndexLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexLevel::L1 => "L1",
            IndexLevel::L2 => "L2",
            IndexLevel::L3 => "L3",
        }
    }
}

impl std::fmt::Display for IndexLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities available to an index build.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// A functional embedding model is configured.
    pub embedder: bool,
    /// A vector index backend is available.
    pub vector_index: bool,
    /// An agent client for L3 enrichment is available.
    pub agent_client: bool,
}

/// Detect the achievable index level from available capabilities.
pub fn detect_index_level(capabilities: Capabilities) -> IndexLevel {
    if capabilities.embedder && capabilities.vector_index {
        if capabilities.agent_client {
            IndexLevel::L3
        } else {
            IndexLevel::L2
        }
    } else {
        IndexLevel::L1
    }
}

// ============================================================================
// Merge Conflict Resolution
// ============================================================================

/// Which of two conflicting nodes wins a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    First,
    Second,
}

/// Last-write-wins by `indexed_at` (strictly later wins); ties broken by the
/// lexicographically greater `source_hash` so every producer resolves the
/// same way.
pub fn resolve_node_conflict(a: &GraphNode, b: &GraphNode) -> Winner {
    match a.indexed_at.cmp(&b.indexed_at) {
        std::cmp::Ordering::Less => Winner::Second,
        std::cmp::Ordering::Greater => Winner::First,
        std::cmp::Ordering::Equal => {
            if a.source_hash >= b.source_hash {
                Winner::First
            } else {
                Winner::Second
            }
        }
    }
}

/// Whether a path looks like a spec file the pipeline should consider.
pub fn is_spec_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("md")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    use crate::document::Status;

    fn fm(yaml: &str) -> FrontMatter {
        FrontMatter(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_route_known_kind() {
        let routing = route_document(&fm("kind: entity"), Layer::Domain);
        assert_eq!(
            routing,
            Routing::Known {
                kind: Kind::Entity,
                layer_mismatch: false
            }
        );
    }

    #[test]
    fn test_route_layer_mismatch_kind_wins() {
        let routing = route_document(&fm("kind: entity"), Layer::Behavior);
        assert_eq!(
            routing,
            Routing::Known {
                kind: Kind::Entity,
                layer_mismatch: true
            }
        );
    }

    #[test]
    fn test_route_unknown_and_missing() {
        assert_eq!(
            route_document(&fm("kind: widget"), Layer::Domain),
            Routing::Unknown {
                value: "widget".to_string()
            }
        );
        assert_eq!(route_document(&fm("title: x"), Layer::Domain), Routing::Missing);
    }

    #[test]
    fn test_adr_never_mismatches() {
        for layer in [Layer::Requirements, Layer::Domain, Layer::Verification] {
            assert_eq!(
                route_document(&fm("kind: adr"), layer),
                Routing::Known {
                    kind: Kind::Adr,
                    layer_mismatch: false
                }
            );
        }
    }

    #[test]
    fn test_layer_of_path() {
        assert_eq!(
            layer_of_path("specs/01-domain/entities/Pedido.md"),
            Layer::Domain
        );
        assert_eq!(
            layer_of_path("specs/domains/shop/02-behavior/UC-001.md"),
            Layer::Behavior
        );
        assert_eq!(layer_of_path("specs/notes/README.md"), Layer::Requirements);
        assert_eq!(layer_of_path("04-verification/login.md"), Layer::Verification);
    }

    #[test]
    fn test_domain_of_path() {
        assert_eq!(
            domain_of_path("specs/domains/shop/01-domain/Pedido.md"),
            Some("shop".to_string())
        );
        assert_eq!(domain_of_path("specs/01-domain/Pedido.md"), None);
    }

    #[test]
    fn test_layer_violation_strict_order() {
        assert!(is_layer_violation(Layer::Domain, Layer::Behavior));
        assert!(is_layer_violation(Layer::Domain, Layer::Verification));
        assert!(!is_layer_violation(Layer::Behavior, Layer::Domain));
        assert!(!is_layer_violation(Layer::Domain, Layer::Domain));
    }

    #[test]
    fn test_layer_violation_requirements_exempt() {
        assert!(!is_layer_violation(Layer::Requirements, Layer::Verification));
        assert!(!is_layer_violation(Layer::Domain, Layer::Requirements));
    }

    #[test]
    fn test_embeddable_sections_table() {
        assert_eq!(embeddable_sections(Kind::Event), &[] as &[&str]);
        assert_eq!(embeddable_sections(Kind::Entity), &["Descripción"]);
        assert_eq!(
            embeddable_sections(Kind::BusinessRule),
            &["Declaración", "Cuándo aplica"]
        );
    }

    #[test]
    fn test_detect_index_level() {
        assert_eq!(detect_index_level(Capabilities::default()), IndexLevel::L1);
        assert_eq!(
            detect_index_level(Capabilities {
                embedder: true,
                vector_index: true,
                agent_client: false
            }),
            IndexLevel::L2
        );
        assert_eq!(
            detect_index_level(Capabilities {
                embedder: true,
                vector_index: true,
                agent_client: true
            }),
            IndexLevel::L3
        );
        // An embedder without a vector index stays L1.
        assert_eq!(
            detect_index_level(Capabilities {
                embedder: true,
                vector_index: false,
                agent_client: true
            }),
            IndexLevel::L1
        );
    }

    fn node_at(hash: &str, secs: i64) -> GraphNode {
        GraphNode {
            id: "Entity:Pedido".to_string(),
            kind: Kind::Entity,
            source_file: "specs/01-domain/Pedido.md".to_string(),
            source_hash: hash.to_string(),
            layer: Layer::Domain,
            status: Status::Draft,
            aliases: vec![],
            domain: None,
            indexed_fields: BTreeMap::new(),
            indexed_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_conflict_last_write_wins() {
        let a = node_at("abc", 100);
        let b = node_at("xyz", 200);
        assert_eq!(resolve_node_conflict(&a, &b), Winner::Second);
        assert_eq!(resolve_node_conflict(&b, &a), Winner::First);
    }

    #[test]
    fn test_conflict_tie_breaks_on_hash() {
        let a = node_at("abc", 100);
        let b = node_at("xyz", 100);
        assert_eq!(resolve_node_conflict(&a, &b), Winner::Second);
        assert_eq!(resolve_node_conflict(&b, &a), Winner::First);
    }
}
