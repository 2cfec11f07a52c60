//! Graph Schema and In-Memory Graph Store
//!
//! Defines the persistent node/edge model for KDD artifacts and the in-memory
//! directed labeled multigraph loaded from an artifact store.
//!
//! Storage is a flat arena of nodes keyed by stable string id plus two
//! adjacency maps keyed likewise; traversals use visited-sets keyed by id.
//! Edges whose endpoints are absent from the index are tracked separately as
//! orphans, never silently dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Kind, Layer, Status};

// ============================================================================
// Edge Types
// ============================================================================

/// Structural relationship types. Closed set, serialized SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StructuralEdge {
    WikiLink,
    DomainRelation,
    EntityRule,
    EntityPolicy,
    Emits,
    Consumes,
    UcAppliesRule,
    UcExecutesCmd,
    UcStory,
    ViewTriggersUc,
    ViewUsesComponent,
    ComponentUsesEntity,
    ReqTracesTo,
    Validates,
    DecidesFor,
    CrossDomainRef,
    LayerDependency,
    QueryReads,
    ProcessStep,
    ObjMeasuredBy,
    PrdIncludes,
}

impl StructuralEdge {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuralEdge::WikiLink => "WIKI_LINK",
            StructuralEdge::DomainRelation => "DOMAIN_RELATION",
            StructuralEdge::EntityRule => "ENTITY_RULE",
            StructuralEdge::EntityPolicy => "ENTITY_POLICY",
            StructuralEdge::Emits => "EMITS",
            StructuralEdge::Consumes => "CONSUMES",
            StructuralEdge::UcAppliesRule => "UC_APPLIES_RULE",
            StructuralEdge::UcExecutesCmd => "UC_EXECUTES_CMD",
            StructuralEdge::UcStory => "UC_STORY",
            StructuralEdge::ViewTriggersUc => "VIEW_TRIGGERS_UC",
            StructuralEdge::ViewUsesComponent => "VIEW_USES_COMPONENT",
            StructuralEdge::ComponentUsesEntity => "COMPONENT_USES_ENTITY",
            StructuralEdge::ReqTracesTo => "REQ_TRACES_TO",
            StructuralEdge::Validates => "VALIDATES",
            StructuralEdge::DecidesFor => "DECIDES_FOR",
            StructuralEdge::CrossDomainRef => "CROSS_DOMAIN_REF",
            StructuralEdge::LayerDependency => "LAYER_DEPENDENCY",
            StructuralEdge::QueryReads => "QUERY_READS",
            StructuralEdge::ProcessStep => "PROCESS_STEP",
            StructuralEdge::ObjMeasuredBy => "OBJ_MEASURED_BY",
            StructuralEdge::PrdIncludes => "PRD_INCLUDES",
        }
    }

    /// Parse a SCREAMING_SNAKE_CASE structural type.
    pub fn parse(value: &str) -> Option<Self> {
        ALL_STRUCTURAL_EDGES.iter().copied().find(|e| e.as_str() == value)
    }
}

/// Every structural edge type, in a stable order.
pub const ALL_STRUCTURAL_EDGES: [StructuralEdge; 21] = [
    StructuralEdge::WikiLink,
    StructuralEdge::DomainRelation,
    StructuralEdge::EntityRule,
    StructuralEdge::EntityPolicy,
    StructuralEdge::Emits,
    StructuralEdge::Consumes,
    StructuralEdge::UcAppliesRule,
    StructuralEdge::UcExecutesCmd,
    StructuralEdge::UcStory,
    StructuralEdge::ViewTriggersUc,
    StructuralEdge::ViewUsesComponent,
    StructuralEdge::ComponentUsesEntity,
    StructuralEdge::ReqTracesTo,
    StructuralEdge::Validates,
    StructuralEdge::DecidesFor,
    StructuralEdge::CrossDomainRef,
    StructuralEdge::LayerDependency,
    StructuralEdge::QueryReads,
    StructuralEdge::ProcessStep,
    StructuralEdge::ObjMeasuredBy,
    StructuralEdge::PrdIncludes,
];

/// An edge type: structural (closed set, SCREAMING_SNAKE_CASE) or business
/// (free-form lower_snake_case, e.g. a relation name like `pertenece_a`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    Structural(StructuralEdge),
    Business(String),
}

impl EdgeType {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeType::Structural(s) => s.as_str(),
            EdgeType::Business(name) => name,
        }
    }

    /// Parse an edge type string. SCREAMING_SNAKE values must belong to the
    /// closed structural set; lower_snake values are business types.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        if let Some(s) = StructuralEdge::parse(value) {
            return Some(EdgeType::Structural(s));
        }
        let is_business = value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if is_business {
            Some(EdgeType::Business(value.to_string()))
        } else {
            None
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EdgeType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EdgeType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EdgeType::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown edge type: {s}")))
    }
}

// ============================================================================
// Extraction Method
// ============================================================================

/// How an edge was derived from its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    WikiLink,
    SectionContent,
    Implicit,
    Frontmatter,
}

// ============================================================================
// Node
// ============================================================================

/// A persisted graph node. Exactly one per indexed source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Globally unique id: `{KindPrefix}:{DocumentId}`.
    pub id: String,
    pub kind: Kind,
    /// Source path relative to the spec root.
    pub source_file: String,
    /// SHA-256 of the raw source bytes, hex-encoded.
    pub source_hash: String,
    pub layer: Layer,
    pub status: Status,
    /// Unique display aliases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Kind-dependent indexed fields. Sorted map for canonical output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexed_fields: BTreeMap<String, serde_json::Value>,
    /// RFC3339 UTC timestamp of indexing.
    pub indexed_at: DateTime<Utc>,
}

impl GraphNode {
    /// The unqualified document id (the part after the kind prefix).
    pub fn document_id(&self) -> &str {
        self.id.split_once(':').map(|(_, rest)| rest).unwrap_or(&self.id)
    }

    /// String field value from `indexed_fields`, when present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.indexed_fields.get(key).and_then(|v| v.as_str())
    }
}

// ============================================================================
// Edge
// ============================================================================

/// A persisted directed typed edge.
///
/// Uniqueness key is `(from_node, to_node, edge_type)`; duplicates are merged
/// by union of metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_node: String,
    pub to_node: String,
    pub edge_type: EdgeType,
    pub source_file: String,
    pub extraction_method: ExtractionMethod,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub layer_violation: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bidirectional: bool,
}

impl GraphEdge {
    pub fn new(
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        edge_type: EdgeType,
        source_file: impl Into<String>,
        extraction_method: ExtractionMethod,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            to_node: to_node.into(),
            edge_type,
            source_file: source_file.into(),
            extraction_method,
            metadata: BTreeMap::new(),
            layer_violation: false,
            bidirectional: false,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Uniqueness key `(from, to, type)`.
    pub fn key(&self) -> (String, String, String) {
        (
            self.from_node.clone(),
            self.to_node.clone(),
            self.edge_type.as_str().to_string(),
        )
    }

    /// Merge another edge with the same key into this one: metadata union,
    /// existing entries win; flags are OR-ed.
    pub fn absorb(&mut self, other: &GraphEdge) {
        for (k, v) in &other.metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.layer_violation |= other.layer_violation;
        self.bidirectional |= other.bidirectional;
    }
}

// ============================================================================
// Orphan Edges
// ============================================================================

/// Why an edge could not be attached to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    MissingSource,
    MissingTarget,
    BothMissing,
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanReason::MissingSource => "missing_source",
            OrphanReason::MissingTarget => "missing_target",
            OrphanReason::BothMissing => "both_missing",
        }
    }
}

/// An edge whose endpoint(s) are not present in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanEdge {
    pub edge: GraphEdge,
    pub reason: OrphanReason,
}

// ============================================================================
// Traversal
// ============================================================================

/// A node reached by a traversal, with its BFS distance from the root and the
/// id path that reached it (root first).
#[derive(Debug, Clone, PartialEq)]
pub struct ReachedNode {
    pub id: String,
    pub distance: usize,
    pub path: Vec<String>,
}

/// Result of a bounded BFS.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    /// Reached nodes excluding the root, in discovery order.
    pub nodes: Vec<ReachedNode>,
    /// Traversed edges in visit order.
    pub edges: Vec<GraphEdge>,
}

/// Which adjacency to follow during a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Outgoing,
    Incoming,
    Both,
}

/// Options for [`GraphStore::traverse`].
#[derive(Debug, Clone)]
pub struct TraverseOptions {
    pub depth: usize,
    pub direction: TraversalDirection,
    /// When set, only edges of these types are followed.
    pub edge_types: Option<Vec<EdgeType>>,
    /// Skip edges flagged as layer violations.
    pub respect_layers: bool,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            direction: TraversalDirection::Both,
            edge_types: None,
            respect_layers: false,
        }
    }
}

// ============================================================================
// Graph Store
// ============================================================================

/// In-memory directed labeled multigraph with secondary indices.
///
/// Read-only after load from the query side; the incremental pipeline builds
/// a fresh store and swaps it in whole.
#[derive(Debug, Default)]
pub struct GraphStore {
    /// Flat arena, keyed by stable string id.
    nodes: HashMap<String, GraphNode>,
    /// Kind index.
    by_kind: HashMap<Kind, BTreeSet<String>>,
    /// All attached edges, in insertion order.
    edges: Vec<GraphEdge>,
    /// node id -> indices into `edges`, insertion order.
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    /// Edges with at least one absent endpoint.
    orphans: Vec<OrphanEdge>,
    /// Inverted index: lowercased token -> node ids.
    lexical: HashMap<String, BTreeSet<String>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from persisted nodes and edges. Edges with unknown
    /// endpoints land in the orphan list with a reason.
    pub fn load(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut store = Self::new();
        for node in nodes {
            store.add_node(node);
        }
        for edge in edges {
            store.add_edge(edge);
        }
        store
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    /// Insert a node, replacing any node with the same id. Previously orphaned
    /// edges that now have both endpoints are attached.
    pub fn add_node(&mut self, node: GraphNode) {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            self.remove_node(&id);
        }
        self.by_kind.entry(node.kind).or_default().insert(id.clone());
        self.index_node_text(&node);
        self.nodes.insert(id.clone(), node);

        // Re-attach orphans whose missing endpoint just appeared.
        let (ready, still): (Vec<_>, Vec<_>) = std::mem::take(&mut self.orphans)
            .into_iter()
            .partition(|o| {
                self.nodes.contains_key(&o.edge.from_node)
                    && self.nodes.contains_key(&o.edge.to_node)
            });
        self.orphans = still;
        for orphan in ready {
            self.attach_edge(orphan.edge);
        }
    }

    /// Remove a node, cascading removal of incident edges. Orphan edges whose
    /// remaining endpoint matches the removed node are dropped as well.
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.remove(id)?;
        if let Some(set) = self.by_kind.get_mut(&node.kind) {
            set.remove(id);
        }
        self.unindex_node_text(&node);

        let retained: Vec<GraphEdge> = std::mem::take(&mut self.edges)
            .into_iter()
            .filter(|e| e.from_node != id && e.to_node != id)
            .collect();
        self.rebuild_adjacency(retained);

        self.orphans
            .retain(|o| o.edge.from_node != id && o.edge.to_node != id);
        Some(node)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Node ids of a kind, id-sorted.
    pub fn nodes_of_kind(&self, kind: Kind) -> Vec<&GraphNode> {
        self.by_kind
            .get(&kind)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    /// Insert an edge. Duplicate keys merge metadata; edges with absent
    /// endpoints are recorded as orphans.
    pub fn add_edge(&mut self, edge: GraphEdge) {
        let from_ok = self.nodes.contains_key(&edge.from_node);
        let to_ok = self.nodes.contains_key(&edge.to_node);
        match (from_ok, to_ok) {
            (true, true) => self.attach_edge(edge),
            (false, true) => self.orphans.push(OrphanEdge {
                edge,
                reason: OrphanReason::MissingSource,
            }),
            (true, false) => self.orphans.push(OrphanEdge {
                edge,
                reason: OrphanReason::MissingTarget,
            }),
            (false, false) => self.orphans.push(OrphanEdge {
                edge,
                reason: OrphanReason::BothMissing,
            }),
        }
    }

    fn attach_edge(&mut self, edge: GraphEdge) {
        // Merge into an existing edge with the same key.
        if let Some(indices) = self.outgoing.get(&edge.from_node) {
            for &i in indices {
                if self.edges[i].to_node == edge.to_node
                    && self.edges[i].edge_type == edge.edge_type
                {
                    self.edges[i].absorb(&edge);
                    return;
                }
            }
        }
        let index = self.edges.len();
        self.outgoing
            .entry(edge.from_node.clone())
            .or_default()
            .push(index);
        self.incoming
            .entry(edge.to_node.clone())
            .or_default()
            .push(index);
        self.edges.push(edge);
    }

    fn rebuild_adjacency(&mut self, edges: Vec<GraphEdge>) {
        self.outgoing.clear();
        self.incoming.clear();
        self.edges = edges;
        for (i, edge) in self.edges.iter().enumerate() {
            self.outgoing.entry(edge.from_node.clone()).or_default().push(i);
            self.incoming.entry(edge.to_node.clone()).or_default().push(i);
        }
    }

    /// Outgoing edges of a node, optionally filtered by type, insertion order.
    pub fn outgoing_edges(&self, id: &str, types: Option<&[EdgeType]>) -> Vec<&GraphEdge> {
        self.select_edges(self.outgoing.get(id), types)
    }

    /// Incoming edges of a node, optionally filtered by type, insertion order.
    pub fn incoming_edges(&self, id: &str, types: Option<&[EdgeType]>) -> Vec<&GraphEdge> {
        self.select_edges(self.incoming.get(id), types)
    }

    fn select_edges(
        &self,
        indices: Option<&Vec<usize>>,
        types: Option<&[EdgeType]>,
    ) -> Vec<&GraphEdge> {
        let Some(indices) = indices else {
            return Vec::new();
        };
        indices
            .iter()
            .map(|&i| &self.edges[i])
            .filter(|e| types.is_none_or(|t| t.contains(&e.edge_type)))
            .collect()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn orphan_edges(&self) -> &[OrphanEdge] {
        &self.orphans
    }

    // ------------------------------------------------------------------------
    // Lexical index
    // ------------------------------------------------------------------------

    fn searchable_text(node: &GraphNode) -> Vec<String> {
        let mut texts = vec![node.id.clone()];
        texts.extend(node.aliases.iter().cloned());
        for value in node.indexed_fields.values() {
            if let Some(s) = value.as_str() {
                texts.push(s.to_string());
            }
        }
        texts
    }

    fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    fn index_node_text(&mut self, node: &GraphNode) {
        for text in Self::searchable_text(node) {
            for token in Self::tokenize(&text) {
                self.lexical.entry(token).or_default().insert(node.id.clone());
            }
        }
    }

    fn unindex_node_text(&mut self, node: &GraphNode) {
        for text in Self::searchable_text(node) {
            for token in Self::tokenize(&text) {
                if let Some(ids) = self.lexical.get_mut(&token) {
                    ids.remove(&node.id);
                    if ids.is_empty() {
                        self.lexical.remove(&token);
                    }
                }
            }
        }
    }

    /// Node ids containing a single token, id-sorted.
    pub fn token_hits(&self, token: &str) -> Vec<&str> {
        self.lexical
            .get(&token.to_lowercase())
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether a node's searchable text contains an exact phrase
    /// (case-insensitive).
    pub fn phrase_match(&self, id: &str, phrase: &str) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let phrase = phrase.to_lowercase();
        Self::searchable_text(node)
            .iter()
            .any(|t| t.to_lowercase().contains(&phrase))
    }

    /// Lexical search. Single token: union of inverted-index hits. Multiple
    /// tokens: intersection (every token must match). Results id-sorted.
    pub fn text_search(&self, query: &str) -> Vec<&GraphNode> {
        let tokens: Vec<String> = Self::tokenize(query).collect();
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut hits: Option<BTreeSet<String>> = None;
        for token in &tokens {
            let ids = self.lexical.get(token).cloned().unwrap_or_default();
            hits = Some(match hits {
                None => ids,
                Some(acc) if tokens.len() == 1 => acc.union(&ids).cloned().collect(),
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
        }
        hits.unwrap_or_default()
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Ids of nodes whose searchable tokens start with the given prefix,
    /// id-sorted.
    pub fn prefix_search(&self, prefix: &str) -> Vec<&GraphNode> {
        let prefix = prefix.to_lowercase();
        let mut ids = BTreeSet::new();
        for (token, node_ids) in &self.lexical {
            if token.starts_with(&prefix) {
                ids.extend(node_ids.iter().cloned());
            }
        }
        ids.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    /// Bounded BFS from a root. Edges are visited in insertion order; a node
    /// discovered via a shorter path is never re-added.
    pub fn traverse(&self, root: &str, options: &TraverseOptions) -> Traversal {
        let mut result = Traversal::default();
        if !self.nodes.contains_key(root) {
            return result;
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
        let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
        queue.push_back((root.to_string(), 0, vec![root.to_string()]));

        while let Some((current, distance, path)) = queue.pop_front() {
            if distance >= options.depth {
                continue;
            }
            let mut candidates: Vec<(&GraphEdge, &str)> = Vec::new();
            if matches!(
                options.direction,
                TraversalDirection::Outgoing | TraversalDirection::Both
            ) {
                for edge in self.outgoing_edges(&current, options.edge_types.as_deref()) {
                    candidates.push((edge, edge.to_node.as_str()));
                }
            }
            if matches!(
                options.direction,
                TraversalDirection::Incoming | TraversalDirection::Both
            ) {
                for edge in self.incoming_edges(&current, options.edge_types.as_deref()) {
                    candidates.push((edge, edge.from_node.as_str()));
                }
            }

            for (edge, neighbor) in candidates {
                if options.respect_layers && edge.layer_violation {
                    continue;
                }
                if seen_edges.insert(edge.key()) {
                    result.edges.push(edge.clone());
                }
                if visited.insert(neighbor.to_string()) {
                    let mut neighbor_path = path.clone();
                    neighbor_path.push(neighbor.to_string());
                    result.nodes.push(ReachedNode {
                        id: neighbor.to_string(),
                        distance: distance + 1,
                        path: neighbor_path.clone(),
                    });
                    queue.push_back((neighbor.to_string(), distance + 1, neighbor_path));
                }
            }
        }
        result
    }
}

/// Tokenize a query the same way the lexical index tokenizes node text.
pub fn tokenize_query(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Kind;

    fn node(id: &str, kind: Kind) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind,
            source_file: format!("specs/01-domain/{id}.md"),
            source_hash: "0".repeat(64),
            layer: Layer::Domain,
            status: Status::Draft,
            aliases: vec![],
            domain: None,
            indexed_fields: BTreeMap::new(),
            indexed_at: Utc::now(),
        }
    }

    fn wiki_edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge::new(
            from,
            to,
            EdgeType::Structural(StructuralEdge::WikiLink),
            "specs/01-domain/test.md",
            ExtractionMethod::WikiLink,
        )
    }

    #[test]
    fn test_edge_type_parse() {
        assert_eq!(
            EdgeType::parse("DOMAIN_RELATION"),
            Some(EdgeType::Structural(StructuralEdge::DomainRelation))
        );
        assert_eq!(
            EdgeType::parse("pertenece_a"),
            Some(EdgeType::Business("pertenece_a".to_string()))
        );
        // SCREAMING_SNAKE values outside the closed set are rejected.
        assert_eq!(EdgeType::parse("MYSTERY_EDGE"), None);
        assert_eq!(EdgeType::parse(""), None);
    }

    #[test]
    fn test_edge_type_serde() {
        let json = serde_json::to_string(&EdgeType::Structural(StructuralEdge::Emits)).unwrap();
        assert_eq!(json, "\"EMITS\"");
        let parsed: EdgeType = serde_json::from_str("\"pertenece_a\"").unwrap();
        assert_eq!(parsed, EdgeType::Business("pertenece_a".to_string()));
    }

    #[test]
    fn test_structural_set_size() {
        assert_eq!(ALL_STRUCTURAL_EDGES.len(), 21);
    }

    #[test]
    fn test_orphan_tracking() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_node(node("Entity:B", Kind::Entity));
        store.add_edge(wiki_edge("Entity:A", "Entity:B"));
        store.add_edge(wiki_edge("Entity:A", "Entity:MISSING"));

        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.orphan_edges().len(), 1);
        assert_eq!(store.orphan_edges()[0].reason, OrphanReason::MissingTarget);
    }

    #[test]
    fn test_orphan_reattach_on_add() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_edge(wiki_edge("Entity:A", "Entity:B"));
        assert_eq!(store.orphan_edges().len(), 1);

        store.add_node(node("Entity:B", Kind::Entity));
        assert_eq!(store.orphan_edges().len(), 0);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_node(node("Entity:B", Kind::Entity));
        store.add_edge(wiki_edge("Entity:A", "Entity:B"));
        store.add_edge(wiki_edge("Entity:B", "Entity:MISSING"));

        store.remove_node("Entity:B");
        assert_eq!(store.edge_count(), 0);
        // The orphan from B is dropped too.
        assert_eq!(store.orphan_edges().len(), 0);
        assert!(store.has_node("Entity:A"));
    }

    #[test]
    fn test_duplicate_edge_merges_metadata() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_node(node("Entity:B", Kind::Entity));
        store.add_edge(
            wiki_edge("Entity:A", "Entity:B")
                .with_metadata("cardinality", serde_json::json!("N:1")),
        );
        store.add_edge(
            wiki_edge("Entity:A", "Entity:B")
                .with_metadata("display_alias", serde_json::json!("usuario")),
        );

        assert_eq!(store.edge_count(), 1);
        let edge = store.outgoing_edges("Entity:A", None)[0];
        assert_eq!(edge.metadata.len(), 2);
    }

    #[test]
    fn test_text_search_union_and_intersection() {
        let mut store = GraphStore::new();
        let mut a = node("Entity:Pedido", Kind::Entity);
        a.aliases = vec!["Orden".to_string()];
        a.indexed_fields.insert(
            "description".to_string(),
            serde_json::json!("Pedido de compra del usuario"),
        );
        store.add_node(a);
        let mut b = node("Entity:Usuario", Kind::Entity);
        b.indexed_fields
            .insert("description".to_string(), serde_json::json!("Cuenta de usuario"));
        store.add_node(b);

        // Single token: union.
        let hits = store.text_search("usuario");
        assert_eq!(hits.len(), 2);

        // Multi token: intersection.
        let hits = store.text_search("pedido usuario");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "Entity:Pedido");

        let hits = store.text_search("orden");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_traverse_depth_zero_reaches_nothing() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_node(node("Entity:B", Kind::Entity));
        store.add_edge(wiki_edge("Entity:A", "Entity:B"));

        let result = store.traverse(
            "Entity:A",
            &TraverseOptions {
                depth: 0,
                ..Default::default()
            },
        );
        assert!(result.nodes.is_empty());
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_traverse_bfs_distances() {
        let mut store = GraphStore::new();
        for id in ["Entity:A", "Entity:B", "Entity:C"] {
            store.add_node(node(id, Kind::Entity));
        }
        store.add_edge(wiki_edge("Entity:A", "Entity:B"));
        store.add_edge(wiki_edge("Entity:B", "Entity:C"));

        let result = store.traverse(
            "Entity:A",
            &TraverseOptions {
                depth: 2,
                direction: TraversalDirection::Outgoing,
                ..Default::default()
            },
        );
        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.nodes[0].id, "Entity:B");
        assert_eq!(result.nodes[0].distance, 1);
        assert_eq!(result.nodes[1].id, "Entity:C");
        assert_eq!(result.nodes[1].distance, 2);
        assert_eq!(
            result.nodes[1].path,
            vec!["Entity:A", "Entity:B", "Entity:C"]
        );
    }

    #[test]
    fn test_traverse_respect_layers_skips_violations() {
        let mut store = GraphStore::new();
        store.add_node(node("Entity:A", Kind::Entity));
        store.add_node(node("Entity:B", Kind::Entity));
        let mut edge = wiki_edge("Entity:A", "Entity:B");
        edge.layer_violation = true;
        store.add_edge(edge);

        let strict = store.traverse(
            "Entity:A",
            &TraverseOptions {
                depth: 1,
                respect_layers: true,
                ..Default::default()
            },
        );
        assert!(strict.nodes.is_empty());

        let lax = store.traverse("Entity:A", &TraverseOptions::default());
        assert_eq!(lax.nodes.len(), 1);
    }
}
