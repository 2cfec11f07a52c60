//! Kind Extractors
//!
//! Deterministic per-kind mapping from a parsed [`Document`] to a
//! [`GraphNode`] and its typed outgoing edges. Dispatch is a single match on
//! the closed [`Kind`] set; each arm consumes the same section/link helpers
//! so two machines extract byte-identical results from identical inputs.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::document::{Document, Kind, WikiLink};
use crate::graph::{EdgeType, ExtractionMethod, GraphEdge, GraphNode, StructuralEdge};
use crate::rules::{expected_layer, is_layer_violation};
use crate::document::parse_node_prefix;

// ============================================================================
// Target qualification
// ============================================================================

/// Qualify a raw wiki-link target into a node id.
///
/// Targets that already carry a kind prefix (`Entity:Usuario`) pass through.
/// Id-pattern targets (`UC-001`, `REQ-007`) get the matching kind prefix.
/// Everything else defaults to an entity reference, the common case for
/// domain vocabulary links.
pub fn qualify_target(target: &str) -> String {
    if let Some((prefix, _)) = target.split_once(':') {
        if parse_node_prefix(prefix).is_some() {
            return target.to_string();
        }
    }
    if let Some((prefix, _)) = target.split_once('-') {
        if let Some(kind) = parse_node_prefix(prefix) {
            return kind.node_id(target);
        }
    }
    Kind::Entity.node_id(target)
}

/// Qualify a target toward a specific kind unless it is already qualified or
/// follows another kind's id pattern.
fn qualify_as(target: &str, kind: Kind) -> String {
    if let Some((prefix, _)) = target.split_once(':') {
        if parse_node_prefix(prefix).is_some() {
            return target.to_string();
        }
    }
    kind.node_id(target)
}

/// Layer a target node is expected to live in, inferred from its id prefix.
fn target_layer(to_node: &str) -> Option<crate::document::Layer> {
    let base = to_node.rsplit("::").next().unwrap_or(to_node);
    let prefix = base.split_once(':').map(|(p, _)| p)?;
    expected_layer(parse_node_prefix(prefix)?)
}

/// Set `layer_violation` on every edge, inferring the target layer from the
/// target's kind prefix. Cross-domain and unknown targets are left untouched.
pub fn classify_layer_violations(edges: &mut [GraphEdge], from_layer: crate::document::Layer) {
    for edge in edges.iter_mut() {
        if let Some(to_layer) = target_layer(&edge.to_node) {
            edge.layer_violation = is_layer_violation(from_layer, to_layer);
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Extract the node and its outgoing edges for a routed document.
///
/// `indexed_at` is supplied by the caller so a whole batch shares one
/// timestamp and reruns stay reproducible under a pinned clock.
pub fn extract(doc: &Document, kind: Kind, indexed_at: DateTime<Utc>) -> (GraphNode, Vec<GraphEdge>) {
    let node_id = kind.node_id(&doc.id);
    let mut edges = Vec::new();

    // Cross-domain references short-circuit every kind-specific mapping.
    let (cross, local): (Vec<&WikiLink>, Vec<&WikiLink>) = doc
        .wiki_links
        .iter()
        .partition(|l| l.cross_domain().is_some());
    for link in cross {
        let (domain, target) = link.cross_domain().expect("partitioned cross-domain");
        edges.push(
            GraphEdge::new(
                node_id.clone(),
                format!("{domain}::{}", qualify_target(target)),
                EdgeType::Structural(StructuralEdge::CrossDomainRef),
                doc.source_path.clone(),
                ExtractionMethod::WikiLink,
            )
            .with_metadata("domain", serde_json::json!(domain)),
        );
    }

    let ctx = ExtractionContext {
        doc,
        node_id: &node_id,
        links: local,
    };

    let fields = match kind {
        Kind::Entity => extract_entity(&ctx, &mut edges),
        Kind::Event => extract_event(&ctx, &mut edges),
        Kind::BusinessRule => extract_rule(&ctx, &mut edges, StructuralEdge::EntityRule),
        Kind::BusinessPolicy | Kind::CrossPolicy => {
            extract_rule(&ctx, &mut edges, StructuralEdge::EntityPolicy)
        }
        Kind::Command => extract_command(&ctx, &mut edges),
        Kind::Query => extract_simple(&ctx, &mut edges, &[("purpose", &["Propósito"])]),
        Kind::Process => extract_simple(&ctx, &mut edges, &[("description", &["Descripción"])]),
        Kind::UseCase => extract_use_case(&ctx, &mut edges),
        Kind::UiView => extract_ui_view(&ctx, &mut edges),
        Kind::UiComponent => extract_ui_component(&ctx, &mut edges),
        Kind::Requirement => extract_requirement(&ctx, &mut edges),
        Kind::Objective => extract_simple(&ctx, &mut edges, &[("description", &["Descripción"])]),
        Kind::Prd => extract_simple(&ctx, &mut edges, &[("summary", &["Resumen"])]),
        Kind::Adr => extract_adr(&ctx, &mut edges),
    };

    // Frontmatter-declared validation targets (BDD feature coverage).
    for target in doc.front_matter.get_str_list("validates") {
        edges.push(GraphEdge::new(
            node_id.clone(),
            qualify_target(&target),
            EdgeType::Structural(StructuralEdge::Validates),
            doc.source_path.clone(),
            ExtractionMethod::Frontmatter,
        ));
    }

    classify_layer_violations(&mut edges, doc.layer);

    let node = GraphNode {
        id: node_id,
        kind,
        source_file: doc.source_path.clone(),
        source_hash: doc.source_hash.clone(),
        layer: doc.layer,
        status: doc.status(),
        aliases: doc.aliases(),
        domain: doc.domain.clone(),
        indexed_fields: fields,
        indexed_at,
    };
    (node, edges)
}

/// Shared extraction state for one document.
struct ExtractionContext<'a> {
    doc: &'a Document,
    node_id: &'a str,
    /// Same-domain wiki-links, in order.
    links: Vec<&'a WikiLink>,
}

impl<'a> ExtractionContext<'a> {
    fn edge(&self, to_node: String, edge_type: EdgeType, method: ExtractionMethod) -> GraphEdge {
        GraphEdge::new(
            self.node_id.to_string(),
            to_node,
            edge_type,
            self.doc.source_path.clone(),
            method,
        )
    }

    /// Edge derived from a wiki-link, carrying the originating section.
    fn link_edge(
        &self,
        link: &WikiLink,
        to_node: String,
        edge_type: EdgeType,
        method: ExtractionMethod,
    ) -> GraphEdge {
        let mut edge = self.edge(to_node, edge_type, method);
        if !link.section_path.is_empty() {
            edge = edge.with_metadata("section", serde_json::json!(link.section_path));
        }
        edge
    }

    /// Links whose section path ends with one of the given headings.
    fn links_in(&self, headings: &[&str]) -> Vec<&'a WikiLink> {
        self.links
            .iter()
            .copied()
            .filter(|l| {
                headings.iter().any(|h| {
                    l.section_path == *h || l.section_path.ends_with(&format!(".{h}"))
                })
            })
            .collect()
    }

    /// First non-empty text among candidate section headings.
    fn section_text(&self, headings: &[&str]) -> String {
        for heading in headings {
            if let Some(section) = self.doc.section(heading) {
                let text = section.text();
                if !text.is_empty() {
                    return text;
                }
            }
        }
        String::new()
    }

    /// Raw tables of a section, joined.
    fn section_tables(&self, heading: &str) -> String {
        self.doc
            .section(heading)
            .map(|s| s.tables().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Generic WIKI_LINK edges for the given links.
    fn wiki_edges(&self, links: &[&WikiLink], edges: &mut Vec<GraphEdge>) {
        for link in links {
            edges.push(self.link_edge(
                link,
                qualify_target(&link.target),
                EdgeType::Structural(StructuralEdge::WikiLink),
                ExtractionMethod::WikiLink,
            ));
        }
    }
}

fn fields_from(pairs: Vec<(&str, String)>) -> BTreeMap<String, serde_json::Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
        .collect()
}

// ----------------------------------------------------------------------------
// entity
// ----------------------------------------------------------------------------

const EMITS_HEADINGS: [&str; 2] = ["Eventos Emitidos", "Emite"];
const CONSUMES_HEADINGS: [&str; 2] = ["Eventos Consumidos", "Consume"];

fn extract_entity(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    // Relations table: one DOMAIN_RELATION plus one business edge per row.
    for table in ctx
        .doc
        .section("Relaciones")
        .map(|s| s.tables().collect::<Vec<_>>())
        .unwrap_or_default()
    {
        for row in parse_pipe_table(table) {
            let Some(relation_edges) = relation_row_edges(ctx, &row) else {
                continue;
            };
            edges.extend(relation_edges);
        }
    }

    for link in ctx.links_in(&EMITS_HEADINGS) {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::Event),
            EdgeType::Structural(StructuralEdge::Emits),
            ExtractionMethod::SectionContent,
        ));
    }
    for link in ctx.links_in(&CONSUMES_HEADINGS) {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::Event),
            EdgeType::Structural(StructuralEdge::Consumes),
            ExtractionMethod::SectionContent,
        ));
    }

    // Every remaining link (relation links included) still contributes a
    // generic WIKI_LINK; duplicates collapse on the (from, to, type) key.
    let event_sections: Vec<&WikiLink> = ctx
        .links_in(&[EMITS_HEADINGS, CONSUMES_HEADINGS].concat());
    let remaining: Vec<&WikiLink> = ctx
        .links
        .iter()
        .copied()
        .filter(|l| !event_sections.iter().any(|e| std::ptr::eq(*e, *l)))
        .collect();
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![
        ("description", ctx.section_text(&["Descripción"])),
        ("attributes", ctx.section_text(&["Atributos"])),
        ("relations", ctx.section_tables("Relaciones")),
        ("invariants", ctx.section_text(&["Invariantes"])),
        (
            "state_machine",
            ctx.section_text(&["Máquina de Estados", "Estados"]),
        ),
    ])
}

/// Edges for one `## Relaciones` row: `| relación | cardinalidad | [[Target]] |`.
fn relation_row_edges(ctx: &ExtractionContext<'_>, row: &[String]) -> Option<Vec<GraphEdge>> {
    if row.len() < 3 {
        return None;
    }
    let relation_name = sanitize_business_name(&row[0]);
    let cardinality = row[1].trim().to_string();
    let link = first_wiki_link(&row[2])?;
    let to_node = qualify_as(&link.0, Kind::Entity);

    let mut out = Vec::new();
    let mut domain_relation = ctx
        .edge(
            to_node.clone(),
            EdgeType::Structural(StructuralEdge::DomainRelation),
            ExtractionMethod::SectionContent,
        )
        .with_metadata("cardinality", serde_json::json!(cardinality))
        .with_metadata("relation", serde_json::json!(relation_name));
    if let Some(alias) = link.1 {
        domain_relation = domain_relation.with_metadata("display_alias", serde_json::json!(alias));
    }
    out.push(domain_relation);

    if let Some(EdgeType::Business(name)) = EdgeType::parse(&relation_name) {
        out.push(ctx.edge(
            to_node,
            EdgeType::Business(name),
            ExtractionMethod::SectionContent,
        ));
    }
    Some(out)
}

// ----------------------------------------------------------------------------
// event / simple kinds
// ----------------------------------------------------------------------------

fn extract_event(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    ctx.wiki_edges(&ctx.links, edges);
    fields_from(vec![
        ("description", ctx.section_text(&["Descripción"])),
        ("payload", ctx.section_text(&["Payload", "Datos"])),
    ])
}

fn extract_simple(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
    fields: &[(&str, &[&str])],
) -> BTreeMap<String, serde_json::Value> {
    ctx.wiki_edges(&ctx.links, edges);
    fields_from(
        fields
            .iter()
            .map(|(key, headings)| (*key, ctx.section_text(headings)))
            .collect(),
    )
}

// ----------------------------------------------------------------------------
// business-rule / business-policy / cross-policy
// ----------------------------------------------------------------------------

fn extract_rule(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
    entity_edge: StructuralEdge,
) -> BTreeMap<String, serde_json::Value> {
    let declaration_links = ctx.links_in(&["Declaración"]);
    for link in &declaration_links {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::Entity),
            EdgeType::Structural(entity_edge),
            ExtractionMethod::SectionContent,
        ));
    }
    let remaining: Vec<&WikiLink> = ctx
        .links
        .iter()
        .copied()
        .filter(|l| !declaration_links.iter().any(|d| std::ptr::eq(*d, *l)))
        .collect();
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![
        ("declaration", ctx.section_text(&["Declaración"])),
        ("applies_when", ctx.section_text(&["Cuándo aplica"])),
    ])
}

// ----------------------------------------------------------------------------
// command
// ----------------------------------------------------------------------------

fn extract_command(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    let post_links = ctx.links_in(&["Postcondiciones"]);
    for link in &post_links {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::Event),
            EdgeType::Structural(StructuralEdge::Emits),
            ExtractionMethod::SectionContent,
        ));
    }
    let remaining: Vec<&WikiLink> = ctx
        .links
        .iter()
        .copied()
        .filter(|l| !post_links.iter().any(|p| std::ptr::eq(*p, *l)))
        .collect();
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![
        ("purpose", ctx.section_text(&["Propósito"])),
        (
            "input_params",
            ctx.section_text(&["Parámetros de Entrada", "Parámetros"]),
        ),
        ("preconditions", ctx.section_text(&["Precondiciones"])),
        ("postconditions", ctx.section_text(&["Postcondiciones"])),
        ("errors", ctx.section_text(&["Errores"])),
    ])
}

// ----------------------------------------------------------------------------
// use-case
// ----------------------------------------------------------------------------

fn objective_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bOBJ-[A-Za-z0-9_-]+\b").unwrap())
}

fn extract_use_case(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    let rule_links = ctx.links_in(&["Reglas Aplicadas"]);
    for link in &rule_links {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::BusinessRule),
            EdgeType::Structural(StructuralEdge::UcAppliesRule),
            ExtractionMethod::SectionContent,
        ));
    }
    let cmd_links = ctx.links_in(&["Comandos Ejecutados"]);
    for link in &cmd_links {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::Command),
            EdgeType::Structural(StructuralEdge::UcExecutesCmd),
            ExtractionMethod::SectionContent,
        ));
    }

    // OBJ-* references anywhere: wiki-linked or plain text.
    let mut story_targets: Vec<(String, ExtractionMethod)> = Vec::new();
    for link in &ctx.links {
        if link.target.starts_with("OBJ-") {
            story_targets.push((link.target.clone(), ExtractionMethod::WikiLink));
        }
    }
    for section in ctx.doc.all_sections() {
        for paragraph in section.paragraphs() {
            for m in objective_regex().find_iter(paragraph) {
                story_targets.push((m.as_str().to_string(), ExtractionMethod::Implicit));
            }
        }
    }
    let mut seen = std::collections::BTreeSet::new();
    for (target, method) in story_targets {
        if seen.insert(target.clone()) {
            edges.push(ctx.edge(
                Kind::Objective.node_id(&target),
                EdgeType::Structural(StructuralEdge::UcStory),
                method,
            ));
        }
    }

    let remaining: Vec<&WikiLink> = ctx
        .links
        .iter()
        .copied()
        .filter(|l| {
            !rule_links.iter().any(|r| std::ptr::eq(*r, *l))
                && !cmd_links.iter().any(|c| std::ptr::eq(*c, *l))
                && !l.target.starts_with("OBJ-")
        })
        .collect();
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![
        ("description", ctx.section_text(&["Descripción"])),
        ("preconditions", ctx.section_text(&["Precondiciones"])),
        ("main_flow", ctx.section_text(&["Flujo Principal"])),
    ])
}

// ----------------------------------------------------------------------------
// ui-view / ui-component
// ----------------------------------------------------------------------------

fn extract_ui_view(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    let component_links = ctx.links_in(&["Componentes"]);
    for link in &component_links {
        edges.push(ctx.link_edge(
            link,
            qualify_as(&link.target, Kind::UiComponent),
            EdgeType::Structural(StructuralEdge::ViewUsesComponent),
            ExtractionMethod::SectionContent,
        ));
    }
    let mut remaining = Vec::new();
    for link in &ctx.links {
        if component_links.iter().any(|c| std::ptr::eq(*c, *link)) {
            continue;
        }
        if link.target.starts_with("UC-") {
            edges.push(ctx.link_edge(
                link,
                qualify_as(&link.target, Kind::UseCase),
                EdgeType::Structural(StructuralEdge::ViewTriggersUc),
                ExtractionMethod::WikiLink,
            ));
        } else {
            remaining.push(*link);
        }
    }
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![("description", ctx.section_text(&["Descripción"]))])
}

fn extract_ui_component(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    for link in &ctx.links {
        let target = qualify_target(&link.target);
        if target.starts_with("Entity:") {
            edges.push(ctx.link_edge(
                link,
                target,
                EdgeType::Structural(StructuralEdge::ComponentUsesEntity),
                ExtractionMethod::WikiLink,
            ));
        } else {
            edges.push(ctx.link_edge(
                link,
                target,
                EdgeType::Structural(StructuralEdge::WikiLink),
                ExtractionMethod::WikiLink,
            ));
        }
    }
    fields_from(vec![("description", ctx.section_text(&["Descripción"]))])
}

// ----------------------------------------------------------------------------
// requirement / adr
// ----------------------------------------------------------------------------

fn extract_requirement(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    let trace_links = ctx.links_in(&["Trazabilidad"]);
    for link in &trace_links {
        edges.push(ctx.link_edge(
            link,
            qualify_target(&link.target),
            EdgeType::Structural(StructuralEdge::ReqTracesTo),
            ExtractionMethod::SectionContent,
        ));
    }
    let remaining: Vec<&WikiLink> = ctx
        .links
        .iter()
        .copied()
        .filter(|l| !trace_links.iter().any(|t| std::ptr::eq(*t, *l)))
        .collect();
    ctx.wiki_edges(&remaining, edges);

    fields_from(vec![("description", ctx.section_text(&["Descripción"]))])
}

fn extract_adr(
    ctx: &ExtractionContext<'_>,
    edges: &mut Vec<GraphEdge>,
) -> BTreeMap<String, serde_json::Value> {
    // An ADR decides for everything it references; no generic WIKI_LINK.
    for link in &ctx.links {
        edges.push(ctx.link_edge(
            link,
            qualify_target(&link.target),
            EdgeType::Structural(StructuralEdge::DecidesFor),
            ExtractionMethod::WikiLink,
        ));
    }
    fields_from(vec![
        ("context", ctx.section_text(&["Contexto"])),
        ("decision", ctx.section_text(&["Decisión"])),
    ])
}

// ============================================================================
// Table + name helpers
// ============================================================================

/// Parse a raw pipe-table into data rows, skipping header and separator.
pub fn parse_pipe_table(raw: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line = line.trim();
        if !line.starts_with('|') {
            continue;
        }
        let cells: Vec<String> = line
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect();
        // Separator row: every cell is dashes/colons.
        let is_separator = cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'));
        if i == 0 || is_separator {
            continue;
        }
        rows.push(cells);
    }
    rows
}

/// First `[[Target]]` or `[[Target|alias]]` in a cell.
fn first_wiki_link(cell: &str) -> Option<(String, Option<String>)> {
    let mut links = Vec::new();
    extract_cell_links(cell, &mut links);
    links.into_iter().next()
}

fn extract_cell_links(cell: &str, out: &mut Vec<(String, Option<String>)>) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\[\[([^\]|]+)(\|[^\]]+)?\]\]").unwrap());
    for caps in re.captures_iter(cell) {
        let target = caps[1].trim().to_string();
        let alias = caps
            .get(2)
            .map(|m| m.as_str().trim_start_matches('|').trim().to_string())
            .filter(|a| !a.is_empty());
        out.push((target, alias));
    }
}

/// Normalize a relation name into a lower_snake business edge name.
pub fn sanitize_business_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = true;
    for c in name.trim().chars() {
        let c = c.to_lowercase().next().unwrap_or('_');
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_document, ParseOutcome};
    use pretty_assertions::assert_eq;

    fn parse_and_extract(path: &str, text: &str, kind: Kind) -> (GraphNode, Vec<GraphEdge>) {
        let doc = match parse_document(path, text.as_bytes()) {
            ParseOutcome::Parsed(d) => *d,
            other => panic!("unexpected: {:?}", other),
        };
        extract(&doc, kind, Utc::now())
    }

    fn edge_of<'a>(edges: &'a [GraphEdge], edge_type: &str, to: &str) -> Option<&'a GraphEdge> {
        edges
            .iter()
            .find(|e| e.edge_type.as_str() == edge_type && e.to_node == to)
    }

    const PEDIDO: &str = "---\nkind: entity\naliases: [Orden, Order]\n---\n\n# Pedido\n\n## Descripción\n\nUn pedido de compra del cliente.\n\n## Relaciones\n\n| Relación | Cardinalidad | Entidad |\n|---|---|---|\n| pertenece_a | N:1 | [[Usuario]] |\n\n## Eventos Emitidos\n\n- [[PedidoCreado]]\n";

    #[test]
    fn test_entity_relations_table() {
        let (node, edges) =
            parse_and_extract("specs/01-domain/entities/Pedido.md", PEDIDO, Kind::Entity);
        assert_eq!(node.id, "Entity:Pedido");
        assert_eq!(node.kind, Kind::Entity);
        assert_eq!(node.aliases, vec!["Orden".to_string(), "Order".to_string()]);

        let relation = edge_of(&edges, "DOMAIN_RELATION", "Entity:Usuario").unwrap();
        assert_eq!(relation.metadata["cardinality"], serde_json::json!("N:1"));
        assert_eq!(relation.extraction_method, ExtractionMethod::SectionContent);

        assert!(edge_of(&edges, "pertenece_a", "Entity:Usuario").is_some());
        assert!(edge_of(&edges, "WIKI_LINK", "Entity:Usuario").is_some());
    }

    #[test]
    fn test_entity_emits() {
        let (_, edges) =
            parse_and_extract("specs/01-domain/entities/Pedido.md", PEDIDO, Kind::Entity);
        let emits = edge_of(&edges, "EMITS", "Event:PedidoCreado").unwrap();
        assert_eq!(emits.extraction_method, ExtractionMethod::SectionContent);
        // Event-section links do not double as generic wiki links.
        assert!(edge_of(&edges, "WIKI_LINK", "Event:PedidoCreado").is_none());
    }

    #[test]
    fn test_entity_indexed_fields_keys() {
        let (node, _) =
            parse_and_extract("specs/01-domain/entities/Pedido.md", PEDIDO, Kind::Entity);
        let keys: Vec<&str> = node.indexed_fields.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "attributes",
                "description",
                "invariants",
                "relations",
                "state_machine"
            ]
        );
        assert!(node.field_str("description").unwrap().contains("pedido"));
        assert!(node.field_str("relations").unwrap().contains("pertenece_a"));
    }

    #[test]
    fn test_business_rule_declaration_edges() {
        let text = "---\nkind: business-rule\n---\n\n# BR-001\n\n## Declaración\n\nUn [[Pedido]] no puede superar el crédito del [[Usuario]].\n\n## Cuándo aplica\n\nAl confirmar el pedido.\n";
        let (node, edges) = parse_and_extract(
            "specs/01-domain/rules/BR-001.md",
            text,
            Kind::BusinessRule,
        );
        assert_eq!(node.id, "BR:BR-001");
        assert!(edge_of(&edges, "ENTITY_RULE", "Entity:Pedido").is_some());
        assert!(edge_of(&edges, "ENTITY_RULE", "Entity:Usuario").is_some());
        assert!(node.field_str("declaration").unwrap().contains("crédito"));
        assert_eq!(node.field_str("applies_when"), Some("Al confirmar el pedido."));
    }

    #[test]
    fn test_command_emits_from_postconditions() {
        let text = "---\nkind: command\n---\n\n# CrearPedido\n\n## Propósito\n\nCrear un pedido nuevo.\n\n## Precondiciones\n\nEl [[Usuario]] existe.\n\n## Postcondiciones\n\nSe emite [[PedidoCreado]].\n";
        let (node, edges) = parse_and_extract(
            "specs/02-behavior/commands/CrearPedido.md",
            text,
            Kind::Command,
        );
        assert_eq!(node.id, "CMD:CrearPedido");
        assert!(edge_of(&edges, "EMITS", "Event:PedidoCreado").is_some());
        assert!(edge_of(&edges, "WIKI_LINK", "Entity:Usuario").is_some());
        let keys: Vec<&str> = node.indexed_fields.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "errors",
                "input_params",
                "postconditions",
                "preconditions",
                "purpose"
            ]
        );
    }

    #[test]
    fn test_use_case_sections_and_story() {
        let text = "---\nkind: use-case\n---\n\n# UC-001\n\n## Descripción\n\nCheckout del carrito, cumple OBJ-12.\n\n## Reglas Aplicadas\n\n- [[BR-001]]\n\n## Comandos Ejecutados\n\n- [[CrearPedido]]\n";
        let (node, edges) = parse_and_extract(
            "specs/02-behavior/use-cases/UC-001.md",
            text,
            Kind::UseCase,
        );
        assert_eq!(node.id, "UC:UC-001");
        assert!(edge_of(&edges, "UC_APPLIES_RULE", "BR:BR-001").is_some());
        assert!(edge_of(&edges, "UC_EXECUTES_CMD", "CMD:CrearPedido").is_some());
        let story = edge_of(&edges, "UC_STORY", "OBJ:OBJ-12").unwrap();
        assert_eq!(story.extraction_method, ExtractionMethod::Implicit);
    }

    #[test]
    fn test_requirement_traces() {
        let text = "---\nkind: requirement\n---\n\n# REQ-007\n\n## Descripción\n\nEl sistema registra pedidos.\n\n## Trazabilidad\n\n- [[UC-001]]\n- [[Pedido]]\n";
        let (_, edges) = parse_and_extract(
            "specs/00-requirements/REQ-007.md",
            text,
            Kind::Requirement,
        );
        assert!(edge_of(&edges, "REQ_TRACES_TO", "UC:UC-001").is_some());
        assert!(edge_of(&edges, "REQ_TRACES_TO", "Entity:Pedido").is_some());
    }

    #[test]
    fn test_adr_decides_for_everything() {
        let text = "---\nkind: adr\n---\n\n# ADR-003\n\n## Contexto\n\nNecesitamos persistencia para [[Pedido]].\n\n## Decisión\n\nUsamos eventos [[PedidoCreado]] como fuente de verdad.\n";
        let (_, edges) = parse_and_extract("specs/01-domain/ADR-003.md", text, Kind::Adr);
        assert_eq!(
            edges
                .iter()
                .filter(|e| e.edge_type.as_str() == "DECIDES_FOR")
                .count(),
            2
        );
        assert!(edges.iter().all(|e| e.edge_type.as_str() != "WIKI_LINK"));
    }

    #[test]
    fn test_cross_domain_ref() {
        let text = "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\nFactura en [[billing::Factura]].\n";
        let (_, edges) = parse_and_extract(
            "specs/domains/shop/01-domain/Pedido.md",
            text,
            Kind::Entity,
        );
        let cross = edge_of(&edges, "CROSS_DOMAIN_REF", "billing::Entity:Factura").unwrap();
        assert_eq!(cross.metadata["domain"], serde_json::json!("billing"));
    }

    #[test]
    fn test_layer_violation_classification() {
        // An entity (01-domain) referencing a use-case (02-behavior) violates.
        let text = "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\nVer [[UC-001]] y [[Usuario]].\n";
        let (_, edges) = parse_and_extract("specs/01-domain/Pedido.md", text, Kind::Entity);
        let violating = edge_of(&edges, "WIKI_LINK", "UC:UC-001").unwrap();
        assert!(violating.layer_violation);
        let fine = edge_of(&edges, "WIKI_LINK", "Entity:Usuario").unwrap();
        assert!(!fine.layer_violation);
    }

    #[test]
    fn test_validates_from_frontmatter() {
        let text = "---\nkind: requirement\nvalidates:\n  - UC-001\n---\n\n# REQ-001\n\n## Descripción\n\nCobertura BDD.\n";
        let (_, edges) = parse_and_extract(
            "specs/04-verification/REQ-001.md",
            text,
            Kind::Requirement,
        );
        let validates = edge_of(&edges, "VALIDATES", "UC:UC-001").unwrap();
        assert_eq!(validates.extraction_method, ExtractionMethod::Frontmatter);
    }

    #[test]
    fn test_qualify_target_patterns() {
        assert_eq!(qualify_target("Usuario"), "Entity:Usuario");
        assert_eq!(qualify_target("UC-001"), "UC:UC-001");
        assert_eq!(qualify_target("REQ-007"), "REQ:REQ-007");
        assert_eq!(qualify_target("Entity:Usuario"), "Entity:Usuario");
    }

    #[test]
    fn test_parse_pipe_table() {
        let raw = "| A | B |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |";
        let rows = parse_pipe_table(raw);
        assert_eq!(rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn test_sanitize_business_name() {
        assert_eq!(sanitize_business_name("pertenece_a"), "pertenece_a");
        assert_eq!(sanitize_business_name("Pertenece A"), "pertenece_a");
        assert_eq!(sanitize_business_name("  tiene--items  "), "tiene_items");
    }
}
