//! Document Model for KDD Artifacts
//!
//! This module defines the ephemeral per-ingestion representation of a parsed
//! specification document: front-matter, section tree, wiki-links, and the
//! closed sets of artifact kinds, layers, and statuses shared by the whole
//! pipeline.
//!
//! A `Document` is produced by the parser, consumed by the extractors and the
//! chunker, and never persisted.

use serde::{Deserialize, Serialize};

// ============================================================================
// Kind
// ============================================================================

/// The closed set of recognized KDD artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Entity,
    Event,
    BusinessRule,
    BusinessPolicy,
    CrossPolicy,
    Command,
    Query,
    Process,
    UseCase,
    UiView,
    UiComponent,
    Requirement,
    Objective,
    Prd,
    Adr,
}

/// All kinds, in declaration order. Used for directory scans and hint
/// resolution prefix trials.
pub const ALL_KINDS: [Kind; 15] = [
    Kind::Entity,
    Kind::Event,
    Kind::BusinessRule,
    Kind::BusinessPolicy,
    Kind::CrossPolicy,
    Kind::Command,
    Kind::Query,
    Kind::Process,
    Kind::UseCase,
    Kind::UiView,
    Kind::UiComponent,
    Kind::Requirement,
    Kind::Objective,
    Kind::Prd,
    Kind::Adr,
];

impl Kind {
    /// Front-matter value for this kind (e.g. `business-rule`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Entity => "entity",
            Kind::Event => "event",
            Kind::BusinessRule => "business-rule",
            Kind::BusinessPolicy => "business-policy",
            Kind::CrossPolicy => "cross-policy",
            Kind::Command => "command",
            Kind::Query => "query",
            Kind::Process => "process",
            Kind::UseCase => "use-case",
            Kind::UiView => "ui-view",
            Kind::UiComponent => "ui-component",
            Kind::Requirement => "requirement",
            Kind::Objective => "objective",
            Kind::Prd => "prd",
            Kind::Adr => "adr",
        }
    }

    /// Node id prefix for this kind (`Entity:Pedido`, `UC:UC-001`, ...).
    pub fn node_prefix(&self) -> &'static str {
        match self {
            Kind::Entity => "Entity",
            Kind::Event => "Event",
            Kind::BusinessRule => "BR",
            Kind::BusinessPolicy => "BP",
            Kind::CrossPolicy => "XP",
            Kind::Command => "CMD",
            Kind::Query => "QRY",
            Kind::Process => "PRC",
            Kind::UseCase => "UC",
            Kind::UiView => "View",
            Kind::UiComponent => "Component",
            Kind::Requirement => "REQ",
            Kind::Objective => "OBJ",
            Kind::Prd => "PRD",
            Kind::Adr => "ADR",
        }
    }

    /// Build the globally unique node id for a document of this kind.
    pub fn node_id(&self, document_id: &str) -> String {
        format!("{}:{}", self.node_prefix(), document_id)
    }
}

/// Parse a front-matter `kind` value.
pub fn parse_kind(value: &str) -> Option<Kind> {
    ALL_KINDS.iter().copied().find(|k| k.as_str() == value)
}

/// Parse a node id prefix (`Entity`, `UC`, ...).
pub fn parse_node_prefix(prefix: &str) -> Option<Kind> {
    ALL_KINDS.iter().copied().find(|k| k.node_prefix() == prefix)
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Layer
// ============================================================================

/// Directory-derived layer classification.
///
/// Layers `01`..`04` define a strict dependency order; `00-requirements` is
/// exempt in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    #[serde(rename = "00-requirements")]
    Requirements,
    #[serde(rename = "01-domain")]
    Domain,
    #[serde(rename = "02-behavior")]
    Behavior,
    #[serde(rename = "03-experience")]
    Experience,
    #[serde(rename = "04-verification")]
    Verification,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Requirements => "00-requirements",
            Layer::Domain => "01-domain",
            Layer::Behavior => "02-behavior",
            Layer::Experience => "03-experience",
            Layer::Verification => "04-verification",
        }
    }

    /// Numeric prefix of the layer directory.
    pub fn number(&self) -> u8 {
        match self {
            Layer::Requirements => 0,
            Layer::Domain => 1,
            Layer::Behavior => 2,
            Layer::Experience => 3,
            Layer::Verification => 4,
        }
    }
}

/// Parse a layer directory name (`01-domain`).
pub fn parse_layer(value: &str) -> Option<Layer> {
    match value {
        "00-requirements" => Some(Layer::Requirements),
        "01-domain" => Some(Layer::Domain),
        "02-behavior" => Some(Layer::Behavior),
        "03-experience" => Some(Layer::Experience),
        "04-verification" => Some(Layer::Verification),
        _ => None,
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status carried in front-matter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Review,
    Approved,
    Deprecated,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Review => "review",
            Status::Approved => "approved",
            Status::Deprecated => "deprecated",
        }
    }
}

/// Parse a front-matter `status` value. Unknown values fall back to draft.
pub fn parse_status(value: &str) -> Status {
    match value {
        "review" => Status::Review,
        "approved" => Status::Approved,
        "deprecated" => Status::Deprecated,
        _ => Status::Draft,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// A content block inside a section.
///
/// Tables and fenced blocks are captured as raw source text so they
/// round-trip exactly; fenced blocks never produce chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// A paragraph, blank-line separated, with soft line breaks collapsed.
    Paragraph(String),
    /// A whole pipe-table, raw.
    Table(String),
    /// A fenced code block (including `mermaid`), raw, with its info string.
    Fence { info: String, raw: String },
}

/// A node in the section tree. ATX headings `#`..`######` define nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text, trimmed.
    pub heading: String,
    /// ATX level, 1..=6.
    pub level: u8,
    /// Dotted path from the root (`Reglas.Declaración`).
    pub path: String,
    /// Blocks in source order.
    pub blocks: Vec<Block>,
    /// Child sections in source order.
    pub children: Vec<Section>,
}

impl Section {
    /// Paragraph texts of this section, in order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Paragraph(p) => Some(p.as_str()),
            _ => None,
        })
    }

    /// Raw pipe-tables of this section, in order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Table(t) => Some(t.as_str()),
            _ => None,
        })
    }

    /// True when the section body consists only of fenced blocks (or is
    /// empty). Such sections never produce chunks.
    pub fn is_opaque(&self) -> bool {
        self.blocks.iter().all(|b| matches!(b, Block::Fence { .. }))
    }

    /// Concatenated paragraph text, used for summaries and field extraction.
    pub fn text(&self) -> String {
        self.paragraphs().collect::<Vec<_>>().join("\n\n")
    }
}

// ============================================================================
// Wiki-links
// ============================================================================

/// A `[[Target]]` or `[[Target|alias]]` reference, in order of occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink {
    /// Raw target, before any cross-domain splitting.
    pub target: String,
    /// Display alias, when present.
    pub alias: Option<String>,
    /// Dotted path of the originating section (empty for preamble text).
    pub section_path: String,
}

impl WikiLink {
    /// Split a cross-domain target `other-domain::Target` into its parts.
    pub fn cross_domain(&self) -> Option<(&str, &str)> {
        self.target.split_once("::")
    }
}

// ============================================================================
// Document
// ============================================================================

/// Parsed front-matter: an order-preserving YAML mapping plus typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter(pub serde_yaml::Mapping);

impl FrontMatter {
    /// String value of a scalar field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// String list value: either a YAML sequence of scalars or a single
    /// scalar promoted to a one-element list.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(serde_yaml::Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// A parsed KDD artifact, alive only for the duration of one ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document id: the source file stem (`Pedido` for `Pedido.md`).
    pub id: String,
    /// Kind, resolved by routing after parsing. `None` until routed.
    pub kind: Option<Kind>,
    /// Source path relative to the spec root.
    pub source_path: String,
    /// SHA-256 of the full raw file bytes, hex-encoded.
    pub source_hash: String,
    /// Layer derived from the path.
    pub layer: Layer,
    /// Domain from a `domains/<name>/` path segment, when present.
    pub domain: Option<String>,
    /// Front-matter mapping, order preserved.
    pub front_matter: FrontMatter,
    /// Top-level sections in source order.
    pub sections: Vec<Section>,
    /// Wiki-links in order of occurrence.
    pub wiki_links: Vec<WikiLink>,
}

impl Document {
    /// Depth-first iteration over all sections.
    pub fn all_sections(&self) -> Vec<&Section> {
        fn walk<'a>(sections: &'a [Section], out: &mut Vec<&'a Section>) {
            for s in sections {
                out.push(s);
                walk(&s.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.sections, &mut out);
        out
    }

    /// Find a section by heading, searching the whole tree in source order.
    pub fn section(&self, heading: &str) -> Option<&Section> {
        self.all_sections().into_iter().find(|s| s.heading == heading)
    }

    /// Wiki-links originating in a section (by exact heading match on the
    /// final path segment).
    pub fn links_in_section(&self, heading: &str) -> Vec<&WikiLink> {
        self.wiki_links
            .iter()
            .filter(|l| {
                l.section_path == heading
                    || l.section_path.ends_with(&format!(".{heading}"))
            })
            .collect()
    }

    /// Aliases from front-matter.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = self.front_matter.get_str_list("aliases");
        aliases.dedup();
        aliases
    }

    /// Status from front-matter, defaulting to draft.
    pub fn status(&self) -> Status {
        self.front_matter
            .get_str("status")
            .map(parse_status)
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in ALL_KINDS {
            assert_eq!(parse_kind(kind.as_str()), Some(kind));
            assert_eq!(parse_node_prefix(kind.node_prefix()), Some(kind));
        }
        assert_eq!(parse_kind("widget"), None);
    }

    #[test]
    fn test_kind_serde_kebab() {
        let json = serde_json::to_string(&Kind::BusinessRule).unwrap();
        assert_eq!(json, "\"business-rule\"");
        let kind: Kind = serde_json::from_str("\"use-case\"").unwrap();
        assert_eq!(kind, Kind::UseCase);
    }

    #[test]
    fn test_node_id() {
        assert_eq!(Kind::Entity.node_id("Pedido"), "Entity:Pedido");
        assert_eq!(Kind::UseCase.node_id("UC-001"), "UC:UC-001");
    }

    #[test]
    fn test_layer_order() {
        assert!(Layer::Domain.number() < Layer::Behavior.number());
        assert_eq!(parse_layer("04-verification"), Some(Layer::Verification));
        assert_eq!(parse_layer("05-extras"), None);
    }

    #[test]
    fn test_layer_serde() {
        let json = serde_json::to_string(&Layer::Domain).unwrap();
        assert_eq!(json, "\"01-domain\"");
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(parse_status("approved"), Status::Approved);
        assert_eq!(parse_status("wip"), Status::Draft);
    }

    #[test]
    fn test_wiki_link_cross_domain() {
        let link = WikiLink {
            target: "billing::Factura".to_string(),
            alias: None,
            section_path: String::new(),
        };
        assert_eq!(link.cross_domain(), Some(("billing", "Factura")));

        let plain = WikiLink {
            target: "Factura".to_string(),
            alias: None,
            section_path: String::new(),
        };
        assert_eq!(plain.cross_domain(), None);
    }

    #[test]
    fn test_front_matter_list_promotion() {
        let yaml: serde_yaml::Mapping =
            serde_yaml::from_str("kind: entity\naliases: Orden\n").unwrap();
        let fm = FrontMatter(yaml);
        assert_eq!(fm.get_str("kind"), Some("entity"));
        assert_eq!(fm.get_str_list("aliases"), vec!["Orden".to_string()]);
    }

    #[test]
    fn test_section_opaque() {
        let section = Section {
            heading: "Diagrama".to_string(),
            level: 2,
            path: "Diagrama".to_string(),
            blocks: vec![Block::Fence {
                info: "mermaid".to_string(),
                raw: "graph TD; A-->B".to_string(),
            }],
            children: vec![],
        };
        assert!(section.is_opaque());
    }
}
