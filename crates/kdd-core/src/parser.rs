//! Document Parser
//!
//! Turns a source file (path + bytes) into a [`Document`]: front-matter,
//! section tree, wiki-links, content hash. Files without a front-matter block
//! are skipped silently; routing of the `kind` field happens later in the
//! rule engine.
//!
//! The section lexer rides on pulldown-cmark's offset iterator so that pipe
//! tables and fenced blocks are captured as exact raw source slices and
//! round-trip byte-identically through the artifact store.

use std::mem::discriminant;
use std::sync::OnceLock;

use pulldown_cmark::{
    CodeBlockKind, Event, HeadingLevel, Options, Parser as MarkdownParser, Tag, TagEnd,
};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::document::{Block, Document, FrontMatter, Section, WikiLink};
use crate::rules::{domain_of_path, layer_of_path};

// ============================================================================
// Outcome
// ============================================================================

/// Why a file produced no document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No front-matter block at byte 0, or the block is not a YAML mapping.
    NoFrontMatter,
    /// Not a Markdown file.
    NotMarkdown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoFrontMatter => "no_front_matter",
            SkipReason::NotMarkdown => "not_markdown",
        }
    }
}

/// Result of parsing one file.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(Box<Document>),
    Skipped { reason: SkipReason },
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of the full raw file bytes (not normalized), hex-encoded.
pub fn compute_source_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a text, hex-encoded. Used for embedding context hashes.
pub fn compute_text_hash(text: &str) -> String {
    compute_source_hash(text.as_bytes())
}

// ============================================================================
// Wiki-links
// ============================================================================

fn wiki_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]|]+)(\|[^\]]+)?\]\]").unwrap())
}

fn extract_wiki_links(text: &str, section_path: &str, out: &mut Vec<WikiLink>) {
    for caps in wiki_link_regex().captures_iter(text) {
        let target = caps[1].trim().to_string();
        if target.is_empty() {
            continue;
        }
        let alias = caps
            .get(2)
            .map(|m| m.as_str().trim_start_matches('|').trim().to_string())
            .filter(|a| !a.is_empty());
        out.push(WikiLink {
            target,
            alias,
            section_path: section_path.to_string(),
        });
    }
}

// ============================================================================
// Front-matter
// ============================================================================

/// Split the front-matter block off the body. The block must start at byte 0
/// with a `---` fence line and end at the next `---` (or `...`) fence.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;
    for fence in ["\n---", "\n..."] {
        if let Some(end) = rest.find(fence) {
            let yaml = &rest[..end];
            let after = &rest[end + fence.len()..];
            // The closing fence must terminate its own line.
            let body = if let Some(b) = after
                .strip_prefix("\r\n")
                .or_else(|| after.strip_prefix('\n'))
            {
                b
            } else if after.is_empty() {
                ""
            } else {
                continue;
            };
            return Some((yaml, body));
        }
    }
    None
}

// ============================================================================
// Parser
// ============================================================================

/// Parse one source file into a [`Document`].
///
/// `source_path` is the path relative to the spec root and determines layer
/// and domain; `bytes` are hashed as-is.
pub fn parse_document(source_path: &str, bytes: &[u8]) -> ParseOutcome {
    if !source_path.ends_with(".md") {
        return ParseOutcome::Skipped {
            reason: SkipReason::NotMarkdown,
        };
    }

    let source_hash = compute_source_hash(bytes);
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let Some((yaml, body)) = split_front_matter(text) else {
        return ParseOutcome::Skipped {
            reason: SkipReason::NoFrontMatter,
        };
    };
    let mapping = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(serde_yaml::Value::Mapping(m)) => m,
        Ok(_) | Err(_) => {
            return ParseOutcome::Skipped {
                reason: SkipReason::NoFrontMatter,
            }
        }
    };

    let id = std::path::Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_path.to_string());

    let mut wiki_links = Vec::new();
    let sections = lex_sections(body, &mut wiki_links);

    ParseOutcome::Parsed(Box::new(Document {
        id,
        kind: None,
        source_path: source_path.to_string(),
        source_hash,
        layer: layer_of_path(source_path),
        domain: domain_of_path(source_path),
        front_matter: FrontMatter(mapping),
        sections,
        wiki_links,
    }))
}

// ============================================================================
// Section lexing
// ============================================================================

/// Lex the Markdown body into a section tree, recording wiki-links in order
/// of occurrence with their originating section path.
fn lex_sections(body: &str, wiki_links: &mut Vec<WikiLink>) -> Vec<Section> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);

    let mut roots: Vec<Section> = Vec::new();
    let mut stack: Vec<Section> = Vec::new();

    let mut iter = MarkdownParser::new_ext(body, options).into_offset_iter();
    while let Some((event, range)) = iter.next() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                let heading = collect_inline_text(&mut iter, TagEnd::Heading(level));
                let level = heading_level_number(level);
                close_to_level(&mut stack, &mut roots, level);
                let path = match stack.last() {
                    Some(parent) => format!("{}.{}", parent.path, heading),
                    None => heading.clone(),
                };
                stack.push(Section {
                    heading,
                    level,
                    path,
                    blocks: Vec::new(),
                    children: Vec::new(),
                });
            }
            Event::Start(Tag::Table(_)) => {
                let raw = slice_block(body, &range);
                record_links(&stack, &raw, wiki_links);
                push_block(&mut stack, Block::Table(raw));
                skip_to_end(&mut iter, discriminant(&TagEnd::Table));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let info = match kind {
                    CodeBlockKind::Fenced(info) => info.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                let raw = slice_block(body, &range);
                push_block(&mut stack, Block::Fence { info, raw });
                skip_to_end(&mut iter, discriminant(&TagEnd::CodeBlock));
            }
            Event::Start(Tag::Paragraph) => {
                let raw = slice_block(body, &range);
                record_links(&stack, &raw, wiki_links);
                push_block(&mut stack, Block::Paragraph(raw));
                skip_to_end(&mut iter, discriminant(&TagEnd::Paragraph));
            }
            Event::Start(Tag::List(_)) => {
                // Lists are captured whole as a single paragraph-like block;
                // their items still contribute wiki-links in source order.
                let raw = slice_block(body, &range);
                record_links(&stack, &raw, wiki_links);
                push_block(&mut stack, Block::Paragraph(raw));
                skip_to_end(&mut iter, discriminant(&TagEnd::List(false)));
            }
            Event::Start(tag @ Tag::BlockQuote(_)) => {
                let raw = slice_block(body, &range);
                record_links(&stack, &raw, wiki_links);
                push_block(&mut stack, Block::Paragraph(raw));
                skip_to_end(&mut iter, discriminant(&TagEnd::from(tag)));
            }
            _ => {}
        }
    }
    while let Some(section) = stack.pop() {
        attach(&mut stack, &mut roots, section);
    }
    roots
}

fn heading_level_number(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn slice_block(body: &str, range: &std::ops::Range<usize>) -> String {
    body[range.clone()].trim_end().to_string()
}

fn record_links(stack: &[Section], raw: &str, wiki_links: &mut Vec<WikiLink>) {
    let path = stack.last().map(|s| s.path.as_str()).unwrap_or("");
    extract_wiki_links(raw, path, wiki_links);
}

fn push_block(stack: &mut [Section], block: Block) {
    if let Some(open) = stack.last_mut() {
        open.blocks.push(block);
    }
    // Preamble blocks before the first heading are dropped; their wiki-links
    // were already recorded with an empty section path.
}

/// Pop sections with level >= `level`, attaching each to its parent.
fn close_to_level(stack: &mut Vec<Section>, roots: &mut Vec<Section>, level: u8) {
    while stack.last().is_some_and(|s| s.level >= level) {
        let section = stack.pop().expect("stack checked non-empty");
        attach(stack, roots, section);
    }
}

fn attach(stack: &mut [Section], roots: &mut Vec<Section>, section: Section) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(section),
        None => roots.push(section),
    }
}

fn collect_inline_text<'a, I>(iter: &mut I, end: TagEnd) -> String
where
    I: Iterator<Item = (Event<'a>, std::ops::Range<usize>)>,
{
    let mut text = String::new();
    for (event, _) in iter.by_ref() {
        match event {
            Event::Text(t) => text.push_str(&t),
            Event::Code(c) => text.push_str(&c),
            Event::End(tag) if discriminant(&tag) == discriminant(&end) => break,
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Skip events until the matching end tag, tolerating nesting of the same
/// element kind (payloads like list ordering are ignored).
fn skip_to_end<'a, I>(iter: &mut I, end: std::mem::Discriminant<TagEnd>)
where
    I: Iterator<Item = (Event<'a>, std::ops::Range<usize>)>,
{
    let mut depth = 0usize;
    for (event, _) in iter.by_ref() {
        match event {
            Event::Start(ref tag) if discriminant(&TagEnd::from(tag.clone())) == end => {
                depth += 1;
            }
            Event::End(tag) if discriminant(&tag) == end => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
