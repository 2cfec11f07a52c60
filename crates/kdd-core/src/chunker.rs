//! Hierarchical Chunker
//!
//! Splits the embeddable sections of a document into paragraph-sized chunks,
//! enriches each with ancestor-section summaries, and drives the embedding
//! model. Runs only at index level L2 and above.
//!
//! Chunking rules:
//! - a chunk begins at each paragraph; paragraphs under 20 words fuse into
//!   the next one (a trailing short paragraph fuses into the previous chunk)
//! - a pipe-table is always a single chunk
//! - sections whose body is only fenced blocks produce no chunks

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::document::{Block, Document, Kind, Section};
use crate::embed::{EmbedError, Embedding, EmbeddingModel};
use crate::parser::compute_text_hash;
use crate::rules::embeddable_sections;

/// Paragraphs shorter than this (in words) fuse into their neighbor.
const MIN_CHUNK_WORDS: usize = 20;

/// Ancestor summaries are the first sentence, capped at this many chars.
const MAX_SUMMARY_CHARS: usize = 160;

// ============================================================================
// Outcome
// ============================================================================

/// Result of chunking + embedding one document.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Embeddings generated (possibly reusing unchanged ones).
    Embedded(Vec<Embedding>),
    /// The provider produced vectors of the wrong dimension; the document
    /// degrades to L1.
    Degraded { reason: String },
}

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub section_path: String,
    pub chunk_index: usize,
    pub raw_text: String,
    pub context_text: String,
}

// ============================================================================
// Chunking
// ============================================================================

/// Produce the chunks of every embeddable section of a document.
pub fn chunk_document(doc: &Document, kind: Kind) -> Vec<Chunk> {
    let embeddable = embeddable_sections(kind);
    if embeddable.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut ancestors: Vec<&Section> = Vec::new();
    for section in &doc.sections {
        walk(section, &mut ancestors, embeddable, doc, kind, &mut chunks);
    }
    chunks
}

fn walk<'a>(
    section: &'a Section,
    ancestors: &mut Vec<&'a Section>,
    embeddable: &[&str],
    doc: &Document,
    kind: Kind,
    out: &mut Vec<Chunk>,
) {
    if embeddable.contains(&section.heading.as_str()) && !section.is_opaque() {
        let identity = format!("[{}: {}]", kind.as_str(), doc.id);
        let mut prefix_parts = vec![identity];
        for ancestor in ancestors.iter() {
            if let Some(summary) = summarize(ancestor) {
                prefix_parts.push(summary);
            }
        }
        let prefix = prefix_parts.join(" > ");
        for (chunk_index, raw_text) in split_section(section).into_iter().enumerate() {
            let context_text = format!("{prefix} > {raw_text}");
            out.push(Chunk {
                section_path: section.path.clone(),
                chunk_index,
                raw_text,
                context_text,
            });
        }
    }
    ancestors.push(section);
    for child in &section.children {
        walk(child, ancestors, embeddable, doc, kind, out);
    }
    ancestors.pop();
}

/// Split one section's blocks into chunk texts, applying the fusing rules.
fn split_section(section: &Section) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    let mut last_is_table = false;

    for block in &section.blocks {
        match block {
            Block::Paragraph(text) => {
                let combined = match pending.take() {
                    Some(prev) => format!("{prev}\n\n{text}"),
                    None => text.clone(),
                };
                if word_count(&combined) < MIN_CHUNK_WORDS {
                    pending = Some(combined);
                } else {
                    chunks.push(combined);
                    last_is_table = false;
                }
            }
            Block::Table(raw) => {
                // A table never fuses: flush the pending paragraph first.
                if let Some(text) = pending.take() {
                    chunks.push(text);
                }
                chunks.push(raw.clone());
                last_is_table = true;
            }
            Block::Fence { .. } => {}
        }
    }
    // The trailing short paragraph fuses into the previous chunk, unless that
    // chunk is a table.
    if let Some(rest) = pending.take() {
        match chunks.last_mut() {
            Some(last) if !last_is_table => {
                last.push_str("\n\n");
                last.push_str(&rest);
            }
            _ => chunks.push(rest),
        }
    }
    chunks
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// First sentence of a section body, capped at [`MAX_SUMMARY_CHARS`].
fn summarize(section: &Section) -> Option<String> {
    let text = section.text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let sentence_end = text
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    let sentence = &text[..sentence_end];
    let capped: String = sentence.chars().take(MAX_SUMMARY_CHARS).collect();
    Some(capped.trim().to_string())
}

// ============================================================================
// Embedding
// ============================================================================

/// Chunk a document and embed every chunk whose context hash is new.
///
/// `existing` maps embedding id to its persisted `text_hash`; matching chunks
/// reuse the prior embedding untouched (the caller keeps them). A vector of
/// the wrong dimension degrades the whole document to L1.
pub fn embed_document(
    doc: &Document,
    kind: Kind,
    model: &dyn EmbeddingModel,
    existing: &std::collections::HashMap<String, Embedding>,
    generated_at: DateTime<Utc>,
) -> ChunkOutcome {
    let expected = model.dimensions();
    let mut embeddings = Vec::new();

    for chunk in chunk_document(doc, kind) {
        let id = Embedding::make_id(&doc.id, &chunk.section_path, chunk.chunk_index);
        let text_hash = compute_text_hash(&chunk.context_text);

        if let Some(prior) = existing.get(&id) {
            if prior.text_hash == text_hash && prior.dimensions == expected {
                debug!(embedding = %id, "context unchanged, reusing embedding");
                embeddings.push(prior.clone());
                continue;
            }
        }

        let vector = match model.embed(&chunk.context_text) {
            Ok(v) => v,
            Err(EmbedError::DimensionMismatch { expected, actual }) => {
                warn!(
                    document = %doc.id,
                    expected,
                    actual,
                    "embedding dimension mismatch, degrading document to L1"
                );
                return ChunkOutcome::Degraded {
                    reason: format!("dimension mismatch: expected {expected}, got {actual}"),
                };
            }
            Err(e) => {
                warn!(document = %doc.id, error = %e, "embedding failed, degrading document to L1");
                return ChunkOutcome::Degraded {
                    reason: e.to_string(),
                };
            }
        };
        if vector.len() != expected {
            warn!(
                document = %doc.id,
                expected,
                actual = vector.len(),
                "embedding dimension mismatch, degrading document to L1"
            );
            return ChunkOutcome::Degraded {
                reason: format!("dimension mismatch: expected {expected}, got {}", vector.len()),
            };
        }

        embeddings.push(Embedding {
            id,
            document_id: doc.id.clone(),
            document_kind: kind,
            section_path: chunk.section_path,
            chunk_index: chunk.chunk_index,
            raw_text: chunk.raw_text,
            context_text: chunk.context_text,
            vector,
            model: model.model_id().to_string(),
            dimensions: expected,
            text_hash,
            generated_at,
        });
    }
    ChunkOutcome::Embedded(embeddings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_document, ParseOutcome};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct FixedModel {
        dims: usize,
    }

    impl EmbeddingModel for FixedModel {
        fn model_id(&self) -> &str {
            "test-model"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn embed(&self, text: &str) -> crate::embed::Result<Vec<f32>> {
            Ok(vec![text.len() as f32; self.dims])
        }
    }

    struct BrokenModel;

    impl EmbeddingModel for BrokenModel {
        fn model_id(&self) -> &str {
            "broken"
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn embed(&self, _text: &str) -> crate::embed::Result<Vec<f32>> {
            // Wrong length on purpose.
            Ok(vec![0.0; 3])
        }
    }

    fn parse(text: &str) -> Document {
        match parse_document("specs/01-domain/entities/Pedido.md", text.as_bytes()) {
            ParseOutcome::Parsed(d) => *d,
            other => panic!("unexpected: {:?}", other),
        }
    }

    const LONG_PARA: &str = "Un pedido de compra representa la intención firme del cliente de adquirir los artículos del carrito con un precio congelado.";

    #[test]
    fn test_entity_embeds_only_description() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n{LONG_PARA}\n\n## Atributos\n\nid, total, estado y fecha de creación del registro.\n"
        );
        let doc = parse(&text);
        let chunks = chunk_document(&doc, Kind::Entity);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, "Pedido.Descripción");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_event_never_embeds() {
        let text = "---\nkind: event\n---\n\n# PedidoCreado\n\n## Descripción\n\nEvento emitido al crear un pedido nuevo en el sistema con todos sus datos.\n";
        let doc = parse(text);
        assert!(chunk_document(&doc, Kind::Event).is_empty());
    }

    #[test]
    fn test_short_paragraph_fuses_forward() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\nResumen corto.\n\n{LONG_PARA}\n"
        );
        let doc = parse(&text);
        let chunks = chunk_document(&doc, Kind::Entity);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].raw_text.starts_with("Resumen corto."));
        assert!(chunks[0].raw_text.contains("intención firme"));
    }

    #[test]
    fn test_trailing_short_paragraph_fuses_backward() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n{LONG_PARA}\n\nNota final corta.\n"
        );
        let doc = parse(&text);
        let chunks = chunk_document(&doc, Kind::Entity);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].raw_text.ends_with("Nota final corta."));
    }

    #[test]
    fn test_table_is_single_chunk() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n{LONG_PARA}\n\n| Campo | Tipo |\n|---|---|\n| id | uuid |\n"
        );
        let doc = parse(&text);
        let chunks = chunk_document(&doc, Kind::Entity);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].raw_text.starts_with("| Campo"));
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_mermaid_only_section_yields_nothing() {
        let text = "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n```mermaid\ngraph TD; A-->B\n```\n";
        let doc = parse(text);
        assert!(chunk_document(&doc, Kind::Entity).is_empty());
    }

    #[test]
    fn test_context_text_carries_identity_and_ancestors() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\nEl agregado raíz del dominio de compras.\n\n## Descripción\n\n{LONG_PARA}\n"
        );
        let doc = parse(&text);
        let chunks = chunk_document(&doc, Kind::Entity);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].context_text.starts_with("[entity: Pedido]"));
        assert!(chunks[0]
            .context_text
            .contains("El agregado raíz del dominio de compras."));
        assert!(chunks[0].context_text.ends_with(&chunks[0].raw_text));
    }

    #[test]
    fn test_embed_document_reuses_unchanged() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n{LONG_PARA}\n"
        );
        let doc = parse(&text);
        let model = FixedModel { dims: 4 };

        let first = match embed_document(&doc, Kind::Entity, &model, &HashMap::new(), Utc::now()) {
            ChunkOutcome::Embedded(e) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dimensions, 4);

        let existing: HashMap<String, Embedding> =
            first.iter().map(|e| (e.id.clone(), e.clone())).collect();
        let second = match embed_document(&doc, Kind::Entity, &model, &existing, Utc::now()) {
            ChunkOutcome::Embedded(e) => e,
            other => panic!("unexpected: {:?}", other),
        };
        // Reused, including the original timestamp.
        assert_eq!(second[0].generated_at, first[0].generated_at);
    }

    #[test]
    fn test_dimension_mismatch_degrades() {
        let text = format!(
            "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\n{LONG_PARA}\n"
        );
        let doc = parse(&text);
        let outcome = embed_document(&doc, Kind::Entity, &BrokenModel, &HashMap::new(), Utc::now());
        assert!(matches!(outcome, ChunkOutcome::Degraded { .. }));
    }
}
