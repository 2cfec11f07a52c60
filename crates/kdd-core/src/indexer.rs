//! Document Indexer
//!
//! Orchestrates the write path for one file: detect → parse → route →
//! extract → chunk/embed → persist, with lifecycle events along the way.
//! An embedding failure degrades the document to L1 (partial success); a
//! write failure is fatal for the document and the staging-rename protocol
//! guarantees no partial artifacts survive it.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::chunker::{embed_document, ChunkOutcome};
use crate::document::Document;
use crate::embed::{Embedding, EmbeddingModel};
use crate::events::{EventBus, EventKind};
use crate::extract::extract;
use crate::graph::{GraphEdge, GraphNode};
use crate::parser::{compute_source_hash, parse_document, ParseOutcome, SkipReason};
use crate::rules::{route_document, IndexLevel, Routing};
use crate::store::{ArtifactStore, StoreError};

// ============================================================================
// Errors
// ============================================================================

/// Errors that fail a single document.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for indexer operations.
pub type Result<T> = std::result::Result<T, IndexerError>;

// ============================================================================
// Outcome
// ============================================================================

/// Per-document result reported to the incremental driver.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    /// Node, edges, and (at L2+) embeddings persisted.
    Indexed {
        node_id: String,
        /// Set when embedding failed and this document fell back to L1.
        degraded: bool,
    },
    /// A node with the same source hash already exists and force was off.
    Unchanged { node_id: String },
    /// No front-matter; silently skipped.
    Skipped,
    /// Front-matter present but the `kind` value is unknown or missing.
    UnknownKind { value: String },
}

// ============================================================================
// Prepared document (parallel phase output)
// ============================================================================

/// Everything computed for one file without touching the artifact store.
/// Produced by the parallel phase of the driver, consumed by the single
/// writer.
pub struct PreparedDocument {
    pub document: Document,
    pub node: GraphNode,
    pub edges: Vec<GraphEdge>,
    pub embeddings: Vec<Embedding>,
    pub degraded: bool,
}

/// Result of the read-only preparation phase.
pub enum Prepared {
    Ready(Box<PreparedDocument>),
    Unchanged { node_id: String, source_hash: String },
    Skipped { reason: SkipReason, source_hash: String },
    UnknownKind { value: String, source_hash: String },
}

// ============================================================================
// Indexer
// ============================================================================

/// The single-file write pipeline.
pub struct Indexer<'a> {
    store: &'a ArtifactStore,
    bus: &'a EventBus,
    model: Option<&'a dyn EmbeddingModel>,
    level: IndexLevel,
    /// Nodes already persisted, keyed by source file. Snapshot taken when the
    /// batch starts; the driver guarantees no two in-flight files share a
    /// node id.
    existing_by_path: HashMap<String, GraphNode>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a ArtifactStore,
        bus: &'a EventBus,
        model: Option<&'a dyn EmbeddingModel>,
        level: IndexLevel,
    ) -> Result<Self> {
        let existing_by_path = store
            .read_all_nodes()?
            .into_iter()
            .map(|n| (n.source_file.clone(), n))
            .collect();
        Ok(Self {
            store,
            bus,
            model,
            level,
            existing_by_path,
        })
    }

    /// The already-persisted node for a source path, if any.
    pub fn existing_node(&self, rel_path: &str) -> Option<&GraphNode> {
        self.existing_by_path.get(rel_path)
    }

    /// Read-only phase: parse, route, extract, chunk, embed. Safe to run on
    /// worker threads; nothing is written.
    pub fn prepare(&self, rel_path: &str, bytes: &[u8], force: bool, indexed_at: DateTime<Utc>) -> Prepared {
        let source_hash = compute_source_hash(bytes);

        if !force {
            if let Some(existing) = self.existing_by_path.get(rel_path) {
                if existing.source_hash == source_hash {
                    return Prepared::Unchanged {
                        node_id: existing.id.clone(),
                        source_hash,
                    };
                }
            }
        }

        let mut document = match parse_document(rel_path, bytes) {
            ParseOutcome::Parsed(doc) => *doc,
            ParseOutcome::Skipped { reason } => {
                return Prepared::Skipped {
                    reason,
                    source_hash,
                }
            }
        };

        let kind = match route_document(&document.front_matter, document.layer) {
            Routing::Known {
                kind,
                layer_mismatch,
            } => {
                if layer_mismatch {
                    warn!(
                        path = rel_path,
                        kind = %kind,
                        layer = %document.layer,
                        "document kind disagrees with its layer directory"
                    );
                }
                kind
            }
            Routing::Unknown { value } => {
                warn!(path = rel_path, kind = value, "unknown document kind");
                return Prepared::UnknownKind {
                    value,
                    source_hash,
                };
            }
            Routing::Missing => {
                warn!(path = rel_path, "front-matter has no kind field");
                return Prepared::UnknownKind {
                    value: String::new(),
                    source_hash,
                };
            }
        };
        document.kind = Some(kind);

        let (node, edges) = extract(&document, kind, indexed_at);

        let (embeddings, degraded) = if self.level >= IndexLevel::L2 {
            match self.model {
                Some(model) => {
                    let existing: HashMap<String, Embedding> = self
                        .store
                        .read_embeddings(kind, &document.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|e| (e.id.clone(), e))
                        .collect();
                    match embed_document(&document, kind, model, &existing, indexed_at) {
                        ChunkOutcome::Embedded(embeddings) => (embeddings, false),
                        ChunkOutcome::Degraded { reason } => {
                            warn!(path = rel_path, reason, "document degraded to L1");
                            (Vec::new(), true)
                        }
                    }
                }
                None => (Vec::new(), false),
            }
        } else {
            (Vec::new(), false)
        };

        Prepared::Ready(Box::new(PreparedDocument {
            document,
            node,
            edges,
            embeddings,
            degraded,
        }))
    }

    /// Write phase: stale-node cascade, node file, edges, embeddings, events.
    /// Must run on the single writer.
    pub fn commit(&self, rel_path: &str, prepared: Prepared, started: Instant) -> Result<IndexOutcome> {
        match prepared {
            Prepared::Unchanged { node_id, source_hash } => {
                self.bus.emit(EventKind::DocumentDetected {
                    source_path: rel_path.to_string(),
                    source_hash,
                });
                debug!(path = rel_path, "source unchanged, skipping");
                Ok(IndexOutcome::Unchanged { node_id })
            }
            Prepared::Skipped { reason, .. } => {
                // A non-front-matter file is silently skipped: no events.
                debug!(path = rel_path, reason = reason.as_str(), "file skipped");
                Ok(IndexOutcome::Skipped)
            }
            Prepared::UnknownKind { value, source_hash } => {
                self.bus.emit(EventKind::DocumentDetected {
                    source_path: rel_path.to_string(),
                    source_hash,
                });
                Ok(IndexOutcome::UnknownKind { value })
            }
            Prepared::Ready(prepared) => {
                let PreparedDocument {
                    document,
                    node,
                    edges,
                    embeddings,
                    degraded,
                } = *prepared;

                self.bus.emit(EventKind::DocumentDetected {
                    source_path: rel_path.to_string(),
                    source_hash: document.source_hash.clone(),
                });

                // A stale prior node cascades away before the rewrite. No
                // tombstone: the id is live again immediately.
                if let Some(stale) = self.existing_by_path.get(rel_path) {
                    self.bus.emit(EventKind::DocumentStale {
                        source_path: rel_path.to_string(),
                        node_id: stale.id.clone(),
                    });
                    self.store.cascade_delete(stale)?;
                }

                self.store.write_node(&node)?;
                self.store.clear_deletion(&node.id)?;
                self.store.append_edges(&edges)?;
                if !embeddings.is_empty() {
                    self.store
                        .write_embeddings(node.kind, node.document_id(), &embeddings)?;
                }

                self.bus.emit(EventKind::DocumentParsed {
                    source_path: rel_path.to_string(),
                    document_id: document.id.clone(),
                });
                self.bus.emit(EventKind::DocumentIndexed {
                    source_path: rel_path.to_string(),
                    node_id: node.id.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });

                Ok(IndexOutcome::Indexed {
                    node_id: node.id,
                    degraded,
                })
            }
        }
    }

    /// Convenience: prepare + commit in one call (single-file use).
    pub fn index_file(&self, rel_path: &str, bytes: &[u8], force: bool) -> Result<IndexOutcome> {
        let started = Instant::now();
        let prepared = self.prepare(rel_path, bytes, force, Utc::now());
        self.commit(rel_path, prepared, started)
    }
}

// ============================================================================
// Tests
// ============================================================================
