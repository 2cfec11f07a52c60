//! KDD Core - Deterministic ingestion of structured specification documents
//!
//! This crate provides the write path and the shared data model of the KDD
//! engine:
//! - Markdown + front-matter parsing into typed documents
//! - Per-kind extraction of graph nodes and typed edges
//! - Hierarchical chunking and embedding orchestration
//! - The on-disk artifact store (`.kdd-index/`) with canonical JSON output
//! - The in-memory graph store with adjacency, lexical, and orphan indices
//! - Incremental updates driven by a version-control diff
//! - Merging of independently produced indexes
//!
//! Two machines indexing the same inputs produce byte-identical artifacts.

pub mod canonical;
pub mod chunker;
pub mod document;
pub mod embed;
pub mod events;
pub mod extract;
pub mod graph;
pub mod incremental;
pub mod indexer;
pub mod loader;
pub mod manifest;
pub mod merge;
pub mod parser;
pub mod rules;
pub mod store;
pub mod vcs;

// Re-exports for convenience
pub use document::{parse_kind, parse_node_prefix, Document, FrontMatter, Kind, Layer, Status, ALL_KINDS};
pub use embed::{EmbedError, Embedding, EmbeddingModel};
pub use events::{Event, EventBus, EventConsumer, EventKind, LogConsumer};
pub use graph::{
    EdgeType, ExtractionMethod, GraphEdge, GraphNode, GraphStore, OrphanEdge, OrphanReason,
    ReachedNode, StructuralEdge, Traversal, TraversalDirection, TraverseOptions,
    ALL_STRUCTURAL_EDGES,
};
pub use incremental::{FileFailure, IncrementalDriver, UpdateOptions, UpdateOutcome};
pub use indexer::{IndexOutcome, Indexer};
pub use loader::{load_index, LoadedIndex};
pub use manifest::{IndexManifest, ManifestError, ManifestStats, Structure};
pub use merge::{merge_indexes, MergeError, MergeOutcome, MergeStrategy};
pub use parser::{compute_source_hash, compute_text_hash, parse_document, ParseOutcome, SkipReason};
pub use rules::{
    detect_index_level, embeddable_sections, is_layer_violation, layer_of_path, route_document,
    Capabilities, IndexLevel, Routing,
};
pub use store::{ArtifactStore, StoreError, StoreLock, DEFAULT_ROOT};
pub use vcs::{DiffEntry, DiffStatus, GitCli, VcsDiff, VcsError};
