//! Index Loader
//!
//! Single-shot startup routine: manifest, then every node file, then the
//! edges stream, then the embeddings. The result feeds the in-memory graph
//! store and the vector index. Any parse error aborts the whole load with
//! the offending path; a partial load is never accepted.

use thiserror::Error;
use tracing::{info, warn};

use crate::embed::Embedding;
use crate::graph::GraphStore;
use crate::manifest::IndexManifest;
use crate::store::{ArtifactStore, StoreError};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading an index.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The artifact root has no manifest.
    #[error("no index found at {0}")]
    NoIndex(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("manifest is invalid: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;

// ============================================================================
// Loaded index
// ============================================================================

/// Everything read from one artifact root, ready for the query engine.
pub struct LoadedIndex {
    pub manifest: IndexManifest,
    pub graph: GraphStore,
    /// Embeddings in artifact order; the vector store is built from these.
    pub embeddings: Vec<Embedding>,
}

/// Load an artifact root whole.
pub fn load_index(store: &ArtifactStore) -> Result<LoadedIndex> {
    let manifest = store
        .read_manifest()?
        .ok_or_else(|| LoadError::NoIndex(store.root().display().to_string()))?;
    manifest.validate()?;

    let nodes = store.read_all_nodes()?;
    let edges = store.read_all_edges()?;
    let embeddings = store.read_all_embeddings()?;

    let actual = store.compute_stats()?;
    if actual != manifest.stats {
        warn!(
            manifest_nodes = manifest.stats.nodes,
            actual_nodes = actual.nodes,
            manifest_edges = manifest.stats.edges,
            actual_edges = actual.edges,
            "manifest stats disagree with on-disk artifacts"
        );
    }

    let graph = GraphStore::load(nodes, edges);
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        orphans = graph.orphan_edges().len(),
        embeddings = embeddings.len(),
        level = %manifest.index_level,
        "index loaded"
    );

    Ok(LoadedIndex {
        manifest,
        graph,
        embeddings,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Kind, Layer, Status};
    use crate::graph::{EdgeType, ExtractionMethod, GraphEdge, GraphNode, StructuralEdge};
    use crate::manifest::{IndexManifest, Structure};
    use crate::rules::IndexLevel;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn node(id: &str) -> GraphNode {
        GraphNode {
            id: format!("Entity:{id}"),
            kind: Kind::Entity,
            source_file: format!("specs/01-domain/{id}.md"),
            source_hash: "a".repeat(64),
            layer: Layer::Domain,
            status: Status::Draft,
            aliases: vec![],
            domain: None,
            indexed_fields: BTreeMap::new(),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_index() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(".kdd-index"));
        assert!(matches!(load_index(&store), Err(LoadError::NoIndex(_))));
    }

    #[test]
    fn test_load_roundtrip_with_orphans() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(".kdd-index"));
        store.write_node(&node("A")).unwrap();
        store.write_node(&node("B")).unwrap();
        store
            .append_edges(&[
                GraphEdge::new(
                    "Entity:A",
                    "Entity:B",
                    EdgeType::Structural(StructuralEdge::WikiLink),
                    "specs/01-domain/A.md",
                    ExtractionMethod::WikiLink,
                ),
                GraphEdge::new(
                    "Entity:A",
                    "Entity:MISSING",
                    EdgeType::Structural(StructuralEdge::WikiLink),
                    "specs/01-domain/A.md",
                    ExtractionMethod::WikiLink,
                ),
            ])
            .unwrap();

        let mut manifest = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "test");
        manifest.stats = store.compute_stats().unwrap();
        store.write_manifest(&manifest).unwrap();

        let loaded = load_index(&store).unwrap();
        assert_eq!(loaded.graph.node_count(), 2);
        assert_eq!(loaded.graph.edge_count(), 1);
        assert_eq!(loaded.graph.orphan_edges().len(), 1);
        assert_eq!(loaded.manifest.index_level, IndexLevel::L1);
    }

    #[test]
    fn test_load_rejects_corrupt_node() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join(".kdd-index");
        let store = ArtifactStore::new(&root);
        let manifest = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, "test");
        store.write_manifest(&manifest).unwrap();

        let bad = root.join("nodes").join("entity");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("Broken.json"), b"{not json").unwrap();

        match load_index(&store) {
            Err(LoadError::Store(StoreError::Parse { path, .. })) => {
                assert!(path.ends_with("Broken.json"));
            }
            other => panic!("expected parse failure, got {:?}", other.map(|_| ())),
        }
    }
}
