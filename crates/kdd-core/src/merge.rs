//! Merge Engine
//!
//! Reconciles several artifact roots into one: last-write-wins on node
//! conflicts, delete-wins via tombstones, edge union keyed by
//! (from, to, type). All validation and conflict resolution happens before
//! the first byte is written, so a fatal merge never leaves a partial
//! output behind.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::events::{EventBus, EventKind};
use crate::graph::{GraphEdge, GraphNode};
use crate::manifest::{IndexManifest, ManifestError, Structure};
use crate::rules::{resolve_node_conflict, IndexLevel, Winner};
use crate::store::{ArtifactStore, StoreError};

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort a merge. All fatal; no partial merge survives.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge needs at least two sources, got {0}")]
    InsufficientSources(usize),

    #[error("source has no manifest: {0}")]
    MissingManifest(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("conflicting node {node_id} rejected under fail_on_conflict")]
    ConflictRejected { node_id: String },
}

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

// ============================================================================
// Strategy + outcome
// ============================================================================

/// How node conflicts (same id, different source hash) are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    #[default]
    LastWriteWins,
    FailOnConflict,
}

/// Summary of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub nodes: usize,
    pub edges: usize,
    pub embeddings: usize,
    pub conflicts_resolved: usize,
    pub tombstoned: usize,
}

// ============================================================================
// Merge
// ============================================================================

/// Merge `sources` (in order) into `output`.
pub fn merge_indexes(
    sources: &[ArtifactStore],
    output: &ArtifactStore,
    strategy: MergeStrategy,
    bus: &EventBus,
) -> Result<MergeOutcome> {
    if sources.len() < 2 {
        return Err(MergeError::InsufficientSources(sources.len()));
    }
    bus.emit(EventKind::IndexMergeRequested {
        sources: sources.len(),
    });

    // Phase 1: validation. Nothing is written until everything checks out.
    let mut manifests = Vec::with_capacity(sources.len());
    for source in sources {
        let manifest = source
            .read_manifest()?
            .ok_or_else(|| MergeError::MissingManifest(source.root().display().to_string()))?;
        manifest.validate()?;
        manifests.push(manifest);
    }
    let reference = &manifests[0];
    for other in &manifests[1..] {
        reference.check_compatible(other)?;
    }

    // Phase 2: in-memory resolution.
    // node id -> (source index, node), later sources appended after earlier.
    let mut candidates: BTreeMap<String, Vec<(usize, GraphNode)>> = BTreeMap::new();
    let mut tombstones: BTreeSet<String> = BTreeSet::new();
    for (i, source) in sources.iter().enumerate() {
        for node in source.read_all_nodes()? {
            candidates.entry(node.id.clone()).or_default().push((i, node));
        }
        tombstones.extend(source.read_deletions()?);
    }

    let tombstoned = candidates
        .keys()
        .filter(|id| tombstones.contains(*id))
        .count();
    candidates.retain(|id, _| !tombstones.contains(id));

    let mut conflicts_resolved = 0usize;
    let mut winners: BTreeMap<String, (usize, GraphNode)> = BTreeMap::new();
    for (id, mut entries) in candidates {
        let distinct_hashes: BTreeSet<&str> = entries
            .iter()
            .map(|(_, n)| n.source_hash.as_str())
            .collect();
        if distinct_hashes.len() > 1 {
            if strategy == MergeStrategy::FailOnConflict {
                return Err(MergeError::ConflictRejected { node_id: id });
            }
            conflicts_resolved += 1;
            let mut winner = entries.remove(0);
            for entry in entries {
                winner = match resolve_node_conflict(&winner.1, &entry.1) {
                    Winner::First => winner,
                    Winner::Second => entry,
                };
            }
            debug!(node = %id, source = winner.0, "node conflict resolved");
            winners.insert(id, winner);
        } else {
            winners.insert(id, entries.remove(0));
        }
    }

    // Edge union, keyed by (from, to, type); duplicates absorb metadata.
    // Edges touching a tombstoned id are dropped entirely.
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut edge_index: BTreeMap<(String, String, String), usize> = BTreeMap::new();
    for source in sources {
        for edge in source.read_all_edges()? {
            if tombstones.contains(&edge.from_node) || tombstones.contains(&edge.to_node) {
                continue;
            }
            match edge_index.get(&edge.key()) {
                Some(&i) => edges[i].absorb(&edge),
                None => {
                    edge_index.insert(edge.key(), edges.len());
                    edges.push(edge);
                }
            }
        }
    }

    // Phase 3: write the output root.
    let merged_level = manifests
        .iter()
        .map(|m| m.index_level)
        .min()
        .unwrap_or(IndexLevel::L1);

    let mut embeddings_count = 0usize;
    for (_, (source_index, node)) in &winners {
        output.write_node(node)?;
        if merged_level >= IndexLevel::L2 {
            // Losers' embeddings are discarded with their nodes.
            let embeddings =
                sources[*source_index].read_embeddings(node.kind, node.document_id())?;
            embeddings_count += embeddings.len();
            output.write_embeddings(node.kind, node.document_id(), &embeddings)?;
        }
        if let Some(enrichment) =
            sources[*source_index].read_enrichment(node.document_id())?
        {
            output.write_enrichment(node.document_id(), &enrichment)?;
        }
    }
    output.rewrite_edges(&edges)?;

    let mut domains: BTreeSet<String> = BTreeSet::new();
    for manifest in &manifests {
        if let Some(d) = &manifest.domains {
            domains.extend(d.iter().cloned());
        }
    }

    let mut manifest = IndexManifest::new(reference.structure, merged_level, "merge");
    if merged_level >= IndexLevel::L2 {
        manifest.embedding_model = reference.embedding_model.clone();
        manifest.embedding_dimensions = reference.embedding_dimensions;
    }
    manifest.structure = reference.structure;
    manifest.domains = match reference.structure {
        Structure::MultiDomain => Some(domains.into_iter().collect()),
        Structure::SingleDomain => None,
    };
    manifest.stats = output.compute_stats()?;
    manifest.indexed_at = Utc::now();
    output.write_manifest(&manifest)?;

    let outcome = MergeOutcome {
        nodes: manifest.stats.nodes,
        edges: manifest.stats.edges,
        embeddings: manifest.stats.embeddings,
        conflicts_resolved,
        tombstoned,
    };
    bus.emit(EventKind::IndexMergeCompleted { conflicts_resolved });
    info!(
        nodes = outcome.nodes,
        edges = outcome.edges,
        conflicts = conflicts_resolved,
        "merge complete"
    );
    Ok(outcome)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Kind, Layer, Status};
    use crate::embed::Embedding;
    use crate::graph::{EdgeType, ExtractionMethod, StructuralEdge};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap as Map;
    use tempfile::TempDir;

    fn node(id: &str, hash: &str, secs: i64) -> GraphNode {
        GraphNode {
            id: format!("Entity:{id}"),
            kind: Kind::Entity,
            source_file: format!("specs/01-domain/{id}.md"),
            source_hash: hash.to_string(),
            layer: Layer::Domain,
            status: Status::Draft,
            aliases: vec![],
            domain: None,
            indexed_fields: Map::new(),
            indexed_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn embedding(doc: &str, model: &str) -> Embedding {
        Embedding {
            id: format!("{doc}:{doc}.Descripción:0"),
            document_id: doc.to_string(),
            document_kind: Kind::Entity,
            section_path: format!("{doc}.Descripción"),
            chunk_index: 0,
            raw_text: "texto".to_string(),
            context_text: format!("[entity: {doc}] > texto"),
            vector: vec![0.1, 0.2],
            model: model.to_string(),
            dimensions: 2,
            text_hash: "h".repeat(64),
            generated_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    fn l2_store(dir: &TempDir, name: &str, model: &str) -> ArtifactStore {
        let store = ArtifactStore::new(dir.path().join(name));
        let mut manifest = IndexManifest::new(Structure::SingleDomain, IndexLevel::L1, name)
            .with_embeddings(model, 2);
        manifest.stats = store.compute_stats().unwrap();
        store.write_manifest(&manifest).unwrap();
        store
    }

    fn refresh_manifest(store: &ArtifactStore) {
        let mut manifest = store.read_manifest().unwrap().unwrap();
        manifest.stats = store.compute_stats().unwrap();
        store.write_manifest(&manifest).unwrap();
    }

    #[test]
    fn test_merge_conflict_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "nomic-embed-text-v1.5");
        let b = l2_store(&dir, "b", "nomic-embed-text-v1.5");
        let out = ArtifactStore::new(dir.path().join("out"));

        // A indexed at 10:00 with hash abc; B at 10:15 with hash xyz.
        a.write_node(&node("Pedido", "abc", 36_000)).unwrap();
        a.write_embeddings(Kind::Entity, "Pedido", &[embedding("Pedido", "nomic-embed-text-v1.5")])
            .unwrap();
        b.write_node(&node("Pedido", "xyz", 36_900)).unwrap();
        refresh_manifest(&a);
        refresh_manifest(&b);

        let outcome =
            merge_indexes(&[a, b], &out, MergeStrategy::LastWriteWins, &bus).unwrap();

        assert_eq!(outcome.conflicts_resolved, 1);
        let merged = out.read_node(Kind::Entity, "Pedido").unwrap().unwrap();
        assert_eq!(merged.source_hash, "xyz");
        // The loser's embeddings were discarded with its node.
        assert!(out.read_embeddings(Kind::Entity, "Pedido").unwrap().is_empty());
        assert_eq!(bus.next_sequence(), 2); // requested + completed
    }

    #[test]
    fn test_merge_incompatible_models_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "nomic-embed-text-v1.5");
        let b = l2_store(&dir, "b", "bge-small-en-v1.5");
        a.write_node(&node("Pedido", "abc", 0)).unwrap();
        b.write_node(&node("Pedido", "xyz", 1)).unwrap();
        refresh_manifest(&a);
        refresh_manifest(&b);

        let out = ArtifactStore::new(dir.path().join("out"));
        let result = merge_indexes(&[a, b], &out, MergeStrategy::LastWriteWins, &bus);
        assert!(matches!(
            result,
            Err(MergeError::Manifest(
                ManifestError::IncompatibleEmbeddingModel(_, _)
            ))
        ));
        // No output, no completion event.
        assert!(out.read_manifest().unwrap().is_none());
        assert!(out.read_all_nodes().unwrap().is_empty());
        assert_eq!(bus.next_sequence(), 1); // only the request event
    }

    #[test]
    fn test_merge_fail_on_conflict() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "m");
        let b = l2_store(&dir, "b", "m");
        a.write_node(&node("Pedido", "abc", 0)).unwrap();
        b.write_node(&node("Pedido", "xyz", 1)).unwrap();
        refresh_manifest(&a);
        refresh_manifest(&b);

        let out = ArtifactStore::new(dir.path().join("out"));
        let result = merge_indexes(&[a, b], &out, MergeStrategy::FailOnConflict, &bus);
        assert!(matches!(
            result,
            Err(MergeError::ConflictRejected { .. })
        ));
        assert!(out.read_manifest().unwrap().is_none());
    }

    #[test]
    fn test_delete_wins() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "m");
        let b = l2_store(&dir, "b", "m");
        a.write_node(&node("Pedido", "abc", 0)).unwrap();
        a.write_node(&node("Usuario", "uuu", 0)).unwrap();
        a.append_edges(&[GraphEdge::new(
            "Entity:Pedido",
            "Entity:Usuario",
            EdgeType::Structural(StructuralEdge::WikiLink),
            "specs/01-domain/Pedido.md",
            ExtractionMethod::WikiLink,
        )])
        .unwrap();
        // B deleted Usuario.
        b.append_deletion("Entity:Usuario").unwrap();
        refresh_manifest(&a);
        refresh_manifest(&b);

        let out = ArtifactStore::new(dir.path().join("out"));
        let outcome = merge_indexes(&[a, b], &out, MergeStrategy::LastWriteWins, &bus).unwrap();

        assert_eq!(outcome.tombstoned, 1);
        assert!(out.read_node(Kind::Entity, "Usuario").unwrap().is_none());
        assert!(out.read_node(Kind::Entity, "Pedido").unwrap().is_some());
        // The edge to the tombstoned node is gone too.
        assert!(out.read_all_edges().unwrap().is_empty());
    }

    #[test]
    fn test_merge_commutative_without_conflicts() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "m");
        let b = l2_store(&dir, "b", "m");
        a.write_node(&node("Pedido", "abc", 10)).unwrap();
        b.write_node(&node("Usuario", "uuu", 20)).unwrap();
        refresh_manifest(&a);
        refresh_manifest(&b);

        let out_ab = ArtifactStore::new(dir.path().join("out_ab"));
        let out_ba = ArtifactStore::new(dir.path().join("out_ba"));
        merge_indexes(
            &[a.clone(), b.clone()],
            &out_ab,
            MergeStrategy::LastWriteWins,
            &bus,
        )
        .unwrap();
        merge_indexes(&[b, a], &out_ba, MergeStrategy::LastWriteWins, &bus).unwrap();

        let nodes_ab = out_ab.read_all_nodes().unwrap();
        let nodes_ba = out_ba.read_all_nodes().unwrap();
        assert_eq!(nodes_ab, nodes_ba);
    }

    #[test]
    fn test_insufficient_sources() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::default();
        let a = l2_store(&dir, "a", "m");
        let out = ArtifactStore::new(dir.path().join("out"));
        assert!(matches!(
            merge_indexes(&[a], &out, MergeStrategy::LastWriteWins, &bus),
            Err(MergeError::InsufficientSources(1))
        ));
    }
}
