//! Artifact Store
//!
//! Durable, content-addressed layout for one index under a configurable root
//! (default `.kdd-index/`):
//!
//! ```text
//! manifest.json
//! nodes/<kind>/<DocumentId>.json
//! edges/edges.jsonl
//! embeddings/<kind>/<DocumentId>.json
//! enrichments/<DocumentId>.enrichment.json
//! deletions.jsonl
//! .lock
//! ```
//!
//! Every write goes through a staging file and an atomic rename. The edges
//! file is logically a set keyed by (from, to, type): appends are idempotent
//! and rewrites compact duplicates. Cascade deletes append a tombstone to
//! `deletions.jsonl` so merges can tell "deleted" from "never had".

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::canonical::{to_canonical_bytes, to_canonical_string};
use crate::document::{parse_kind, Kind, ALL_KINDS};
use crate::embed::Embedding;
use crate::graph::{GraphEdge, GraphNode};
use crate::manifest::{IndexManifest, ManifestStats};

/// Default artifact root directory name.
pub const DEFAULT_ROOT: &str = ".kdd-index";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid artifact file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact root is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("document id contains ':': {0}")]
    InvalidDocumentId(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Lock
// ============================================================================

/// Advisory exclusive lock on an artifact root, released on drop.
pub struct StoreLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release artifact lock");
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Handle to one on-disk artifact root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.manifest_path().is_file()
    }

    /// Take the advisory mutation lock. Fails fast when another process holds
    /// it.
    pub fn lock_exclusive(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;
        let path = self.root.join(".lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(path.clone()))?;
        Ok(StoreLock { file, path })
    }

    // ------------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------------

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    fn edges_path(&self) -> PathBuf {
        self.root.join("edges").join("edges.jsonl")
    }

    fn deletions_path(&self) -> PathBuf {
        self.root.join("deletions.jsonl")
    }

    fn node_path(&self, kind: Kind, document_id: &str) -> PathBuf {
        self.root
            .join("nodes")
            .join(kind.as_str())
            .join(format!("{document_id}.json"))
    }

    fn embeddings_path(&self, kind: Kind, document_id: &str) -> PathBuf {
        self.root
            .join("embeddings")
            .join(kind.as_str())
            .join(format!("{document_id}.json"))
    }

    fn enrichment_path(&self, document_id: &str) -> PathBuf {
        self.root
            .join("enrichments")
            .join(format!("{document_id}.enrichment.json"))
    }

    // ------------------------------------------------------------------------
    // Atomic writes
    // ------------------------------------------------------------------------

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let staging = path.with_extension("staging");
        fs::write(&staging, bytes).map_err(io_err(&staging))?;
        fs::rename(&staging, path).map_err(io_err(path))?;
        Ok(())
    }

    fn write_canonical<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = to_canonical_bytes(value).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_atomic(path, &bytes)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = fs::read(path).map_err(io_err(path))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    // ------------------------------------------------------------------------
    // Manifest
    // ------------------------------------------------------------------------

    pub fn read_manifest(&self) -> Result<Option<IndexManifest>> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    pub fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        self.write_canonical(&self.manifest_path(), manifest)
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    pub fn write_node(&self, node: &GraphNode) -> Result<()> {
        let document_id = node.document_id();
        if document_id.contains(':') {
            return Err(StoreError::InvalidDocumentId(document_id.to_string()));
        }
        self.write_canonical(&self.node_path(node.kind, document_id), node)
    }

    pub fn read_node(&self, kind: Kind, document_id: &str) -> Result<Option<GraphNode>> {
        let path = self.node_path(kind, document_id);
        if !path.is_file() {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    /// All persisted nodes, path-sorted for determinism.
    pub fn read_all_nodes(&self) -> Result<Vec<GraphNode>> {
        let mut nodes = Vec::new();
        for kind in ALL_KINDS {
            let dir = self.root.join("nodes").join(kind.as_str());
            for path in sorted_json_files(&dir)? {
                nodes.push(self.read_json(&path)?);
            }
        }
        Ok(nodes)
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    /// Append edges, suppressing duplicates of already-persisted keys.
    pub fn append_edges(&self, edges: &[GraphEdge]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let existing = self.read_all_edges()?;
        let mut keys: BTreeSet<(String, String, String)> =
            existing.iter().map(|e| e.key()).collect();

        let path = self.edges_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        for edge in edges {
            if !keys.insert(edge.key()) {
                continue;
            }
            let line = to_canonical_string(edge).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;
            writeln!(file, "{line}").map_err(io_err(&path))?;
        }
        Ok(())
    }

    pub fn read_all_edges(&self) -> Result<Vec<GraphEdge>> {
        let path = self.edges_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(io_err(&path))?;
        let mut edges = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            let edge: GraphEdge =
                serde_json::from_str(&line).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
            edges.push(edge);
        }
        Ok(edges)
    }

    /// Rewrite the edges file, compacting duplicate keys (first wins, later
    /// metadata absorbed).
    pub fn rewrite_edges(&self, edges: &[GraphEdge]) -> Result<()> {
        let mut compacted: Vec<GraphEdge> = Vec::new();
        for edge in edges {
            if let Some(prior) = compacted.iter_mut().find(|e| e.key() == edge.key()) {
                prior.absorb(edge);
            } else {
                compacted.push(edge.clone());
            }
        }
        let path = self.edges_path();
        let mut bytes = Vec::new();
        for edge in &compacted {
            let line = to_canonical_string(edge).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        self.write_atomic(&path, &bytes)
    }

    // ------------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------------

    pub fn write_embeddings(
        &self,
        kind: Kind,
        document_id: &str,
        embeddings: &[Embedding],
    ) -> Result<()> {
        let path = self.embeddings_path(kind, document_id);
        if embeddings.is_empty() {
            if path.is_file() {
                fs::remove_file(&path).map_err(io_err(&path))?;
            }
            return Ok(());
        }
        self.write_canonical(&path, &embeddings)
    }

    pub fn read_embeddings(&self, kind: Kind, document_id: &str) -> Result<Vec<Embedding>> {
        let path = self.embeddings_path(kind, document_id);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        self.read_json(&path)
    }

    /// All persisted embeddings, path-sorted.
    pub fn read_all_embeddings(&self) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::new();
        for kind in ALL_KINDS {
            let dir = self.root.join("embeddings").join(kind.as_str());
            for path in sorted_json_files(&dir)? {
                let batch: Vec<Embedding> = self.read_json(&path)?;
                embeddings.extend(batch);
            }
        }
        Ok(embeddings)
    }

    // ------------------------------------------------------------------------
    // Enrichments
    // ------------------------------------------------------------------------

    pub fn read_enrichment(&self, document_id: &str) -> Result<Option<serde_json::Value>> {
        let path = self.enrichment_path(document_id);
        if !path.is_file() {
            return Ok(None);
        }
        self.read_json(&path).map(Some)
    }

    pub fn write_enrichment(&self, document_id: &str, value: &serde_json::Value) -> Result<()> {
        self.write_canonical(&self.enrichment_path(document_id), value)
    }

    /// Document ids with an enrichment file, sorted.
    pub fn list_enrichments(&self) -> Result<Vec<String>> {
        let dir = self.root.join("enrichments");
        let mut ids = Vec::new();
        for path in sorted_json_files(&dir)? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(id) = name.strip_suffix(".enrichment.json") {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------------
    // Deletion (cascade + tombstones)
    // ------------------------------------------------------------------------

    /// Remove a document's node file, embeddings, enrichment, and every edge
    /// touching its node id, then record a tombstone.
    pub fn delete_document(&self, node: &GraphNode) -> Result<()> {
        self.cascade_delete(node)?;
        self.append_deletion(&node.id)
    }

    /// Cascade removal without a tombstone. Used when a stale document is
    /// about to be rewritten: a tombstone here would make a later merge drop
    /// the fresh node under delete-wins.
    pub fn cascade_delete(&self, node: &GraphNode) -> Result<()> {
        let document_id = node.document_id();
        debug!(node = %node.id, "cascade deleting artifacts");

        for path in [
            self.node_path(node.kind, document_id),
            self.embeddings_path(node.kind, document_id),
            self.enrichment_path(document_id),
        ] {
            if path.is_file() {
                fs::remove_file(&path).map_err(io_err(&path))?;
            }
        }

        let remaining: Vec<GraphEdge> = self
            .read_all_edges()?
            .into_iter()
            .filter(|e| e.from_node != node.id && e.to_node != node.id)
            .collect();
        self.rewrite_edges(&remaining)
    }

    /// Drop the tombstone for a node id, if any. Called when a previously
    /// deleted document is indexed again.
    pub fn clear_deletion(&self, node_id: &str) -> Result<()> {
        let ids = self.read_deletions()?;
        if !ids.iter().any(|id| id == node_id) {
            return Ok(());
        }
        let path = self.deletions_path();
        let mut bytes = Vec::new();
        for id in ids.iter().filter(|id| id.as_str() != node_id) {
            let line = to_canonical_string(&serde_json::json!({ "node_id": id }))
                .map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        self.write_atomic(&path, &bytes)
    }

    /// Record a delete tombstone for merge reconciliation.
    pub fn append_deletion(&self, node_id: &str) -> Result<()> {
        let path = self.deletions_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let line = to_canonical_string(&serde_json::json!({ "node_id": node_id }))
            .map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(io_err(&path))?;
        Ok(())
    }

    /// Tombstoned node ids, in recording order, deduplicated.
    pub fn read_deletions(&self) -> Result<Vec<String>> {
        let path = self.deletions_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(io_err(&path))?;
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_str(&line).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
            if let Some(id) = value.get("node_id").and_then(|v| v.as_str()) {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// Actual on-disk artifact counts.
    pub fn compute_stats(&self) -> Result<ManifestStats> {
        let nodes = self.read_all_nodes()?.len();
        let edges = self.read_all_edges()?.len();
        let embeddings = self.read_all_embeddings()?.len();
        let enrichments = self.list_enrichments()?.len();
        Ok(ManifestStats {
            nodes,
            edges,
            embeddings,
            enrichments,
        })
    }
}

/// Kind directory name from a path under `nodes/` or `embeddings/`.
pub fn kind_of_dir(path: &Path) -> Option<Kind> {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(parse_kind)
}

fn sorted_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    Ok(files)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Layer, Status};
    use crate::graph::{EdgeType, ExtractionMethod, StructuralEdge};
    use chrono::{TimeZone, Utc};
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
            indexed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge::new(
            from,
            to,
            EdgeType::Structural(StructuralEdge::WikiLink),
            "specs/01-domain/x.md",
            ExtractionMethod::WikiLink,
        )
    }

    #[test]
    fn test_node_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let n = node("Pedido");
        store.write_node(&n).unwrap();

        let read = store.read_node(Kind::Entity, "Pedido").unwrap().unwrap();
        assert_eq!(read, n);
        assert_eq!(store.read_all_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_node_write_is_byte_stable() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let n = node("Pedido");
        store.write_node(&n).unwrap();
        let first = fs::read(dir.path().join(DEFAULT_ROOT).join("nodes/entity/Pedido.json")).unwrap();
        store.write_node(&n).unwrap();
        let second =
            fs::read(dir.path().join(DEFAULT_ROOT).join("nodes/entity/Pedido.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_edge_append_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let e = edge("Entity:A", "Entity:B");
        store.append_edges(&[e.clone()]).unwrap();
        store.append_edges(&[e.clone()]).unwrap();
        assert_eq!(store.read_all_edges().unwrap().len(), 1);

        store.append_edges(&[edge("Entity:A", "Entity:C")]).unwrap();
        assert_eq!(store.read_all_edges().unwrap().len(), 2);
    }

    #[test]
    fn test_cascade_delete_with_tombstone() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let a = node("A");
        let b = node("B");
        store.write_node(&a).unwrap();
        store.write_node(&b).unwrap();
        store
            .append_edges(&[
                edge("Entity:A", "Entity:B"),
                edge("Entity:B", "Entity:A"),
                edge("Entity:B", "Entity:C"),
            ])
            .unwrap();

        store.delete_document(&b).unwrap();

        assert!(store.read_node(Kind::Entity, "B").unwrap().is_none());
        assert_eq!(store.read_all_edges().unwrap().len(), 0);
        assert_eq!(store.read_deletions().unwrap(), vec!["Entity:B".to_string()]);
        // A survives.
        assert!(store.read_node(Kind::Entity, "A").unwrap().is_some());
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        assert!(store.read_manifest().unwrap().is_none());

        let manifest = IndexManifest::new(
            crate::manifest::Structure::SingleDomain,
            crate::rules::IndexLevel::L1,
            "test",
        );
        store.write_manifest(&manifest).unwrap();
        let read = store.read_manifest().unwrap().unwrap();
        assert_eq!(read, manifest);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let lock = store.lock_exclusive().unwrap();
        assert!(matches!(
            store.lock_exclusive(),
            Err(StoreError::Locked(_))
        ));
        drop(lock);
        assert!(store.lock_exclusive().is_ok());
    }

    #[test]
    fn test_rewrite_edges_compacts() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let a = edge("Entity:A", "Entity:B")
            .with_metadata("x", serde_json::json!(1));
        let b = edge("Entity:A", "Entity:B")
            .with_metadata("y", serde_json::json!(2));
        store.rewrite_edges(&[a, b]).unwrap();

        let edges = store.read_all_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].metadata.len(), 2);
    }

    #[test]
    fn test_embeddings_roundtrip_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        let embedding = Embedding {
            id: "Pedido:Pedido.Descripción:0".to_string(),
            document_id: "Pedido".to_string(),
            document_kind: Kind::Entity,
            section_path: "Pedido.Descripción".to_string(),
            chunk_index: 0,
            raw_text: "texto".to_string(),
            context_text: "[entity: Pedido] > texto".to_string(),
            vector: vec![0.1, 0.2, 0.3],
            model: "test".to_string(),
            dimensions: 3,
            text_hash: "h".repeat(64),
            generated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        store
            .write_embeddings(Kind::Entity, "Pedido", &[embedding.clone()])
            .unwrap();
        assert_eq!(
            store.read_embeddings(Kind::Entity, "Pedido").unwrap(),
            vec![embedding]
        );
        assert_eq!(store.read_all_embeddings().unwrap().len(), 1);

        store.write_embeddings(Kind::Entity, "Pedido", &[]).unwrap();
        assert!(store.read_embeddings(Kind::Entity, "Pedido").unwrap().is_empty());
    }

    #[test]
    fn test_compute_stats() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(DEFAULT_ROOT));
        store.write_node(&node("A")).unwrap();
        store.write_node(&node("B")).unwrap();
        store.append_edges(&[edge("Entity:A", "Entity:B")]).unwrap();

        let stats = store.compute_stats().unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.embeddings, 0);
    }
}
