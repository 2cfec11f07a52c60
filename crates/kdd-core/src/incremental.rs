//! Incremental Driver
//!
//! Walks a version-control diff and dispatches add/update/delete work to the
//! indexer, falling back to a full scan of the spec tree when no usable base
//! commit exists. Per-file preparation (parse, extract, embed) fans out over
//! worker threads; all artifact writes funnel through this single driver
//! thread, and the advisory lock keeps other processes out for the duration.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::embed::EmbeddingModel;
use crate::events::{EventBus, EventKind};
use crate::indexer::{IndexOutcome, Indexer, IndexerError, Prepared};
use crate::manifest::{IndexManifest, Structure};
use crate::rules::IndexLevel;
use crate::store::{ArtifactStore, StoreError};
use crate::vcs::{DiffStatus, VcsDiff, VcsError};

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort a whole update run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("spec root not found: {0}")]
    SpecRootNotFound(PathBuf),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

// ============================================================================
// Configuration + outcome
// ============================================================================

/// One update run's parameters.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Rebuild everything regardless of the recorded commit.
    pub full: bool,
    /// Reindex files whose source hash is unchanged.
    pub force: bool,
    /// Target capability level (clamped to L1 when no model is configured).
    pub level: IndexLevel,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            full: false,
            force: false,
            level: IndexLevel::L1,
        }
    }
}

/// One file that failed; the batch continues without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// Aggregated batch outcome.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub indexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub degraded: usize,
    pub failures: Vec<FileFailure>,
    pub full_scan: bool,
}

impl UpdateOutcome {
    /// True when some documents failed but others went through.
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Drives one artifact root from a repository checkout.
pub struct IncrementalDriver<'a> {
    repo_root: PathBuf,
    /// Spec tree directory under the repository root.
    spec_dir: String,
    store: &'a ArtifactStore,
    bus: &'a EventBus,
    model: Option<&'a dyn EmbeddingModel>,
}

impl<'a> IncrementalDriver<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        store: &'a ArtifactStore,
        bus: &'a EventBus,
        model: Option<&'a dyn EmbeddingModel>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            spec_dir: "specs".to_string(),
            store,
            bus,
            model,
        }
    }

    pub fn with_spec_dir(mut self, spec_dir: &str) -> Self {
        self.spec_dir = spec_dir.to_string();
        self
    }

    /// Run one update. Holds the artifact lock for the duration.
    pub fn update(&self, vcs: Option<&dyn VcsDiff>, options: &UpdateOptions) -> Result<UpdateOutcome> {
        let _lock = self.store.lock_exclusive()?;
        let manifest = self.store.read_manifest()?;

        let head = match vcs {
            Some(vcs) => match vcs.head() {
                Ok(head) => Some(head),
                Err(e) => {
                    warn!(error = %e, "no VCS head available, commit will not be recorded");
                    None
                }
            },
            None => None,
        };

        let plan = self.plan(vcs, manifest.as_ref(), options)?;
        let mut outcome = UpdateOutcome {
            full_scan: plan.full_scan,
            ..Default::default()
        };

        // Deletions first, so a rename frees its node id before the add.
        self.process_deletions(&plan.delete, &mut outcome)?;

        // Clamp the level: no model means no embeddings.
        let level = if self.model.is_some() {
            options.level
        } else {
            if options.level >= IndexLevel::L2 {
                warn!("no embedding model configured, indexing at L1");
            }
            IndexLevel::L1
        };

        self.process_files(&plan.index, options.force, level, &mut outcome)?;

        self.finalize_manifest(manifest, head, level)?;

        info!(
            indexed = outcome.indexed,
            unchanged = outcome.unchanged,
            deleted = outcome.deleted,
            failed = outcome.failures.len(),
            full_scan = outcome.full_scan,
            "update complete"
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    fn plan(
        &self,
        vcs: Option<&dyn VcsDiff>,
        manifest: Option<&IndexManifest>,
        options: &UpdateOptions,
    ) -> Result<UpdatePlan> {
        let base = manifest.and_then(|m| m.git_commit.clone());
        if options.full || manifest.is_none() {
            return self.full_plan();
        }
        let (Some(vcs), Some(base)) = (vcs, base) else {
            return self.full_plan();
        };

        let entries = match vcs.diff(&base, "HEAD") {
            Ok(entries) => entries,
            Err(VcsError::CommitNotFound(e)) => {
                warn!(base, error = %e, "base commit not in history, falling back to full scan");
                return self.full_plan();
            }
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}/", self.spec_dir);
        let mut index = BTreeSet::new();
        let mut delete = BTreeSet::new();
        for entry in entries {
            match entry.status {
                DiffStatus::Added | DiffStatus::Modified => {
                    if entry.path.starts_with(&prefix) && entry.path.ends_with(".md") {
                        index.insert(entry.path);
                    }
                }
                DiffStatus::Deleted => {
                    if entry.path.starts_with(&prefix) && entry.path.ends_with(".md") {
                        delete.insert(entry.path);
                    }
                }
                DiffStatus::Renamed { old_path } => {
                    if old_path.starts_with(&prefix) && old_path.ends_with(".md") {
                        delete.insert(old_path);
                    }
                    if entry.path.starts_with(&prefix) && entry.path.ends_with(".md") {
                        index.insert(entry.path);
                    }
                }
            }
        }
        Ok(UpdatePlan {
            // Path-sorted for determinism (BTreeSet iteration order).
            index: index.into_iter().collect(),
            delete: delete.into_iter().collect(),
            full_scan: false,
        })
    }

    fn full_plan(&self) -> Result<UpdatePlan> {
        let spec_root = self.repo_root.join(&self.spec_dir);
        if !spec_root.is_dir() {
            return Err(DriverError::SpecRootNotFound(spec_root));
        }
        let mut index = BTreeSet::new();
        for entry in WalkDir::new(&spec_root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "walk error, skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.repo_root) {
                index.insert(rel.to_string_lossy().replace('\\', "/"));
            }
        }

        // Nodes whose source file vanished are deletions too, so a full scan
        // converges to the same state as replaying the diffs.
        let mut delete = BTreeSet::new();
        for node in self.store.read_all_nodes()? {
            if !index.contains(&node.source_file) {
                delete.insert(node.source_file);
            }
        }

        Ok(UpdatePlan {
            index: index.into_iter().collect(),
            delete: delete.into_iter().collect(),
            full_scan: true,
        })
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    fn process_deletions(&self, paths: &[String], outcome: &mut UpdateOutcome) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let by_path: HashMap<String, crate::graph::GraphNode> = self
            .store
            .read_all_nodes()?
            .into_iter()
            .map(|n| (n.source_file.clone(), n))
            .collect();

        for path in paths {
            let Some(node) = by_path.get(path) else {
                warn!(path, "deleted file had no indexed node");
                continue;
            };
            self.store.delete_document(node)?;
            self.bus.emit(EventKind::DocumentDeleted {
                source_path: path.clone(),
                node_id: node.id.clone(),
            });
            outcome.deleted += 1;
        }
        Ok(())
    }

    fn process_files(
        &self,
        paths: &[String],
        force: bool,
        level: IndexLevel,
        outcome: &mut UpdateOutcome,
    ) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let indexer = Indexer::new(self.store, self.bus, self.model, level)?;
        let indexed_at = Utc::now();

        // Fan-out: parse/extract/embed on worker threads, nothing written.
        let prepared: Vec<(String, Instant, std::io::Result<Prepared>)> = paths
            .par_iter()
            .map(|rel_path| {
                let started = Instant::now();
                let abs = self.repo_root.join(rel_path);
                let result = std::fs::read(&abs)
                    .map(|bytes| indexer.prepare(rel_path, &bytes, force, indexed_at));
                (rel_path.clone(), started, result)
            })
            .collect();

        // Serialized writer: commits happen here, in path order.
        let mut committed_ids: BTreeSet<String> = BTreeSet::new();
        for (rel_path, started, result) in prepared {
            let prepared = match result {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %rel_path, error = %e, "failed to read source file");
                    outcome.failures.push(FileFailure {
                        path: rel_path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Prepared::Ready(ref doc) = prepared {
                if !committed_ids.insert(doc.node.id.clone()) {
                    warn!(path = %rel_path, node = %doc.node.id, "duplicate node id in batch");
                    outcome.failures.push(FileFailure {
                        path: rel_path,
                        reason: format!("duplicate node id {}", doc.node.id),
                    });
                    continue;
                }
            }
            match indexer.commit(&rel_path, prepared, started) {
                Ok(IndexOutcome::Indexed { degraded, .. }) => {
                    outcome.indexed += 1;
                    if degraded {
                        outcome.degraded += 1;
                    }
                }
                Ok(IndexOutcome::Unchanged { .. }) => outcome.unchanged += 1,
                Ok(IndexOutcome::Skipped) | Ok(IndexOutcome::UnknownKind { .. }) => {
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!(path = %rel_path, error = %e, "document failed");
                    outcome.failures.push(FileFailure {
                        path: rel_path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn finalize_manifest(
        &self,
        prior: Option<IndexManifest>,
        head: Option<String>,
        level: IndexLevel,
    ) -> Result<()> {
        let nodes = self.store.read_all_nodes()?;
        let mut domains: Vec<String> = nodes
            .iter()
            .filter_map(|n| n.domain.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        domains.sort();
        let structure = if domains.is_empty() {
            Structure::SingleDomain
        } else {
            Structure::MultiDomain
        };

        let mut manifest = match prior {
            Some(m) => m,
            None => IndexManifest::new(structure, level, "indexer"),
        };
        manifest.structure = structure;
        manifest.domains = match structure {
            Structure::MultiDomain => Some(domains),
            Structure::SingleDomain => None,
        };
        manifest.index_level = level;
        match (level >= IndexLevel::L2, self.model) {
            (true, Some(model)) => {
                manifest.embedding_model = Some(model.model_id().to_string());
                manifest.embedding_dimensions = Some(model.dimensions());
            }
            _ => {
                manifest.embedding_model = None;
                manifest.embedding_dimensions = None;
            }
        }
        manifest.stats = self.store.compute_stats()?;
        manifest.indexed_at = Utc::now();
        manifest.indexed_by = "indexer".to_string();
        manifest.git_commit = head;
        self.store.write_manifest(&manifest)?;
        Ok(())
    }
}

struct UpdatePlan {
    index: Vec<String>,
    delete: Vec<String>,
    full_scan: bool,
}

/// Write a spec file into a repository tree (test + tooling helper).
pub fn write_spec_file(repo_root: &Path, rel_path: &str, contents: &str) -> std::io::Result<()> {
    let path = repo_root.join(rel_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Kind;
    use crate::vcs::DiffEntry;
    use tempfile::TempDir;

    const PEDIDO: &str = "---\nkind: entity\n---\n\n# Pedido\n\n## Descripción\n\nUn pedido de compra del cliente con sus artículos y el total congelado.\n\n## Relaciones\n\n| Relación | Cardinalidad | Entidad |\n|---|---|---|\n| pertenece_a | N:1 | [[Usuario]] |\n";

    const USUARIO: &str = "---\nkind: entity\n---\n\n# Usuario\n\n## Descripción\n\nCuenta registrada que puede crear pedidos y consultar su historial completo.\n";

    struct FakeVcs {
        head: String,
        entries: Vec<DiffEntry>,
    }

    impl VcsDiff for FakeVcs {
        fn head(&self) -> crate::vcs::Result<String> {
            Ok(self.head.clone())
        }
        fn diff(&self, _base: &str, _head: &str) -> crate::vcs::Result<Vec<DiffEntry>> {
            Ok(self.entries.clone())
        }
    }

    fn setup() -> (TempDir, ArtifactStore, EventBus) {
        let dir = TempDir::new().unwrap();
        write_spec_file(dir.path(), "specs/01-domain/entities/Pedido.md", PEDIDO).unwrap();
        write_spec_file(dir.path(), "specs/01-domain/entities/Usuario.md", USUARIO).unwrap();
        let store = ArtifactStore::new(dir.path().join(".kdd-index"));
        (dir, store, EventBus::default())
    }

    #[test]
    fn test_initial_full_scan() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        let outcome = driver.update(None, &UpdateOptions::default()).unwrap();

        assert!(outcome.full_scan);
        assert_eq!(outcome.indexed, 2);
        assert!(!outcome.is_partial_failure());

        let manifest = store.read_manifest().unwrap().unwrap();
        assert_eq!(manifest.stats.nodes, 2);
        assert_eq!(manifest.index_level, IndexLevel::L1);
    }

    #[test]
    fn test_incremental_modify() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        let vcs = FakeVcs {
            head: "abc123".to_string(),
            entries: vec![],
        };
        driver.update(Some(&vcs), &UpdateOptions::default()).unwrap();
        assert_eq!(
            store.read_manifest().unwrap().unwrap().git_commit.as_deref(),
            Some("abc123")
        );

        // Modify Pedido, diff reports M.
        let modified = PEDIDO.replace("el total congelado", "el total y los impuestos");
        write_spec_file(dir.path(), "specs/01-domain/entities/Pedido.md", &modified).unwrap();
        let vcs = FakeVcs {
            head: "def456".to_string(),
            entries: vec![DiffEntry {
                path: "specs/01-domain/entities/Pedido.md".to_string(),
                status: DiffStatus::Modified,
            }],
        };
        let outcome = driver.update(Some(&vcs), &UpdateOptions::default()).unwrap();

        assert!(!outcome.full_scan);
        assert_eq!(outcome.indexed, 1);
        let manifest = store.read_manifest().unwrap().unwrap();
        assert_eq!(manifest.git_commit.as_deref(), Some("def456"));
        assert_eq!(manifest.stats.nodes, 2);
        // No tombstone for a modify.
        assert!(store.read_deletions().unwrap().is_empty());
    }

    #[test]
    fn test_incremental_delete_leaves_tombstone() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver
            .update(
                Some(&FakeVcs {
                    head: "abc".to_string(),
                    entries: vec![],
                }),
                &UpdateOptions::default(),
            )
            .unwrap();

        std::fs::remove_file(dir.path().join("specs/01-domain/entities/Usuario.md")).unwrap();
        let vcs = FakeVcs {
            head: "def".to_string(),
            entries: vec![DiffEntry {
                path: "specs/01-domain/entities/Usuario.md".to_string(),
                status: DiffStatus::Deleted,
            }],
        };
        let outcome = driver.update(Some(&vcs), &UpdateOptions::default()).unwrap();

        assert_eq!(outcome.deleted, 1);
        assert!(store.read_node(Kind::Entity, "Usuario").unwrap().is_none());
        assert_eq!(
            store.read_deletions().unwrap(),
            vec!["Entity:Usuario".to_string()]
        );
        // Pedido's edge to Usuario survives as a future orphan; only edges
        // touching the deleted node id were dropped.
        let manifest = store.read_manifest().unwrap().unwrap();
        assert_eq!(manifest.stats.nodes, 1);
    }

    #[test]
    fn test_rename_is_delete_then_add() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver
            .update(
                Some(&FakeVcs {
                    head: "abc".to_string(),
                    entries: vec![],
                }),
                &UpdateOptions::default(),
            )
            .unwrap();

        let renamed = USUARIO.replace("# Usuario", "# Cliente");
        std::fs::remove_file(dir.path().join("specs/01-domain/entities/Usuario.md")).unwrap();
        write_spec_file(dir.path(), "specs/01-domain/entities/Cliente.md", &renamed).unwrap();

        let vcs = FakeVcs {
            head: "def".to_string(),
            entries: vec![DiffEntry {
                path: "specs/01-domain/entities/Cliente.md".to_string(),
                status: DiffStatus::Renamed {
                    old_path: "specs/01-domain/entities/Usuario.md".to_string(),
                },
            }],
        };
        let outcome = driver.update(Some(&vcs), &UpdateOptions::default()).unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.indexed, 1);
        assert!(store.read_node(Kind::Entity, "Usuario").unwrap().is_none());
        assert!(store.read_node(Kind::Entity, "Cliente").unwrap().is_some());
    }

    #[test]
    fn test_unchanged_files_skip_on_rerun() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver.update(None, &UpdateOptions::default()).unwrap();
        let outcome = driver
            .update(None, &UpdateOptions {
                full: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.indexed, 0);
        assert_eq!(outcome.unchanged, 2);
    }

    #[test]
    fn test_rerun_produces_identical_artifacts() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver.update(None, &UpdateOptions::default()).unwrap();
        let first = std::fs::read(
            dir.path()
                .join(".kdd-index/nodes/entity/Pedido.json"),
        )
        .unwrap();
        let first_edges = std::fs::read(dir.path().join(".kdd-index/edges/edges.jsonl")).unwrap();

        // Second run: unchanged inputs leave every artifact byte-identical.
        driver.update(None, &UpdateOptions::default()).unwrap();
        let second = std::fs::read(
            dir.path()
                .join(".kdd-index/nodes/entity/Pedido.json"),
        )
        .unwrap();
        let second_edges = std::fs::read(dir.path().join(".kdd-index/edges/edges.jsonl")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_edges, second_edges);
    }

    #[test]
    fn test_full_scan_removes_vanished_files() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver.update(None, &UpdateOptions::default()).unwrap();

        std::fs::remove_file(dir.path().join("specs/01-domain/entities/Usuario.md")).unwrap();
        let outcome = driver
            .update(None, &UpdateOptions {
                full: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(store.read_node(Kind::Entity, "Usuario").unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_partial_failure() {
        let (dir, store, bus) = setup();
        let driver = IncrementalDriver::new(dir.path(), &store, &bus, None);
        driver.update(None, &UpdateOptions::default()).unwrap();

        let vcs = FakeVcs {
            head: "x".to_string(),
            entries: vec![
                DiffEntry {
                    path: "specs/01-domain/entities/Fantasma.md".to_string(),
                    status: DiffStatus::Added,
                },
                DiffEntry {
                    path: "specs/01-domain/entities/Pedido.md".to_string(),
                    status: DiffStatus::Modified,
                },
            ],
        };
        let outcome = driver.update(Some(&vcs), &UpdateOptions::default()).unwrap();
        assert!(outcome.is_partial_failure());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, "specs/01-domain/entities/Fantasma.md");
        // The other file still processed.
        assert_eq!(outcome.indexed + outcome.unchanged, 1);
    }
}
