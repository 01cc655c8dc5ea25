//! Manifest Graph Builder & Link Validator.
//!
//! The manifest tree is loaded into a directed graph whose vertices are manifest documents and
//! record documents. Every pointer is resolved against the directory of the manifest holding it.
//! [validate] classifies every record in the corpus as reachable once, reachable more than once,
//! or orphaned, and reports broken pointers, identity mismatches and cycles. It never edits a
//! manifest. [build_missing] plans new grouping nodes and only ever appends to the root.

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::{depth_first_search, Control, DfsEvent},
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    codec::{CorpusDocument, EntityDocument, ManifestDocument, ManifestEntry},
    config::LaminaConfig,
    corpus::Corpus,
    error::LaminaError,
    issue::Issue,
    paths::{normalize, path_to, resolve, to_slug},
    properties::{CanonicalRecord, EntityId},
    store::DocumentStore,
};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Vertex {
    Manifest(String),
    Record(String),
}

#[derive(Debug, Clone)]
pub struct ManifestTree {
    pub root: String,
    pub nodes: BTreeMap<String, ManifestDocument>,
    graph: DiGraph<Vertex, ()>,
    index: BTreeMap<Vertex, NodeIndex>,
}

impl ManifestTree {
    fn vertex(&mut self, vertex: Vertex) -> NodeIndex {
        if let Some(idx) = self.index.get(&vertex) {
            return *idx;
        }
        let idx = self.graph.add_node(vertex.clone());
        self.index.insert(vertex, idx);
        idx
    }

    fn link(&mut self, from: Vertex, to: Vertex) {
        let from = self.vertex(from);
        let to = self.vertex(to);
        self.graph.add_edge(from, to, ());
    }

    /// Load the tree by following child pointers from `root`. Unreadable children are reported
    /// and skipped; a missing or unparseable root is fatal.
    pub fn load(store: &dyn DocumentStore, root: &str) -> Result<(ManifestTree, Vec<Issue>), LaminaError> {
        let root = normalize(root);
        let content = store.read(&root)?.ok_or_else(|| {
            LaminaError::Fatal(format!("root manifest {root} does not exist"))
        })?;
        let root_doc = ManifestDocument::parse(&content)
            .map_err(|e| LaminaError::Fatal(format!("root manifest {root} is unreadable: {e}")))?;

        let mut tree = ManifestTree {
            root: root.clone(),
            nodes: BTreeMap::new(),
            graph: DiGraph::new(),
            index: BTreeMap::new(),
        };
        let mut issues = Vec::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        tree.vertex(Vertex::Manifest(root.clone()));
        tree.nodes.insert(root.clone(), root_doc);

        let mut queue = VecDeque::from([root]);
        while let Some(path) = queue.pop_front() {
            let Some(doc) = tree.nodes.get(&path).cloned() else {
                continue;
            };
            for pointer in doc.children.iter() {
                let child = resolve(&path, pointer);
                if !tree.nodes.contains_key(&child) && !failed.contains(&child) {
                    match store.read(&child) {
                        Err(e) => {
                            issues.push(Issue::parse_failure(&child, e.to_string()));
                            failed.insert(child);
                            continue;
                        }
                        Ok(None) => {
                            issues.push(Issue::BrokenRef {
                                manifest: path.clone(),
                                pointer: pointer.clone(),
                                resolved: child.clone(),
                                declared: None,
                            });
                            failed.insert(child);
                            continue;
                        }
                        Ok(Some(content)) => match ManifestDocument::parse(&content) {
                            Ok(child_doc) => {
                                tree.nodes.insert(child.clone(), child_doc);
                                queue.push_back(child.clone());
                            }
                            Err(e) => {
                                issues.push(Issue::parse_failure(&child, e.to_string()));
                                failed.insert(child);
                                continue;
                            }
                        },
                    }
                }
                if tree.nodes.contains_key(&child) {
                    tree.link(Vertex::Manifest(path.clone()), Vertex::Manifest(child));
                }
            }
            for entry in doc.entries.iter() {
                let target = resolve(&path, &entry.path);
                tree.link(Vertex::Manifest(path.clone()), Vertex::Record(target));
            }
        }
        tracing::debug!("manifest tree under {}: {} nodes", tree.root, tree.nodes.len());
        Ok((tree, issues))
    }

    /// Manifests reachable from the root with the number of distinct paths leading to each, and
    /// every cycle found on the way. Back edges are not followed when counting paths.
    fn walk(&self) -> (BTreeMap<String, usize>, Vec<Vec<String>>) {
        let mut reachable = BTreeMap::new();
        let mut cycles = Vec::new();
        let Some(start) = self.index.get(&Vertex::Manifest(self.root.clone())) else {
            return (reachable, cycles);
        };
        let mut active: Vec<NodeIndex> = Vec::new();
        let mut finished: Vec<NodeIndex> = Vec::new();
        let mut back_edges: BTreeSet<(NodeIndex, NodeIndex)> = BTreeSet::new();
        depth_first_search(&self.graph, Some(*start), |event| {
            match event {
                DfsEvent::Discover(node, _) => {
                    active.push(node);
                }
                DfsEvent::BackEdge(from, to) => {
                    back_edges.insert((from, to));
                    // the source is on top of the active path and `to` is below it
                    if let Some(pos) = active.iter().position(|n| *n == to) {
                        let cycle: Vec<String> = active[pos..]
                            .iter()
                            .filter_map(|n| match &self.graph[*n] {
                                Vertex::Manifest(path) => Some(path.clone()),
                                Vertex::Record(_) => None,
                            })
                            .collect();
                        cycles.push(cycle);
                    }
                }
                DfsEvent::Finish(node, _) => {
                    finished.push(node);
                    active.pop();
                }
                DfsEvent::TreeEdge(_, _) | DfsEvent::CrossForwardEdge(_, _) => {}
            }
            Control::<()>::Continue
        });

        // reverse finish order is a topological order once back edges are dropped
        let mut paths: BTreeMap<NodeIndex, usize> = BTreeMap::from([(*start, 1)]);
        for node in finished.iter().rev() {
            let count = paths.get(node).copied().unwrap_or(0);
            if let Vertex::Manifest(path) = &self.graph[*node] {
                reachable.insert(path.clone(), count);
            }
            for next in self.graph.neighbors(*node) {
                if back_edges.contains(&(*node, next)) {
                    continue;
                }
                let entry = paths.entry(next).or_insert(0);
                *entry = entry.saturating_add(count);
            }
        }
        (reachable, cycles)
    }

    /// Number of referencing edges into a record document.
    pub fn reference_count(&self, record_path: &str) -> usize {
        self.index
            .get(&Vertex::Record(record_path.to_string()))
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, petgraph::Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub manifests: usize,
    pub reachable_once: BTreeSet<EntityId>,
    /// Records referenced more than once, with every manifest holding a reference.
    pub duplicates: BTreeMap<EntityId, Vec<String>>,
    pub orphans: BTreeSet<EntityId>,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn classified(&self) -> usize {
        self.reachable_once.len() + self.duplicates.len() + self.orphans.len()
    }
}

/// Identity of the record at `target`, from the loaded corpus or by reading the document.
fn identity_at(
    target: &str,
    by_path: &BTreeMap<String, EntityId>,
    store: &dyn DocumentStore,
) -> Option<Result<EntityId, String>> {
    if let Some(id) = by_path.get(target) {
        return Some(Ok(id.clone()));
    }
    let content = match store.read(target) {
        Ok(Some(content)) => content,
        Ok(None) => return None,
        Err(e) => return Some(Err(e.to_string())),
    };
    Some(
        EntityDocument::parse(&content)
            .map(|doc| doc.id)
            .map_err(|e| e.to_string()),
    )
}

/// Classify every corpus record against the manifest tree.
pub fn validate(
    tree: &ManifestTree,
    corpus: &Corpus,
    store: &dyn DocumentStore,
) -> Result<ValidationReport, LaminaError> {
    let (reachable, cycles) = tree.walk();
    let by_path = corpus.by_path();
    let mut report = ValidationReport {
        manifests: reachable.len(),
        ..Default::default()
    };
    let mut references: BTreeMap<EntityId, Vec<String>> = BTreeMap::new();

    let mut path_counts: BTreeMap<EntityId, usize> = BTreeMap::new();

    for (manifest, paths) in reachable.iter() {
        let Some(doc) = tree.nodes.get(manifest) else {
            continue;
        };
        for ManifestEntry { id: declared, path: pointer } in doc.entries.iter() {
            let target = resolve(manifest, pointer);
            let found = match identity_at(&target, &by_path, store) {
                None => {
                    report.issues.push(Issue::BrokenRef {
                        manifest: manifest.clone(),
                        pointer: pointer.clone(),
                        resolved: target,
                        declared: Some(declared.clone()),
                    });
                    continue;
                }
                Some(Err(message)) => {
                    report.issues.push(Issue::parse_failure(&target, message));
                    continue;
                }
                Some(Ok(found)) => found,
            };
            if &found != declared {
                report.issues.push(Issue::MismatchedIdentity {
                    manifest: manifest.clone(),
                    pointer: pointer.clone(),
                    resolved: target.clone(),
                    declared: declared.clone(),
                    found: found.clone(),
                });
            }
            *path_counts.entry(found.clone()).or_insert(0) += *paths;
            references.entry(found).or_default().push(manifest.clone());
        }
    }

    for (id, entry) in corpus.records.iter() {
        match path_counts.get(id).copied().unwrap_or(0) {
            0 => {
                report.orphans.insert(id.clone());
                report.issues.push(Issue::Orphan {
                    entity: id.clone(),
                    path: entry.path.clone(),
                });
            }
            1 => {
                report.reachable_once.insert(id.clone());
            }
            _ => {
                let manifests = references.get(id).cloned().unwrap_or_default();
                report.issues.push(Issue::DuplicateRef {
                    entity: id.clone(),
                    path: entry.path.clone(),
                    manifests: manifests.clone(),
                });
                report.duplicates.insert(id.clone(), manifests);
            }
        }
    }

    for cycle in cycles {
        report.issues.push(Issue::ManifestCycle { manifests: cycle });
    }

    tracing::info!(
        "validated {} manifests: {} reachable once, {} duplicated, {} orphans",
        report.manifests,
        report.reachable_once.len(),
        report.duplicates.len(),
        report.orphans.len()
    );
    Ok(report)
}

/// Documents [build_missing] wants written. Nothing here removes or rewrites an existing entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestPlan {
    pub created: Vec<(String, ManifestDocument)>,
    /// The root with new child pointers appended, when any were needed.
    pub root: Option<(String, ManifestDocument)>,
}

impl ManifestPlan {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.root.is_none()
    }
}

/// Plan a grouping node for every grouping value that has none yet, and link it from the root.
///
/// `tree` is `None` when the root manifest does not exist yet; the plan then creates it.
pub fn build_missing(
    tree: Option<&ManifestTree>,
    corpus: &Corpus,
    records: &BTreeMap<EntityId, CanonicalRecord>,
    config: &LaminaConfig,
    store: &dyn DocumentStore,
) -> Result<ManifestPlan, LaminaError> {
    let shape = &config.manifests;
    let root_path = normalize(&config.corpus.manifest_root);

    let mut by_value: BTreeMap<String, Vec<&EntityId>> = BTreeMap::new();
    for (id, record) in records.iter() {
        if corpus.path_of(id).is_none() {
            continue;
        }
        if let Some(value) = record.attribute(shape.grouping_field) {
            by_value.entry(value).or_default().push(id);
        }
    }

    let covered: BTreeSet<String> = tree
        .map(|t| {
            t.nodes
                .values()
                .filter(|doc| doc.kind == shape.node_type)
                .filter_map(|doc| doc.key.as_ref().map(|k| to_slug(k)))
                .collect()
        })
        .unwrap_or_default();

    let mut root_doc = match tree.and_then(|t| t.nodes.get(&t.root)) {
        Some(doc) => doc.clone(),
        None => ManifestDocument::new("root"),
    };
    let mut root_changed = tree.is_none();
    let mut plan = ManifestPlan::default();

    for (value, ids) in by_value.iter() {
        let slug = match to_slug(value) {
            s if s.is_empty() => "node".to_string(),
            s => s,
        };
        if covered.contains(&slug) {
            continue;
        }
        let node_dir = shape.node_dir.trim_end_matches('/');
        let node_path = format!("{node_dir}/{slug}.yaml");
        let reachable = tree.is_some_and(|t| t.nodes.contains_key(&node_path));
        if reachable {
            continue;
        }
        if !store.exists(&node_path) {
            let mut node = ManifestDocument::new(shape.node_type.clone());
            node.key = Some(value.clone());
            node.title = Some(value.clone());
            node.entries = ids
                .iter()
                .filter_map(|id| {
                    corpus.path_of(id).map(|record_path| ManifestEntry {
                        id: (*id).clone(),
                        path: path_to(&node_path, record_path),
                    })
                })
                .collect();
            tracing::info!("planning {node_path} with {} entries", node.entries.len());
            plan.created.push((node_path.clone(), node));
        }
        let pointer = path_to(&root_path, &node_path);
        if !root_doc.has_child(&pointer) {
            root_doc.children.push(pointer);
            root_changed = true;
        }
    }

    if root_changed {
        plan.root = Some((root_path, root_doc));
    }
    Ok(plan)
}
