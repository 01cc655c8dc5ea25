//! Corpus snapshot and the run context passed through every stage.
//!
//! A run reads the full snapshot once, computes, then writes whole documents back. Stages never
//! reach past the [RunContext] they are handed.

use std::collections::BTreeMap;

use crate::{
    codec::{CorpusDocument, EntityDocument, GroupDocument},
    config::LaminaConfig,
    error::LaminaError,
    issue::{Issue, IssueLog},
    normalize::from_section,
    paths::to_slug,
    properties::{EntityId, LayerRecord, Provenance},
    store::DocumentStore,
};

/// One loaded entity record file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub path: String,
    pub document: EntityDocument,
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub records: BTreeMap<EntityId, RecordEntry>,
    /// Group documents keyed by path.
    pub groups: BTreeMap<String, GroupDocument>,
}

/// Read one document. A document that exists but cannot be read is a `parse_failure` for that
/// document alone.
fn read_unit(store: &dyn DocumentStore, path: &str, issues: &mut IssueLog) -> Option<String> {
    match store.read(path) {
        Ok(content) => content,
        Err(e) => {
            issues.push(Issue::parse_failure(path, e.to_string()));
            None
        }
    }
}

impl Corpus {
    /// Load every entity record and group document. Unparseable documents become
    /// `parse_failure` issues and are skipped.
    pub fn load(
        store: &dyn DocumentStore,
        config: &LaminaConfig,
        issues: &mut IssueLog,
    ) -> Result<Corpus, LaminaError> {
        let mut corpus = Corpus::default();

        for path in store.list(&config.corpus.records_dir)? {
            let Some(content) = read_unit(store, &path, issues) else {
                continue;
            };
            let document = match EntityDocument::parse(&content) {
                Ok(document) => document,
                Err(e) => {
                    issues.push(Issue::parse_failure(&path, e.to_string()));
                    continue;
                }
            };
            if let Some(first) = corpus.records.get(&document.id) {
                issues.push(Issue::DuplicateRecord {
                    entity: document.id.clone(),
                    path,
                    first_path: first.path.clone(),
                });
                continue;
            }
            tracing::debug!("loaded {} from {path}", document.id);
            corpus
                .records
                .insert(document.id.clone(), RecordEntry { path, document });
        }

        for path in store.list(&config.corpus.groups_dir)? {
            let Some(content) = read_unit(store, &path, issues) else {
                continue;
            };
            match GroupDocument::parse(&content) {
                Ok(group) => {
                    corpus.groups.insert(path, group);
                }
                Err(e) => issues.push(Issue::parse_failure(&path, e.to_string())),
            }
        }

        tracing::info!(
            "corpus loaded: {} records, {} group documents",
            corpus.records.len(),
            corpus.groups.len()
        );
        Ok(corpus)
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.records.keys()
    }

    pub fn path_of(&self, id: &EntityId) -> Option<&str> {
        self.records.get(id).map(|r| r.path.as_str())
    }

    /// Reverse index from record path to identity.
    pub fn by_path(&self) -> BTreeMap<String, EntityId> {
        self.records
            .iter()
            .map(|(id, entry)| (entry.path.clone(), id.clone()))
            .collect()
    }

    /// Path for a record file that does not exist yet.
    pub fn new_record_path(&self, config: &LaminaConfig, id: &EntityId) -> String {
        let dir = config.corpus.records_dir.trim_end_matches('/');
        let slug = match to_slug(id.as_str()) {
            s if s.is_empty() => "record".to_string(),
            s => s,
        };
        format!("{dir}/{slug}.yaml")
    }

    /// Typed layer records of one entity. A section whose field names cannot be read becomes a
    /// `parse_failure` issue and is left out.
    pub fn layer_records(&self, id: &EntityId, issues: &mut IssueLog) -> Vec<LayerRecord> {
        let Some(entry) = self.records.get(id) else {
            return vec![];
        };
        let mut records = Vec::with_capacity(entry.document.layers.len());
        for (rank, section) in entry.document.layers.iter() {
            let provenance = entry
                .document
                .provenance
                .get(rank)
                .cloned()
                .unwrap_or_else(|| Provenance::new(format!("{}#{}", entry.path, section.key)));
            match from_section(id.clone(), *rank, &section.fields, provenance) {
                Ok(record) => records.push(record),
                Err(e) => issues.push(Issue::parse_failure(
                    format!("{}#{}", entry.path, section.key),
                    e.to_string(),
                )),
            }
        }
        records
    }
}

/// Everything a stage may read or write: configuration, the document store, the loaded
/// snapshot, and the issue collector.
pub struct RunContext {
    pub config: LaminaConfig,
    pub store: Box<dyn DocumentStore>,
    pub corpus: Corpus,
    pub issues: IssueLog,
}

impl RunContext {
    pub fn load(store: Box<dyn DocumentStore>, config: LaminaConfig) -> Result<RunContext, LaminaError> {
        config.validate()?;
        let mut issues = IssueLog::new();
        let corpus = Corpus::load(store.as_ref(), &config, &mut issues)?;
        Ok(RunContext {
            config,
            store,
            corpus,
            issues,
        })
    }

    /// Re-read the snapshot after a stage rewrote record files. Issues collected so far are kept,
    /// and problems the re-read finds are added unless already logged.
    pub fn reload(&mut self) -> Result<(), LaminaError> {
        let mut issues = IssueLog::new();
        self.corpus = Corpus::load(self.store.as_ref(), &self.config, &mut issues)?;
        let fresh: Vec<Issue> = issues
            .iter()
            .filter(|issue| !self.issues.iter().any(|known| known == *issue))
            .cloned()
            .collect();
        self.issues.extend(fresh);
        Ok(())
    }
}
