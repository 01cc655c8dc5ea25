//! Stage orchestration over a [RunContext].
//!
//! Stages are plain functions. Each one reads what it needs from the context, pushes its
//! findings into the issue log, and returns a report. Stages that write always produce whole
//! documents; with `dry_run` they compute everything and write nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    audit::{self, CategoryStats, UNCATEGORIZED},
    codec::{CorpusDocument, EntityDocument, ProductionDocument},
    corpus::RunContext,
    error::LaminaError,
    group::{self, GroupDefinition, GroupState, SyncOutcome},
    issue::{Issue, IssueKind, IssueLog, Severity, Verdict},
    manifest::{self, ManifestPlan, ManifestTree, ValidationReport},
    merge::{merge, MergePolicy},
    normalize::SourceAdapter,
    paths::to_slug,
    properties::{CanonicalRecord, EntityId, LayerRecord, QualityBand},
};

/// Canonical records of a merge pass, with the issues each entity raised.
#[derive(Debug, Clone, Default)]
pub struct MergedCorpus {
    pub records: BTreeMap<EntityId, CanonicalRecord>,
    pub issues: BTreeMap<EntityId, Vec<Issue>>,
}

impl MergedCorpus {
    /// Move the issues of the entities accepted by `keep` into `log`.
    pub fn report<F>(&mut self, log: &mut IssueLog, keep: F)
    where
        F: Fn(&EntityId) -> bool,
    {
        for (id, issues) in std::mem::take(&mut self.issues) {
            if keep(&id) {
                log.extend(issues);
            }
        }
    }
}

/// Merge and score the given entities. Entities with no layer records are not emitted.
pub fn merge_entities<'a, I>(ctx: &RunContext, ids: I) -> MergedCorpus
where
    I: IntoIterator<Item = &'a EntityId>,
{
    let policy = MergePolicy::from(&ctx.config);
    let mut merged = MergedCorpus::default();
    for id in ids {
        let mut log = IssueLog::new();
        let layers: Vec<LayerRecord> = ctx.corpus.layer_records(id, &mut log);
        match merge(id, &layers, &policy) {
            Some(outcome) => {
                log.extend(outcome.issues(ctx.corpus.path_of(id)));
                let mut record = outcome.record;
                record.quality = Some(audit::score(&record, &ctx.config.quality));
                merged.records.insert(id.clone(), record);
            }
            None => tracing::debug!("{id} has no layer records, nothing to merge"),
        }
        if !log.is_empty() {
            merged.issues.insert(id.clone(), log.into_vec());
        }
    }
    tracing::info!("merged {} entities", merged.records.len());
    merged
}

pub fn merge_all(ctx: &RunContext) -> MergedCorpus {
    let ids: Vec<EntityId> = ctx.corpus.ids().cloned().collect();
    merge_entities(ctx, ids.iter())
}

pub fn score_all(ctx: &RunContext, records: &mut BTreeMap<EntityId, CanonicalRecord>) {
    for record in records.values_mut() {
        record.quality = Some(audit::score(record, &ctx.config.quality));
    }
}

/// Whether a record's grouping attribute matches `category`, ignoring case.
pub fn in_category(ctx: &RunContext, record: &CanonicalRecord, category: &str) -> bool {
    match record.attribute(ctx.config.manifests.grouping_field) {
        Some(value) => value.eq_ignore_ascii_case(category.trim()),
        None => category.trim().eq_ignore_ascii_case(UNCATEGORIZED),
    }
}

/// Discover groups and check sibling-list symmetry.
pub fn discover_groups(
    ctx: &mut RunContext,
    records: &BTreeMap<EntityId, CanonicalRecord>,
) -> Vec<GroupDefinition> {
    let (groups, issues) = group::discover(&ctx.corpus, records, &ctx.config.groups);
    ctx.issues.extend(issues);
    ctx.issues.extend(group::check_symmetry(&ctx.corpus));
    groups
}

/// Run one synchronization step over every group, then rescore.
pub fn sync_groups(
    ctx: &mut RunContext,
    records: &mut BTreeMap<EntityId, CanonicalRecord>,
    groups: &mut [GroupDefinition],
) -> Vec<SyncOutcome> {
    let mut outcomes = Vec::with_capacity(groups.len());
    for group in groups.iter_mut() {
        let mut outcome = group::synchronize(group, records);
        ctx.issues.extend(std::mem::take(&mut outcome.issues));
        outcomes.push(outcome);
    }
    score_all(ctx, records);
    let diverged = outcomes
        .iter()
        .filter(|o| o.state == GroupState::Diverged)
        .count();
    tracing::info!(
        "synchronized {} groups ({} diverged)",
        outcomes.len(),
        diverged
    );
    outcomes
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub scored: usize,
    pub production_ready: usize,
    pub distribution: BTreeMap<QualityBand, usize>,
    pub categories: BTreeMap<String, CategoryStats>,
}

/// Schema, group-consistency and quality audit. With a `category`, only records in that
/// category (and groups with a member in it) are audited.
pub fn audit(
    ctx: &mut RunContext,
    records: &BTreeMap<EntityId, CanonicalRecord>,
    groups: &[GroupDefinition],
    category: Option<&str>,
) -> AuditReport {
    let selected: BTreeMap<EntityId, CanonicalRecord> = records
        .iter()
        .filter(|(_, r)| category.is_none_or(|c| in_category(ctx, r, c)))
        .map(|(id, r)| (id.clone(), r.clone()))
        .collect();

    ctx.issues.extend(audit::check_schema(&selected));
    let scoped: Vec<GroupDefinition> = groups
        .iter()
        .filter(|g| g.members.iter().any(|m| selected.contains_key(m)))
        .cloned()
        .collect();
    ctx.issues.extend(audit::group_consistency(&scoped, records));

    let quality = &ctx.config.quality;
    let categories = audit::aggregate(
        selected.values(),
        ctx.config.manifests.grouping_field,
        quality,
    );
    let report = AuditReport {
        scored: selected.len(),
        production_ready: categories.values().map(|s| s.production_ready).sum(),
        distribution: audit::distribution(selected.values(), quality),
        categories,
    };
    tracing::info!(
        "audited {} records, {} production ready",
        report.scored,
        report.production_ready
    );
    report
}

/// Load the manifest tree from `root` (or the configured root) and validate it.
pub fn validate_manifests(
    ctx: &mut RunContext,
    root: Option<&str>,
) -> Result<ValidationReport, LaminaError> {
    let root = root
        .map(str::to_string)
        .unwrap_or_else(|| ctx.config.corpus.manifest_root.clone());
    let (tree, load_issues) = ManifestTree::load(ctx.store.as_ref(), &root)?;
    ctx.issues.extend(load_issues);
    let mut report = manifest::validate(&tree, &ctx.corpus, ctx.store.as_ref())?;
    ctx.issues.extend(std::mem::take(&mut report.issues));
    Ok(report)
}

/// Plan missing grouping nodes and, unless `dry_run`, write them and the updated root.
pub fn build_manifests(
    ctx: &mut RunContext,
    records: &BTreeMap<EntityId, CanonicalRecord>,
    dry_run: bool,
) -> Result<ManifestPlan, LaminaError> {
    let root = ctx.config.corpus.manifest_root.clone();
    let loaded = if ctx.store.exists(&root) {
        let (tree, issues) = ManifestTree::load(ctx.store.as_ref(), &root)?;
        ctx.issues.extend(issues);
        Some(tree)
    } else {
        tracing::info!("{root} does not exist yet, it will be created");
        None
    };
    let plan = manifest::build_missing(
        loaded.as_ref(),
        &ctx.corpus,
        records,
        &ctx.config,
        ctx.store.as_ref(),
    )?;
    if dry_run {
        return Ok(plan);
    }
    for (path, node) in plan.created.iter() {
        ctx.store.write(path, &node.render()?)?;
    }
    if let Some((path, root_doc)) = plan.root.as_ref() {
        ctx.store.write(path, &root_doc.render()?)?;
    }
    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    /// Documents written, or that would be written in a dry run.
    pub written: Vec<String>,
    pub unchanged: usize,
    pub dry_run: bool,
}

pub fn production_path(ctx: &RunContext, id: &EntityId) -> String {
    let dir = ctx.config.corpus.production_dir.trim_end_matches('/');
    let slug = match to_slug(id.as_str()) {
        s if s.is_empty() => "record".to_string(),
        s => s,
    };
    format!("{dir}/{slug}.yaml")
}

/// Materialize production documents. A document whose stored fingerprint matches is skipped.
pub fn write_production<'a, I>(
    ctx: &mut RunContext,
    records: I,
    dry_run: bool,
) -> Result<WriteReport, LaminaError>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut report = WriteReport {
        dry_run,
        ..Default::default()
    };
    for record in records {
        let path = production_path(ctx, &record.id);
        let document = ProductionDocument::from_record(record)?;
        let current = ctx
            .store
            .read(&path)
            .unwrap_or_else(|e| {
                tracing::warn!("{path} is unreadable and will be replaced: {e}");
                None
            })
            .and_then(|content| ProductionDocument::parse(&content).ok())
            .map(|existing| existing.fingerprint);
        if current.as_deref() == Some(document.fingerprint.as_str()) {
            report.unchanged += 1;
            continue;
        }
        if !dry_run {
            ctx.store.write(&path, &document.render()?)?;
        }
        report.written.push(path);
    }
    tracing::info!(
        "production: {} written, {} unchanged{}",
        report.written.len(),
        report.unchanged,
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub units: usize,
    pub failed: usize,
    /// Entity record files written.
    pub written: Vec<String>,
}

/// Apply a batch of extraction units to the entity record files.
///
/// Each unit replaces its layer section whole. Every touched record file is rendered in full
/// and written in one step; the snapshot is reloaded afterwards.
pub fn ingest(
    ctx: &mut RunContext,
    adapter: &dyn SourceAdapter,
    batch: &str,
    content: &str,
) -> Result<IngestReport, LaminaError> {
    let mut report = IngestReport::default();
    let units = match adapter.extract(content) {
        Ok(units) => units,
        Err(e) => {
            ctx.issues.push(Issue::parse_failure(batch, e.to_string()));
            return Ok(report);
        }
    };

    let mut by_entity: BTreeMap<EntityId, Vec<LayerRecord>> = BTreeMap::new();
    for unit in units {
        report.units += 1;
        match unit {
            Ok(record) => by_entity.entry(record.entity.clone()).or_default().push(record),
            Err(message) => {
                report.failed += 1;
                ctx.issues.push(Issue::parse_failure(
                    format!("{batch} ({})", adapter.source_name()),
                    message,
                ));
            }
        }
    }

    for (id, layers) in by_entity {
        let (path, mut document) = match ctx.corpus.records.get(&id) {
            Some(entry) => (entry.path.clone(), entry.document.clone()),
            None => (
                ctx.corpus.new_record_path(&ctx.config, &id),
                EntityDocument::new(id.clone()),
            ),
        };
        let mut seen = BTreeSet::new();
        for layer in layers.iter() {
            if !seen.insert(layer.rank()) {
                tracing::warn!("{id}: {} appears twice in {batch}, the later unit wins", layer.rank());
            }
            document.replace_layer(layer);
        }
        ctx.store.write(&path, &document.render()?)?;
        report.written.push(path);
    }

    ctx.reload()?;
    tracing::info!(
        "ingested {} units from {batch} into {} records ({} failed)",
        report.units - report.failed,
        report.written.len(),
        report.failed
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reachability {
    pub manifests: usize,
    pub reachable_once: usize,
    pub duplicated: usize,
    pub orphans: usize,
}

impl From<&ValidationReport> for Reachability {
    fn from(report: &ValidationReport) -> Self {
        Reachability {
            manifests: report.manifests,
            reachable_once: report.reachable_once.len(),
            duplicated: report.duplicates.len(),
            orphans: report.orphans.len(),
        }
    }
}

/// Machine-readable end-of-run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub op: String,
    pub verdict: Verdict,
    pub issues: usize,
    pub by_type: BTreeMap<IssueKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<BTreeMap<QualityBand, usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeMap<String, CategoryStats>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, GroupState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<Reachability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written: Option<WriteReport>,
    pub details: Vec<Issue>,
}

/// The one-line verdict printed at the end of every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct VerdictLine<'a> {
    verdict: Verdict,
    issues: usize,
    by_type: &'a BTreeMap<IssueKind, usize>,
}

impl RunSummary {
    pub fn new<S: ToString>(op: S, issues: &IssueLog, fail_on: Severity) -> RunSummary {
        let mut by_severity = BTreeMap::new();
        for issue in issues.iter() {
            *by_severity.entry(issue.severity()).or_insert(0) += 1;
        }
        RunSummary {
            op: op.to_string(),
            verdict: issues.verdict(fail_on),
            issues: issues.len(),
            by_type: issues.counts_by_kind(),
            by_severity,
            distribution: None,
            categories: None,
            groups: None,
            manifests: None,
            written: None,
            details: issues.iter().cloned().collect(),
        }
    }

    pub fn with_audit(mut self, report: &AuditReport) -> Self {
        self.distribution = Some(report.distribution.clone());
        self.categories = Some(report.categories.clone());
        self
    }

    pub fn with_groups(mut self, outcomes: &[SyncOutcome]) -> Self {
        self.groups = Some(
            outcomes
                .iter()
                .map(|o| (o.group.clone(), o.state))
                .collect(),
        );
        self
    }

    pub fn with_manifests(mut self, report: &ValidationReport) -> Self {
        self.manifests = Some(Reachability::from(report));
        self
    }

    pub fn with_written(mut self, report: &WriteReport) -> Self {
        self.written = Some(report.clone());
        self
    }

    pub fn verdict_line(&self) -> Result<String, LaminaError> {
        Ok(serde_json::to_string(&VerdictLine {
            verdict: self.verdict,
            issues: self.issues,
            by_type: &self.by_type,
        })?)
    }

    pub fn to_json(&self) -> Result<String, LaminaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LaminaConfig,
        normalize::YamlBatchAdapter,
        properties::{Field, FieldValue},
        store::{DocumentStore, MemoryStore},
    };
    use test_log::test;

    fn context(store: MemoryStore) -> RunContext {
        RunContext::load(Box::new(store), LaminaConfig::default()).unwrap()
    }

    fn corpus() -> MemoryStore {
        MemoryStore::new()
            .with(
                "records/add.yaml",
                "id: ADD\nlayer1_base: { name: ADD, category: Math, timing: '2' }\nlayer3_narrative: { description: Add S into D. }\n",
            )
            .with(
                "records/jmp.yaml",
                "id: JMP\nlayer2_detail: { name: JMP, category: Branch }\n",
            )
    }

    #[test]
    fn test_merge_reports_selected_entities_only() {
        let mut ctx = context(corpus());
        let mut merged = merge_all(&ctx);
        assert_eq!(merged.records.len(), 2);
        assert!(merged.records.values().all(|r| r.quality.is_some()));

        let add = EntityId::new("ADD");
        merged.report(&mut ctx.issues, |id| *id == add);
        assert_eq!(ctx.issues.count(IssueKind::MissingLayer), 0);

        let mut merged = merge_all(&ctx);
        merged.report(&mut ctx.issues, |_| true);
        // JMP lacks layer 1 and any description
        assert_eq!(ctx.issues.count(IssueKind::MissingLayer), 1);
        assert_eq!(ctx.issues.count(IssueKind::IncompleteRecord), 1);
    }

    #[test]
    fn test_audit_category_filter() {
        let mut ctx = context(corpus());
        let merged = merge_all(&ctx);
        let report = audit(&mut ctx, &merged.records, &[], Some("math"));
        assert_eq!(report.scored, 1);
        assert_eq!(report.categories.keys().collect::<Vec<_>>(), vec!["Math"]);
        assert_eq!(report.distribution.values().sum::<usize>(), 1);
    }

    #[test]
    fn test_write_production_skips_unchanged() {
        let mut ctx = context(corpus());
        let merged = merge_all(&ctx);
        let first = write_production(&mut ctx, merged.records.values(), false).unwrap();
        assert_eq!(
            first.written,
            vec!["production/add.yaml", "production/jmp.yaml"]
        );
        let second = write_production(&mut ctx, merged.records.values(), false).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.unchanged, 2);

        let stored = ctx.store.read("production/add.yaml").unwrap().unwrap();
        let doc = ProductionDocument::parse(&stored).unwrap();
        assert_eq!(
            doc.fields.get(&Field::Description),
            Some(&FieldValue::text("Add S into D."))
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let mut ctx = context(corpus());
        let merged = merge_all(&ctx);
        let report = write_production(&mut ctx, merged.records.values(), true).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(!ctx.store.exists("production/add.yaml"));
    }

    #[test]
    fn test_ingest_replaces_sections_and_isolates_failures() {
        let mut ctx = context(corpus());
        let batch = "\
- { entity: ADD, layer: 3, source: manual, fields: { notes: [carry] } }
- { entity: NEW, layer: 1, source: table, fields: { name: NEW } }
- { entity: '', layer: 1, source: table, fields: {} }
";
        let report = ingest(&mut ctx, &YamlBatchAdapter::new("batch"), "batch.yaml", batch).unwrap();
        assert_eq!(report.units, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, vec!["records/add.yaml", "records/new.yaml"]);
        assert_eq!(ctx.issues.count(IssueKind::ParseFailure), 1);

        // layer 3 was replaced whole, so the old description is gone
        let merged = merge_all(&ctx);
        let add = &merged.records[&EntityId::new("ADD")];
        assert!(!add.has(Field::Description));
        assert!(add.has(Field::Notes));
        assert!(merged.records.contains_key(&EntityId::new("NEW")));
    }

    #[test]
    fn test_summary_verdict_line() {
        let mut log = IssueLog::new();
        log.push(Issue::Orphan {
            entity: EntityId::new("Y"),
            path: "records/y.yaml".to_string(),
        });
        let summary = RunSummary::new("validate-manifests", &log, Severity::Warning);
        assert_eq!(summary.verdict, Verdict::Fail);
        assert_eq!(
            summary.verdict_line().unwrap(),
            r#"{"verdict":"fail","issues":1,"by_type":{"orphan":1}}"#
        );
        let summary = RunSummary::new("validate-manifests", &log, Severity::Error);
        assert_eq!(summary.verdict, Verdict::Pass);
    }
}
