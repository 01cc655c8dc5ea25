use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    audit,
    corpus::RunContext,
    error::LaminaError,
    group::{GroupDefinition, GroupState, SyncOutcome},
    manifest::ValidationReport,
    normalize::YamlBatchAdapter,
    pipeline::{self, AuditReport, IngestReport, RunSummary, WriteReport},
    properties::EntityId,
};

/// Which records a command applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    All,
    Entity(EntityId),
    Category(String),
}

impl Display for Selection {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Selection::All => write!(f, "--all"),
            Selection::Entity(id) => write!(f, "{id}"),
            Selection::Category(name) => write!(f, "--category={name}"),
        }
    }
}

/// Batch command surface executed against a loaded [RunContext].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Merge the selected entities and materialize their production documents.
    Merge { target: Selection, dry_run: bool },
    /// Schema, group-consistency and quality audit.
    Audit { target: Selection },
    /// Discover and synchronize every group, then materialize the result.
    SyncGroups { dry_run: bool },
    /// Validate the manifest tree under `root`, or the configured root.
    ValidateManifests { root: Option<String> },
    /// Create grouping nodes for values that have none.
    BuildManifests { dry_run: bool },
    /// Apply a batch of extraction units. `batch` names the source of `content` in issues.
    Ingest { batch: String, content: String },
    /// merge, sync-groups, audit and validate-manifests in one pass.
    Run { dry_run: bool },
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let dry = |d: &bool| if *d { " --dry-run" } else { "" };
        match self {
            Op::Merge { target, dry_run } => write!(f, "merge {target}{}", dry(dry_run)),
            Op::Audit { target } => write!(f, "audit {target}"),
            Op::SyncGroups { dry_run } => write!(f, "sync-groups --all{}", dry(dry_run)),
            Op::ValidateManifests { root } => match root {
                Some(root) => write!(f, "validate-manifests {root}"),
                None => write!(f, "validate-manifests"),
            },
            Op::BuildManifests { dry_run } => write!(f, "build-manifests{}", dry(dry_run)),
            Op::Ingest { batch, .. } => write!(f, "ingest {batch}"),
            Op::Run { dry_run } => write!(f, "run{}", dry(dry_run)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    Merged {
        records: usize,
        written: WriteReport,
    },
    Audited(AuditReport),
    Synced {
        outcomes: Vec<SyncOutcome>,
        written: WriteReport,
    },
    Validated(ValidationReport),
    Built {
        created: Vec<String>,
        root_updated: bool,
        dry_run: bool,
    },
    Ingested(IngestReport),
    Ran {
        outcomes: Vec<SyncOutcome>,
        audit: AuditReport,
        validation: ValidationReport,
        written: WriteReport,
    },
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Merged { records, written } => write!(
                f,
                "Merged({records} records, {} written)",
                written.written.len()
            ),
            OpResult::Audited(report) => write!(
                f,
                "Audited({} records, {} production ready)",
                report.scored, report.production_ready
            ),
            OpResult::Synced { outcomes, .. } => write!(f, "Synced({} groups)", outcomes.len()),
            OpResult::Validated(report) => write!(
                f,
                "Validated({} reachable once, {} duplicated, {} orphans)",
                report.reachable_once.len(),
                report.duplicates.len(),
                report.orphans.len()
            ),
            OpResult::Built {
                created,
                root_updated,
                ..
            } => write!(
                f,
                "Built({}{})",
                created.join(", "),
                if *root_updated { ", root updated" } else { "" }
            ),
            OpResult::Ingested(report) => write!(
                f,
                "Ingested({} units, {} records)",
                report.units,
                report.written.len()
            ),
            OpResult::Ran { validation, .. } => write!(
                f,
                "Ran({} orphans)",
                validation.orphans.len()
            ),
        }
    }
}

impl OpResult {
    /// Fold this result into the run summary.
    pub fn summarize(&self, summary: RunSummary) -> RunSummary {
        match self {
            OpResult::Merged { written, .. } => summary.with_written(written),
            OpResult::Audited(report) => summary.with_audit(report),
            OpResult::Synced { outcomes, written } => {
                summary.with_groups(outcomes).with_written(written)
            }
            OpResult::Validated(report) => summary.with_manifests(report),
            OpResult::Built { .. } | OpResult::Ingested(_) => summary,
            OpResult::Ran {
                outcomes,
                audit,
                validation,
                written,
            } => summary
                .with_groups(outcomes)
                .with_audit(audit)
                .with_manifests(validation)
                .with_written(written),
        }
    }
}

fn selected_ids(ctx: &RunContext, target: &Selection) -> Result<Vec<EntityId>, LaminaError> {
    match target {
        Selection::All => Ok(ctx.corpus.ids().cloned().collect()),
        Selection::Entity(id) => {
            if ctx.corpus.records.contains_key(id) {
                Ok(vec![id.clone()])
            } else {
                Err(LaminaError::NotFound(format!("no record for entity {id}")))
            }
        }
        Selection::Category(name) => {
            let merged = pipeline::merge_all(ctx);
            Ok(merged
                .records
                .values()
                .filter(|r| pipeline::in_category(ctx, r, name))
                .map(|r| r.id.clone())
                .collect())
        }
    }
}

/// Execute one command. Findings land in `ctx.issues`; `Err` is reserved for failures that
/// abort the whole run.
pub fn execute(op: &Op, ctx: &mut RunContext) -> Result<OpResult, LaminaError> {
    tracing::info!("executing {op}");
    let result = match op {
        Op::Merge { target, dry_run } => {
            let ids = selected_ids(ctx, target)?;
            let mut merged = pipeline::merge_entities(ctx, ids.iter());
            merged.report(&mut ctx.issues, |_| true);
            let written = pipeline::write_production(ctx, merged.records.values(), *dry_run)?;
            OpResult::Merged {
                records: merged.records.len(),
                written,
            }
        }
        Op::Audit { target } => {
            let category = match target {
                Selection::All => None,
                Selection::Category(name) => Some(name.as_str()),
                Selection::Entity(_) => {
                    return Err(LaminaError::Command(
                        "audit takes --all or --category".to_string(),
                    ))
                }
            };
            let mut merged = pipeline::merge_all(ctx);
            let records = &merged.records;
            let in_scope: Vec<EntityId> = records
                .values()
                .filter(|r| category.is_none_or(|c| pipeline::in_category(ctx, r, c)))
                .map(|r| r.id.clone())
                .collect();
            merged.report(&mut ctx.issues, |id| in_scope.contains(id));
            let groups = pipeline::discover_groups(ctx, &merged.records);
            OpResult::Audited(pipeline::audit(ctx, &merged.records, &groups, category))
        }
        Op::SyncGroups { dry_run } => {
            let mut merged = pipeline::merge_all(ctx);
            let mut groups = pipeline::discover_groups(ctx, &merged.records);
            let outcomes = pipeline::sync_groups(ctx, &mut merged.records, &mut groups);
            let unsettled: Vec<GroupDefinition> = groups
                .iter()
                .filter(|g| g.state == GroupState::Unsynced)
                .cloned()
                .collect();
            ctx.issues
                .extend(audit::group_consistency(&unsettled, &merged.records));
            let touched: Vec<EntityId> = groups
                .iter()
                .flat_map(|g| g.members.iter().cloned())
                .collect();
            let written = pipeline::write_production(
                ctx,
                merged.records.values().filter(|r| touched.contains(&r.id)),
                *dry_run,
            )?;
            OpResult::Synced { outcomes, written }
        }
        Op::ValidateManifests { root } => {
            OpResult::Validated(pipeline::validate_manifests(ctx, root.as_deref())?)
        }
        Op::BuildManifests { dry_run } => {
            let merged = pipeline::merge_all(ctx);
            let plan = pipeline::build_manifests(ctx, &merged.records, *dry_run)?;
            OpResult::Built {
                created: plan.created.iter().map(|(path, _)| path.clone()).collect(),
                root_updated: plan.root.is_some(),
                dry_run: *dry_run,
            }
        }
        Op::Ingest { batch, content } => {
            let adapter = YamlBatchAdapter::new(batch.clone());
            OpResult::Ingested(pipeline::ingest(ctx, &adapter, batch, content)?)
        }
        Op::Run { dry_run } => {
            let mut merged = pipeline::merge_all(ctx);
            merged.report(&mut ctx.issues, |_| true);
            let mut groups = pipeline::discover_groups(ctx, &merged.records);
            let outcomes = pipeline::sync_groups(ctx, &mut merged.records, &mut groups);
            let audit = pipeline::audit(ctx, &merged.records, &groups, None);
            let validation = pipeline::validate_manifests(ctx, None)?;
            let written = pipeline::write_production(ctx, merged.records.values(), *dry_run)?;
            OpResult::Ran {
                outcomes,
                audit,
                validation,
                written,
            }
        }
    };
    tracing::info!("{op}: {result}");
    Ok(result)
}

/// Execute `op` and build the end-of-run summary from the context's issue log.
pub fn execute_and_summarize(op: &Op, ctx: &mut RunContext) -> Result<RunSummary, LaminaError> {
    let result = execute(op, ctx)?;
    let summary = RunSummary::new(op, &ctx.issues, ctx.config.report.fail_on);
    Ok(result.summarize(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LaminaConfig,
        issue::{IssueKind, Verdict},
        store::MemoryStore,
    };
    use test_log::test;

    fn context() -> RunContext {
        let store = MemoryStore::new()
            .with("manifests/root.yaml", "type: root\nchildren: [categories/math.yaml]\n")
            .with(
                "manifests/categories/math.yaml",
                "type: category\nkey: Math\nentries:\n  - { id: ADD, path: ../../records/add.yaml }\n",
            )
            .with(
                "records/add.yaml",
                "id: ADD\nlayer1_base: { name: ADD, category: Math, description: Add. }\n",
            )
            .with(
                "records/sub.yaml",
                "id: SUB\nlayer1_base: { name: SUB, category: Math, description: Subtract. }\n",
            );
        RunContext::load(Box::new(store), LaminaConfig::default()).unwrap()
    }

    #[test]
    fn test_op_display() {
        let op = Op::Merge {
            target: Selection::Entity(EntityId::new("add")),
            dry_run: true,
        };
        assert_eq!(op.to_string(), "merge ADD --dry-run");
        assert_eq!(
            Op::Audit {
                target: Selection::Category("Math".to_string())
            }
            .to_string(),
            "audit --category=Math"
        );
    }

    #[test]
    fn test_merge_unknown_entity_is_an_error() {
        let mut ctx = context();
        let op = Op::Merge {
            target: Selection::Entity(EntityId::new("NOPE")),
            dry_run: true,
        };
        assert!(matches!(execute(&op, &mut ctx), Err(LaminaError::NotFound(_))));
    }

    #[test]
    fn test_validate_reports_orphan_and_fails() {
        let mut ctx = context();
        let summary =
            execute_and_summarize(&Op::ValidateManifests { root: None }, &mut ctx).unwrap();
        assert_eq!(summary.verdict, Verdict::Fail);
        assert_eq!(summary.by_type.get(&IssueKind::Orphan), Some(&1));
        let reach = summary.manifests.unwrap();
        assert_eq!(reach.reachable_once, 1);
        assert_eq!(reach.orphans, 1);
    }

    #[test]
    fn test_run_covers_every_stage() {
        let mut ctx = context();
        let summary = execute_and_summarize(&Op::Run { dry_run: true }, &mut ctx).unwrap();
        assert!(summary.distribution.is_some());
        assert!(summary.categories.is_some());
        assert!(summary.manifests.is_some());
        assert_eq!(summary.written.as_ref().map(|w| w.written.len()), Some(2));
        assert!(!ctx.store.exists("production/add.yaml"));
    }
}
