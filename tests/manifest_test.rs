use std::collections::BTreeSet;
use tempfile::tempdir;
use test_log::test;

use lamina_core::{
    codec::{CorpusDocument, ManifestDocument},
    commands::{execute, Op, OpResult},
    corpus::RunContext,
    issue::{Issue, IssueKind, Severity},
    manifest::ValidationReport,
    properties::EntityId,
    LaminaError,
};

mod common;
use common::{generate_test_root, load_context, read_doc, write_doc};

fn validate(ctx: &mut RunContext, root: Option<&str>) -> ValidationReport {
    match execute(
        &Op::ValidateManifests {
            root: root.map(str::to_string),
        },
        ctx,
    )
    .unwrap()
    {
        OpResult::Validated(report) => report,
        other => panic!("unexpected result {other}"),
    }
}

fn ids(names: &[&str]) -> BTreeSet<EntityId> {
    names.iter().map(|n| EntityId::new(n)).collect()
}

#[test]
fn scenario_e_orphan_and_reachable_once() {
    let root = tempdir().unwrap();
    write_doc(root.path(), "manifests/root.yaml", "type: root\nchildren: [m1.yaml]\n");
    write_doc(
        root.path(),
        "manifests/m1.yaml",
        "type: category\nentries:\n  - { id: X, path: ../records/x.yaml }\n",
    );
    write_doc(root.path(), "records/x.yaml", "id: X\nlayer1_base: { name: X }\n");
    write_doc(root.path(), "records/y.yaml", "id: Y\nlayer1_base: { name: Y }\n");

    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, None);
    assert_eq!(report.reachable_once, ids(&["X"]));
    assert_eq!(report.orphans, ids(&["Y"]));
    assert!(report.duplicates.is_empty());
    assert_eq!(ctx.issues.count(IssueKind::Orphan), 1);
}

#[test]
fn scenario_f_mismatched_identity_is_critical() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "index.yaml",
        "type: root\nentries:\n  - { id: ADD, path: records/add.yaml }\n",
    );
    write_doc(root.path(), "records/add.yaml", "id: ADDX\nlayer1_base: { name: ADDX }\n");

    let mut ctx = load_context(root.path());
    validate(&mut ctx, Some("index.yaml"));
    let issue = ctx.issues.of_kind(IssueKind::MismatchedIdentity).next().unwrap();
    assert_eq!(issue.severity(), Severity::Critical);
    match issue {
        Issue::MismatchedIdentity {
            declared,
            found,
            resolved,
            ..
        } => {
            assert_eq!(declared.as_str(), "ADD");
            assert_eq!(found.as_str(), "ADDX");
            assert_eq!(resolved, "records/add.yaml");
        }
        other => panic!("unexpected issue {other}"),
    }
    // the record file is left exactly as it was
    assert_eq!(
        read_doc(root.path(), "records/add.yaml").unwrap(),
        "id: ADDX\nlayer1_base: { name: ADDX }\n"
    );
}

#[test]
fn fixture_records_are_partitioned_exactly() {
    let root = generate_test_root("corpus_1");
    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, None);

    assert_eq!(report.classified(), ctx.corpus.records.len());
    let once = &report.reachable_once;
    let dup: BTreeSet<EntityId> = report.duplicates.keys().cloned().collect();
    assert!(once.is_disjoint(&report.orphans));
    assert!(once.is_disjoint(&dup));
    assert!(dup.is_disjoint(&report.orphans));

    assert_eq!(*once, ids(&["ADD", "ADDX", "JCT1", "JMP"]));
    assert_eq!(report.orphans, ids(&["JCT2", "Y"]));
    assert_eq!(ctx.issues.count(IssueKind::BrokenRef), 1);
    assert_eq!(ctx.issues.count(IssueKind::MismatchedIdentity), 1);
}

#[test]
fn duplicate_refs_list_every_manifest() {
    let root = tempdir().unwrap();
    write_doc(root.path(), "manifests/root.yaml", "type: root\nchildren: [a.yaml, sub/b.yaml]\n");
    write_doc(
        root.path(),
        "manifests/a.yaml",
        "type: category\nentries:\n  - { id: X, path: ../records/x.yaml }\n",
    );
    write_doc(
        root.path(),
        "manifests/sub/b.yaml",
        "type: category\nentries:\n  - { id: X, path: ../../records/x.yaml }\n",
    );
    write_doc(root.path(), "records/x.yaml", "id: X\n");

    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, None);
    assert_eq!(
        report.duplicates[&EntityId::new("X")],
        vec!["manifests/a.yaml", "manifests/sub/b.yaml"]
    );
    assert_eq!(ctx.issues.count(IssueKind::DuplicateRef), 1);
    assert_eq!(ctx.issues.count(IssueKind::Orphan), 0);
}

#[test]
fn missing_root_manifest_is_fatal() {
    let root = tempdir().unwrap();
    write_doc(root.path(), "records/x.yaml", "id: X\n");
    let mut ctx = load_context(root.path());
    let result = execute(&Op::ValidateManifests { root: None }, &mut ctx);
    assert!(matches!(result, Err(LaminaError::Fatal(_))));
}

#[test]
fn build_then_validate_reaches_every_record() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "manifests/root.yaml",
        "type: root\ntitle: Keep me\nchildren: [legacy.yaml]\n",
    );
    write_doc(
        root.path(),
        "manifests/legacy.yaml",
        "type: category\nkey: Math\nentries:\n  - { id: ADD, path: ../records/add.yaml }\n",
    );
    write_doc(
        root.path(),
        "records/add.yaml",
        "id: ADD\nlayer1_base: { name: ADD, category: Math }\n",
    );
    write_doc(
        root.path(),
        "records/jmp.yaml",
        "id: JMP\nlayer1_base: { name: JMP, category: Branch }\n",
    );
    write_doc(
        root.path(),
        "records/ret.yaml",
        "id: RET\nlayer1_base: { name: RET, category: Branch }\n",
    );

    let mut ctx = load_context(root.path());
    let built = execute(&Op::BuildManifests { dry_run: false }, &mut ctx).unwrap();
    match built {
        OpResult::Built {
            created,
            root_updated,
            ..
        } => {
            assert_eq!(created, vec!["manifests/categories/branch.yaml"]);
            assert!(root_updated);
        }
        other => panic!("unexpected result {other}"),
    }

    let root_doc =
        ManifestDocument::parse(&read_doc(root.path(), "manifests/root.yaml").unwrap()).unwrap();
    assert_eq!(root_doc.title.as_deref(), Some("Keep me"));
    assert_eq!(root_doc.children[0], "legacy.yaml");
    assert!(root_doc.has_child("categories/branch.yaml"));

    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, None);
    assert!(report.orphans.is_empty());
    assert!(report.reachable_once.contains(&EntityId::new("JMP")));
    assert!(report.reachable_once.contains(&EntityId::new("RET")));
}

#[test]
fn build_dry_run_writes_nothing() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "records/jmp.yaml",
        "id: JMP\nlayer1_base: { name: JMP, category: Branch }\n",
    );
    let mut ctx = load_context(root.path());
    let built = execute(&Op::BuildManifests { dry_run: true }, &mut ctx).unwrap();
    assert!(matches!(built, OpResult::Built { root_updated: true, .. }));
    assert!(read_doc(root.path(), "manifests/root.yaml").is_none());
    assert!(read_doc(root.path(), "manifests/categories/branch.yaml").is_none());
}

#[test]
fn record_reached_through_two_paths_is_a_duplicate() {
    let root = tempdir().unwrap();
    write_doc(root.path(), "manifests/root.yaml", "type: root\nchildren: [a.yaml, b.yaml]\n");
    write_doc(root.path(), "manifests/a.yaml", "type: category\nchildren: [shared.yaml]\n");
    write_doc(root.path(), "manifests/b.yaml", "type: category\nchildren: [shared.yaml]\n");
    write_doc(
        root.path(),
        "manifests/shared.yaml",
        "type: category\nentries:\n  - { id: X, path: ../records/x.yaml }\n",
    );
    write_doc(
        root.path(),
        "manifests/b_only.yaml",
        "type: category\nentries:\n  - { id: Y, path: ../records/y.yaml }\n",
    );
    write_doc(root.path(), "records/x.yaml", "id: X\n");
    write_doc(root.path(), "records/y.yaml", "id: Y\n");

    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, None);
    assert!(report.reachable_once.is_empty());
    assert!(report.duplicates.contains_key(&EntityId::new("X")));
    assert_eq!(report.orphans, ids(&["Y"]));
    assert_eq!(report.classified(), 2);
    assert_eq!(ctx.issues.count(IssueKind::DuplicateRef), 1);
    assert_eq!(ctx.issues.count(IssueKind::ManifestCycle), 0);
}

#[test]
fn leading_slash_pointer_is_not_resolved_from_corpus_root() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "manifests/sub/root.yaml",
        "type: root\nentries:\n  - { id: X, path: /records/x.yaml }\n",
    );
    write_doc(root.path(), "records/x.yaml", "id: X\n");

    let mut ctx = load_context(root.path());
    let report = validate(&mut ctx, Some("manifests/sub/root.yaml"));
    assert!(report.reachable_once.is_empty());
    assert_eq!(report.orphans, ids(&["X"]));
    let broken = ctx.issues.of_kind(IssueKind::BrokenRef).next().unwrap();
    assert!(matches!(
        broken,
        Issue::BrokenRef { resolved, .. } if resolved == "manifests/sub/records/x.yaml"
    ));
}
