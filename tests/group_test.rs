use tempfile::tempdir;
use test_log::test;

use std::path::Path;

use lamina_core::{
    codec::{CorpusDocument, ProductionDocument},
    commands::{execute, Op, OpResult},
    corpus::RunContext,
    group::{GroupState, SyncOutcome},
    issue::{Issue, IssueKind},
    properties::{EntityId, Field, FieldValue},
};

mod common;
use common::{load_context, read_doc, write_doc};

fn production(root: &Path, slug: &str) -> ProductionDocument {
    let content = read_doc(root, &format!("production/{slug}.yaml")).unwrap();
    ProductionDocument::parse(&content).unwrap()
}

fn sync(root: &Path) -> (Vec<SyncOutcome>, RunContext) {
    let mut ctx = load_context(root);
    match execute(&Op::SyncGroups { dry_run: false }, &mut ctx).unwrap() {
        OpResult::Synced { outcomes, .. } => (outcomes, ctx),
        other => panic!("unexpected result {other}"),
    }
}

#[test]
fn scenario_c_reference_member_fills_sibling() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "groups/pair.yaml",
        "group_id: pair\nmembers: [A, B]\n",
    );
    write_doc(
        root.path(),
        "records/a.yaml",
        "id: A
layer1_base:
  name: A
  category: Math
  timing: '2'
  documentation_source: silicon-doc
  related: [C]
  operands: [D, S]
layer3_narrative:
  description: The full description of A.
",
    );
    write_doc(root.path(), "records/b.yaml", "id: B\nlayer1_base: { name: B, operands: [D] }\n");

    let (outcomes, _) = sync(root.path());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, GroupState::Synced);
    assert_eq!(outcomes[0].reference, Some(EntityId::new("A")));

    let a = production(root.path(), "a");
    let b = production(root.path(), "b");
    for field in [
        Field::Description,
        Field::Category,
        Field::Timing,
        Field::DocumentationSource,
        Field::Related,
    ] {
        assert_eq!(a.fields.get(&field), b.fields.get(&field), "{field}");
    }
    // per-member fields stay put
    assert_eq!(b.fields.get(&Field::Operands), Some(&FieldValue::list(["D"])));
    assert_eq!(b.group.as_deref(), Some("pair"));
}

#[test]
fn scenario_d_equal_length_values_diverge() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "groups/pair.yaml",
        "group_id: pair\nmembers: [A, B]\nshared_fields: [description]\n",
    );
    write_doc(root.path(), "records/a.yaml", "id: A\nlayer1_base: { description: abc }\n");
    write_doc(root.path(), "records/b.yaml", "id: B\nlayer1_base: { description: xyz }\n");

    let (outcomes, ctx) = sync(root.path());
    assert_eq!(outcomes[0].state, GroupState::Diverged);
    assert!(outcomes[0].copies.is_empty());
    assert_eq!(ctx.issues.count(IssueKind::DivergedGroup), 1);

    assert_eq!(
        production(root.path(), "a").fields.get(&Field::Description),
        Some(&FieldValue::text("abc"))
    );
    assert_eq!(
        production(root.path(), "b").fields.get(&Field::Description),
        Some(&FieldValue::text("xyz"))
    );
}

#[test]
fn asymmetric_sibling_lists_are_reported_not_synced() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "records/a.yaml",
        "id: A\nlayer1_base: { description: A long and detailed description. }\ngroup: { siblings: [B, C] }\n",
    );
    write_doc(
        root.path(),
        "records/b.yaml",
        "id: B\nlayer1_base: { name: B }\ngroup: { siblings: [A] }\n",
    );
    write_doc(
        root.path(),
        "records/c.yaml",
        "id: C\nlayer1_base: { name: C }\ngroup: { siblings: [A, B] }\n",
    );

    let (outcomes, ctx) = sync(root.path());
    assert!(outcomes.is_empty());
    assert!(ctx.issues.count(IssueKind::AsymmetricGroup) >= 1);
    let reported: Vec<&Issue> = ctx.issues.of_kind(IssueKind::AsymmetricGroup).collect();
    assert!(reported.iter().any(|i| matches!(
        i,
        Issue::AsymmetricGroup { entity, sibling, .. }
            if (entity.as_str(), sibling.as_str()) == ("A", "B")
                || (entity.as_str(), sibling.as_str()) == ("B", "A")
    )));
    // no group formed, so nothing was copied or written
    assert!(read_doc(root.path(), "production/b.yaml").is_none());
}

#[test]
fn numbered_variants_form_a_group() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "records/jct1.yaml",
        "id: JCT1\nlayer1_base: { name: JCT1, category: Event, description: Jump on event counter one passing its compare value. }\n",
    );
    write_doc(root.path(), "records/jct2.yaml", "id: JCT2\nlayer1_base: { name: JCT2 }\n");
    write_doc(root.path(), "records/jct3.yaml", "id: JCT3\nlayer1_base: { name: JCT3 }\n");

    let (outcomes, _) = sync(root.path());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].group, "JCT1..JCT3");
    assert_eq!(outcomes[0].state, GroupState::Synced);
    assert_eq!(outcomes[0].copies.len(), 4);
    assert_eq!(
        production(root.path(), "jct3").fields.get(&Field::Category),
        Some(&FieldValue::text("Event"))
    );
}

#[test]
fn reference_member_keeps_its_value_over_a_richer_sibling() {
    let root = tempdir().unwrap();
    write_doc(
        root.path(),
        "groups/pair.yaml",
        "group_id: pair\nmembers: [A, B, C]\nshared_fields: [description]\n",
    );
    write_doc(
        root.path(),
        "records/a.yaml",
        "id: A
layer1_base:
  name: A
  category: Math
  syntax: A D,S
  encoding: EEEE 0001000 CZI DDDDDDDDD SSSSSSSSS
  timing: '2'
  related: [B]
  description: short
",
    );
    write_doc(
        root.path(),
        "records/b.yaml",
        "id: B\nlayer1_base: { description: a much longer text }\n",
    );
    write_doc(root.path(), "records/c.yaml", "id: C\nlayer1_base: { name: C }\n");

    let (outcomes, ctx) = sync(root.path());
    assert_eq!(outcomes[0].reference, Some(EntityId::new("A")));
    assert_eq!(outcomes[0].state, GroupState::Unsynced);
    assert_eq!(outcomes[0].copies.len(), 1);
    assert_eq!(outcomes[0].copies[0].member, EntityId::new("C"));

    let description = |slug: &str| {
        production(root.path(), slug)
            .fields
            .get(&Field::Description)
            .cloned()
    };
    assert_eq!(description("a"), Some(FieldValue::text("short")));
    assert_eq!(description("b"), Some(FieldValue::text("a much longer text")));
    assert_eq!(description("c"), Some(FieldValue::text("short")));
    assert_eq!(ctx.issues.count(IssueKind::GroupConsistency), 1);
    assert_eq!(ctx.issues.count(IssueKind::DivergedGroup), 0);
}
