//! Throughput benchmarks for the merge and full-run pipelines
//!
//! A synthetic in-memory corpus is generated so that runs measure the core rather than disk I/O:
//! - Layered merge and scoring of every record
//! - A complete dry run (merge, group sync, audit, manifest validation)
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lamina_core::{
    commands::{execute_and_summarize, Op},
    config::LaminaConfig,
    corpus::RunContext,
    pipeline::merge_all,
    store::MemoryStore,
};

const FAMILIES: usize = 50;
const VARIANTS: usize = 4;

// Numbered variants (OP0_1..OP0_4) give the group pass real work to do
fn synthetic_corpus() -> MemoryStore {
    let mut store = MemoryStore::new();
    let mut root_children = String::new();
    for family in 0..FAMILIES {
        let category = format!("Cat{}", family % 5);
        let mut entries = String::new();
        for variant in 1..=VARIANTS {
            let id = format!("OP{family}_{variant}");
            let slug = id.to_lowercase();
            let narrative = if variant == 1 {
                format!(
                    "layer3_narrative:\n  description: Operation {family} performs a long documented transformation of D by S.\n  timing: \"{} cycles\"\n  related: [OP{}_1]\n",
                    family % 7 + 2,
                    (family + 1) % FAMILIES
                )
            } else {
                String::new()
            };
            store = store.with(
                &format!("records/{slug}.yaml"),
                format!(
                    "id: {id}\nlayer1_base:\n  name: {id}\n  category: {category}\n  syntax: \"{id} D,S\"\n  timing: \"{}\"\n{narrative}",
                    family % 7 + 2
                ),
            );
            if variant < VARIANTS {
                entries.push_str(&format!("  - {{ id: {id}, path: ../records/{slug}.yaml }}\n"));
            }
        }
        let manifest = format!("manifests/f{family}.yaml");
        store = store.with(&manifest, format!("type: category\nkey: {category}\nentries:\n{entries}"));
        root_children.push_str(&format!("  - f{family}.yaml\n"));
    }
    store.with(
        "manifests/root.yaml",
        format!("type: root\nchildren:\n{root_children}"),
    )
}

fn load(store: &MemoryStore) -> RunContext {
    RunContext::load(Box::new(store.clone()), LaminaConfig::default()).unwrap()
}

fn bench_merge_all(c: &mut Criterion) {
    let ctx = load(&synthetic_corpus());
    c.bench_function("merge_all", |b| b.iter(|| merge_all(&ctx).records.len()));
}

fn bench_dry_run(c: &mut Criterion) {
    let store = synthetic_corpus();
    c.bench_function("dry_run", |b| {
        b.iter_batched(
            || load(&store),
            |mut ctx| {
                execute_and_summarize(&Op::Run { dry_run: true }, &mut ctx)
                    .unwrap()
                    .issues
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_merge_all, bench_dry_run);
criterion_main!(benches);
