//! Layer Merge Engine.
//!
//! [merge] is a pure function of one entity's layer records. Records are ordered by
//! `(layer, extracted_at, source)` so the result never depends on load order, and every map in
//! the output is ordered, so merging the same input twice renders byte-identical documents.
//!
//! For each field, the [PrecedencePolicy] picks one winning candidate, except for cumulative
//! fields, whose items are unioned across layers in first-seen order. Every losing candidate of
//! a non-cumulative field is returned as a [MergeConflict]; nothing is dropped silently.

use enumset::EnumSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    config::LaminaConfig,
    issue::Issue,
    properties::{CanonicalRecord, EntityId, Field, FieldOrigin, FieldValue, LayerRank, LayerRecord},
};

/// How a non-cumulative field conflict between layers is resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// The highest layer that defines the field wins.
    #[default]
    HighestLayer,
    /// The lowest layer that defines the field wins.
    LowestLayer,
    /// The richest value wins; ties go to the higher layer.
    LongestValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergePolicy {
    pub precedence: PrecedencePolicy,
    pub cumulative: EnumSet<Field>,
    pub required_layers: Vec<LayerRank>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::from(&LaminaConfig::default())
    }
}

impl From<&LaminaConfig> for MergePolicy {
    fn from(config: &LaminaConfig) -> Self {
        MergePolicy {
            precedence: config.merge.precedence,
            cumulative: config.merge.cumulative_set(),
            required_layers: config.merge.required_ranks(),
        }
    }
}

/// A discarded candidate of a non-cumulative field.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeConflict {
    pub field: String,
    pub winner_layer: LayerRank,
    pub winner: FieldValue,
    pub loser_layer: LayerRank,
    pub loser: FieldValue,
    pub loser_more_complete: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub record: CanonicalRecord,
    pub conflicts: Vec<MergeConflict>,
    pub missing_layers: Vec<LayerRank>,
}

impl MergeOutcome {
    /// All findings of this merge as issues: conflicts, missing required layers, and
    /// incompleteness.
    pub fn issues(&self, path: Option<&str>) -> Vec<Issue> {
        let entity = &self.record.id;
        let mut issues: Vec<Issue> = self
            .conflicts
            .iter()
            .map(|c| Issue::MergeConflict {
                entity: entity.clone(),
                field: c.field.clone(),
                winner_layer: c.winner_layer,
                winner: c.winner.clone(),
                loser_layer: c.loser_layer,
                loser: c.loser.clone(),
                loser_more_complete: c.loser_more_complete,
            })
            .collect();
        for layer in self.missing_layers.iter() {
            issues.push(Issue::MissingLayer {
                entity: entity.clone(),
                layer: *layer,
                path: path.map(str::to_string),
            });
        }
        if self.record.incomplete {
            issues.push(Issue::IncompleteRecord {
                entity: entity.clone(),
                path: path.map(str::to_string),
            });
        }
        issues
    }
}

fn sort_key(record: &LayerRecord) -> (LayerRank, Option<&str>, &str) {
    (
        record.rank(),
        record.provenance.extracted_at.as_deref(),
        record.provenance.source.as_str(),
    )
}

/// Index of the winning candidate. Candidates are in layer order.
fn pick_winner(policy: PrecedencePolicy, candidates: &[(LayerRank, &FieldValue)]) -> usize {
    match policy {
        PrecedencePolicy::HighestLayer => candidates.len() - 1,
        PrecedencePolicy::LowestLayer => 0,
        PrecedencePolicy::LongestValue => {
            let mut best = 0;
            for (idx, (_, value)) in candidates.iter().enumerate() {
                // `>=` lets later (higher) layers win ties
                if value.richness() >= candidates[best].1.richness() {
                    best = idx;
                }
            }
            best
        }
    }
}

struct Resolved {
    value: FieldValue,
    origin: FieldOrigin,
    conflicts: Vec<MergeConflict>,
}

fn resolve_single(
    name: &str,
    policy: PrecedencePolicy,
    candidates: &[(LayerRank, &FieldValue)],
) -> Resolved {
    let winner_idx = pick_winner(policy, candidates);
    let (winner_layer, winner) = candidates[winner_idx];
    let mut layers = Vec::new();
    let mut conflicts = Vec::new();
    for (idx, (layer, value)) in candidates.iter().enumerate() {
        if *value == winner {
            layers.push(*layer);
        } else if idx != winner_idx {
            conflicts.push(MergeConflict {
                field: name.to_string(),
                winner_layer,
                winner: winner.clone(),
                loser_layer: *layer,
                loser: (*value).clone(),
                loser_more_complete: value.richness() > winner.richness(),
            });
        }
    }
    layers.dedup();
    Resolved {
        value: winner.clone(),
        origin: FieldOrigin {
            layers,
            synced_from: None,
        },
        conflicts,
    }
}

fn resolve_cumulative(candidates: &[(LayerRank, &FieldValue)]) -> Resolved {
    let mut items: Vec<FieldValue> = Vec::new();
    let mut layers = Vec::new();
    for (layer, value) in candidates.iter() {
        for item in value.items() {
            if !items.contains(&item) {
                items.push(item);
            }
        }
        layers.push(*layer);
    }
    layers.dedup();
    Resolved {
        value: FieldValue::List(items),
        origin: FieldOrigin {
            layers,
            synced_from: None,
        },
        conflicts: vec![],
    }
}

/// Merge all layer records of one entity. Returns `None` when there is nothing to merge.
///
/// Records for other entities are ignored.
pub fn merge(entity: &EntityId, records: &[LayerRecord], policy: &MergePolicy) -> Option<MergeOutcome> {
    let mut ordered: Vec<&LayerRecord> = records.iter().filter(|r| &r.entity == entity).collect();
    if ordered.is_empty() {
        return None;
    }
    ordered.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut record = CanonicalRecord {
        id: entity.clone(),
        ..Default::default()
    };
    let mut conflicts = Vec::new();

    let mut typed: BTreeMap<Field, Vec<(LayerRank, &FieldValue)>> = BTreeMap::new();
    let mut untyped: BTreeMap<&str, Vec<(LayerRank, &FieldValue)>> = BTreeMap::new();
    for layer_record in ordered.iter() {
        let rank = layer_record.rank();
        for (field, value) in layer_record.fields.iter() {
            if !value.is_blank() {
                typed.entry(*field).or_default().push((rank, value));
            }
        }
        for (name, value) in layer_record.unvalidated.iter() {
            if !value.is_blank() {
                untyped.entry(name.as_str()).or_default().push((rank, value));
            }
        }
        record.layers.push(rank);
    }
    record.layers.dedup();

    for (field, candidates) in typed.iter() {
        let resolved = if policy.cumulative.contains(*field) {
            resolve_cumulative(candidates)
        } else {
            resolve_single(field.as_str(), policy.precedence, candidates)
        };
        record.fields.insert(*field, resolved.value);
        record
            .field_provenance
            .insert(field.as_str().to_string(), resolved.origin);
        conflicts.extend(resolved.conflicts);
    }

    for (name, candidates) in untyped.iter() {
        let resolved = resolve_single(name, policy.precedence, candidates);
        record.unvalidated.insert(name.to_string(), resolved.value);
        record
            .field_provenance
            .insert(name.to_string(), resolved.origin);
        conflicts.extend(resolved.conflicts);
    }

    record.incomplete = !record.fields.keys().any(|f| f.is_descriptive());

    let missing_layers = policy
        .required_layers
        .iter()
        .filter(|required| !record.layers.contains(required))
        .copied()
        .collect();

    tracing::debug!(
        "merged {entity}: {} fields from {} layer records, {} conflicts",
        record.fields.len() + record.unvalidated.len(),
        ordered.len(),
        conflicts.len()
    );

    Some(MergeOutcome {
        record,
        conflicts,
        missing_layers,
    })
}
