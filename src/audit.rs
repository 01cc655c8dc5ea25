//! Consistency & Quality Auditor.
//!
//! - [check_schema] flags field names outside the vocabulary and values of undeclared shapes.
//!   Names that look like a vocabulary field become `rename_candidate` issues; nothing is renamed.
//! - [score] is a weighted count of the quality categories a record covers.
//! - [aggregate] summarizes scores per category attribute.
//! - [group_consistency] flags groups whose members disagree on a shared field.

use enumset::EnumSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::QualityConfig,
    group::{disagreeing_fields, GroupDefinition},
    issue::{DriftReason, Issue},
    properties::{
        CanonicalRecord, EntityId, Field, LayerRank, QualityBand, QualityCategory, QualityScore,
    },
};

/// Known field-name variants and the vocabulary field each one most likely means.
pub const SYNONYMS: &[(&str, Field)] = &[
    ("detailed_description", Field::Description),
    ("long_description", Field::Description),
    ("flags_affected", Field::Flags),
    ("related_instructions", Field::Related),
    ("usage_notes", Field::Notes),
    ("cycles", Field::Timing),
    ("mnemonic", Field::Name),
    ("instruction", Field::Name),
    ("group", Field::Category),
];

/// Category key used for records without the grouping attribute.
pub const UNCATEGORIZED: &str = "uncategorized";

pub fn synonym(name: &str) -> Option<Field> {
    SYNONYMS
        .iter()
        .find(|(variant, _)| *variant == name)
        .map(|(_, field)| *field)
}

/// Longest vocabulary name contained in `name`, e.g. `flags_info` -> `flags`.
fn containing_field(name: &str) -> Option<Field> {
    EnumSet::<Field>::all()
        .iter()
        .filter(|field| name.contains(field.as_str()))
        .max_by_key(|field| field.as_str().len())
}

fn layers_of(record: &CanonicalRecord, name: &str) -> Vec<LayerRank> {
    record
        .field_provenance
        .get(name)
        .map(|origin| origin.layers.clone())
        .unwrap_or_default()
}

pub fn check_schema(records: &BTreeMap<EntityId, CanonicalRecord>) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut variants: BTreeMap<&str, Vec<&CanonicalRecord>> = BTreeMap::new();

    for record in records.values() {
        for (field, value) in record.fields.iter() {
            let shapes = field.shapes();
            if !shapes.contains(value.shape()) {
                issues.push(Issue::SchemaDrift {
                    entity: record.id.clone(),
                    field: field.as_str().to_string(),
                    layers: layers_of(record, field.as_str()),
                    reason: DriftReason::WrongShape {
                        expected: shapes.iter().collect(),
                        found: value.shape(),
                    },
                });
            }
        }
        for name in record.unvalidated.keys() {
            variants.entry(name.as_str()).or_default().push(record);
        }
    }

    for (name, holders) in variants.iter() {
        let known = synonym(name);
        let target = known.or_else(|| containing_field(name));
        let exclusive = target.is_some_and(|t| holders.iter().all(|r| !r.has(t)));
        match target {
            Some(suggested) if known.is_some() || exclusive => {
                issues.push(Issue::RenameCandidate {
                    field: name.to_string(),
                    suggested,
                    entities: holders.iter().map(|r| r.id.clone()).collect(),
                    exclusive,
                });
            }
            _ => {
                for record in holders.iter() {
                    issues.push(Issue::SchemaDrift {
                        entity: record.id.clone(),
                        field: name.to_string(),
                        layers: layers_of(record, name),
                        reason: DriftReason::UnknownField,
                    });
                }
            }
        }
    }
    issues
}

fn category_weight(category: QualityCategory, config: &QualityConfig) -> u32 {
    match category {
        QualityCategory::Identity => config.identity_weight,
        QualityCategory::Structural => config.structural_weight,
        QualityCategory::Descriptive => config.descriptive_weight,
        QualityCategory::Behavioral => config.behavioral_weight,
        QualityCategory::CrossReference => config.cross_reference_weight,
    }
}

pub fn max_score(config: &QualityConfig) -> u32 {
    EnumSet::<QualityCategory>::all()
        .iter()
        .map(|c| category_weight(c, config))
        .sum()
}

/// Score a record by the quality categories its fields cover.
///
/// Each covered category contributes its weight. Descriptive text contributes half its weight
/// until the longest description reaches `min_description_length`.
pub fn score(record: &CanonicalRecord, config: &QualityConfig) -> QualityScore {
    let mut covered: EnumSet<QualityCategory> = EnumSet::empty();
    for (field, value) in record.fields.iter() {
        if !value.is_blank() {
            covered |= field.quality_category();
        }
    }

    let description_length = [Field::Description, Field::BriefDescription]
        .iter()
        .filter_map(|f| record.get(*f))
        .map(|v| v.richness())
        .max()
        .unwrap_or(0);

    let mut total = 0;
    for category in covered.iter() {
        let weight = category_weight(category, config);
        total += match category {
            QualityCategory::Descriptive if description_length < config.min_description_length => {
                weight / 2
            }
            _ => weight,
        };
    }

    let max = max_score(config);
    let percentage = if max == 0 {
        0.0
    } else {
        f64::from(total) * 100.0 / f64::from(max)
    };
    QualityScore {
        score: total,
        max,
        band: QualityBand::from_percentage(percentage),
        missing: (!covered).iter().collect(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub total_score: u64,
    pub mean_score: f64,
    /// Complete records at or above the production-ready threshold.
    pub production_ready: usize,
}

/// Per-category score statistics, keyed by the rendered `grouping` attribute.
pub fn aggregate<'a, I>(
    records: I,
    grouping: Field,
    config: &QualityConfig,
) -> BTreeMap<String, CategoryStats>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut stats: BTreeMap<String, CategoryStats> = BTreeMap::new();
    for record in records {
        let key = record
            .attribute(grouping)
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let value = score(record, config).score;
        let entry = stats.entry(key).or_default();
        entry.count += 1;
        entry.total_score += u64::from(value);
        if value >= config.production_ready && !record.incomplete {
            entry.production_ready += 1;
        }
    }
    for entry in stats.values_mut() {
        entry.mean_score = entry.total_score as f64 / entry.count as f64;
    }
    stats
}

/// Number of records per band, every band present.
pub fn distribution<'a, I>(records: I, config: &QualityConfig) -> BTreeMap<QualityBand, usize>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut counts: BTreeMap<QualityBand, usize> =
        QualityBand::ALL.iter().map(|b| (*b, 0)).collect();
    for record in records {
        *counts.entry(score(record, config).band).or_insert(0) += 1;
    }
    counts
}

pub fn group_consistency(
    groups: &[GroupDefinition],
    records: &BTreeMap<EntityId, CanonicalRecord>,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    for group in groups.iter() {
        for field in disagreeing_fields(group, records) {
            let members: BTreeSet<EntityId> = group
                .members
                .iter()
                .filter(|m| records.contains_key(*m))
                .cloned()
                .collect();
            issues.push(Issue::GroupConsistency {
                group: group.id.clone(),
                field,
                members: members.into_iter().collect(),
            });
        }
    }
    issues
}
