//! Group discovery, symmetry checking, and synchronization.
//!
//! Groups come from four places, in decreasing authority:
//!
//! 1. explicit group documents,
//! 2. sibling lists inside entity records (only when every listed member agrees on the list),
//! 3. numbered-suffix inference (`JCT1`, `JCT2`, `JCT3`),
//! 4. slash-name inference (`AND / ANDN`, `ADDCT1/2/3`).
//!
//! An entity claimed by a more authoritative source is not considered by the inference passes.
//!
//! Synchronization moves a group from [GroupState::Unsynced] to either [GroupState::Synced] or
//! the terminal [GroupState::Diverged]. A diverged group is reported and left untouched. The
//! reference member is the only donor and is never written to; a sibling richer than it keeps
//! its value and the group stays unsynced.

use enumset::EnumSet;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::GroupConfig,
    corpus::Corpus,
    issue::{DivergentValue, Issue},
    properties::{CanonicalRecord, EntityId, Field, FieldOrigin, FieldValue},
};

static NUMBERED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*\D)(\d+)$").expect("valid numbered-id regex"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    #[default]
    Unsynced,
    Synced,
    Diverged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupSource {
    Document { path: String },
    SiblingList,
    NumberedSuffix,
    SlashName,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupDefinition {
    pub id: String,
    /// Members present in the corpus, sorted.
    pub members: Vec<EntityId>,
    pub shared: EnumSet<Field>,
    pub source: GroupSource,
    pub state: GroupState,
}

/// Split `"ADDCT12"` into `("ADDCT", 12)`.
fn split_number(id: &str) -> Option<(&str, u32)> {
    let caps = NUMBERED_ID.captures(id)?;
    let base = caps.get(1)?.as_str();
    let number = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some((base, number))
}

/// Expand a slash-joined name into member identities.
///
/// A purely numeric part reuses the first part's non-numeric stem, so `ADDCT1/2/3` expands to
/// `ADDCT1`, `ADDCT2`, `ADDCT3`. Returns an empty list when the label names fewer than two
/// members.
pub fn expand_slash_name(label: &str) -> Vec<EntityId> {
    let parts: Vec<&str> = label
        .split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return vec![];
    }
    let stem = split_number(parts[0]).map(|(base, _)| base);
    let mut members: Vec<EntityId> = parts
        .iter()
        .enumerate()
        .map(|(idx, part)| match stem {
            Some(stem) if idx > 0 && part.chars().all(|c| c.is_ascii_digit()) => {
                EntityId::new(&format!("{stem}{part}"))
            }
            _ => EntityId::new(part),
        })
        .collect();
    members.sort();
    members.dedup();
    if members.len() < 2 {
        vec![]
    } else {
        members
    }
}

/// Sets of ids sharing a non-numeric prefix with consecutive numeric suffixes. Each maximal run
/// of at least two consecutive numbers forms one set.
pub fn infer_numbered<'a, I>(ids: I) -> Vec<Vec<EntityId>>
where
    I: IntoIterator<Item = &'a EntityId>,
{
    let mut by_base: BTreeMap<&str, BTreeMap<u32, &EntityId>> = BTreeMap::new();
    for id in ids {
        if let Some((base, number)) = split_number(id.as_str()) {
            by_base.entry(base).or_default().insert(number, id);
        }
    }
    let mut groups = Vec::new();
    for numbered in by_base.values() {
        let mut run: Vec<EntityId> = Vec::new();
        let mut last: Option<u32> = None;
        for (number, id) in numbered.iter() {
            if last.is_some_and(|l| l + 1 != *number) {
                let finished = std::mem::take(&mut run);
                if finished.len() >= 2 {
                    groups.push(finished);
                }
            }
            run.push((*id).clone());
            last = Some(*number);
        }
        if run.len() >= 2 {
            groups.push(run);
        }
    }
    for group in groups.iter_mut() {
        group.sort();
    }
    groups
}

fn sibling_set(corpus: &Corpus, id: &EntityId) -> Option<BTreeSet<EntityId>> {
    let entry = corpus.records.get(id)?;
    let mut set: BTreeSet<EntityId> = entry.document.siblings().into_iter().collect();
    set.insert(id.clone());
    Some(set)
}

/// Check that sibling lists are mutually closed: every member of `A`'s list must list exactly
/// the same group. Each disagreeing pair is reported once.
pub fn check_symmetry(corpus: &Corpus) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut reported: BTreeSet<(EntityId, EntityId)> = BTreeSet::new();
    for (id, entry) in corpus.records.iter() {
        let siblings = entry.document.siblings();
        if siblings.is_empty() {
            continue;
        }
        let Some(expected) = sibling_set(corpus, id) else {
            continue;
        };
        let group_id = entry
            .document
            .group
            .as_ref()
            .and_then(|g| g.id.clone())
            .unwrap_or_else(|| id.to_string());
        for sibling in siblings.iter() {
            let Some(found) = sibling_set(corpus, sibling) else {
                issues.push(Issue::MissingGroupMember {
                    group: group_id.clone(),
                    member: sibling.clone(),
                });
                continue;
            };
            if found != expected {
                let pair = if id < sibling {
                    (id.clone(), sibling.clone())
                } else {
                    (sibling.clone(), id.clone())
                };
                if reported.insert(pair) {
                    issues.push(Issue::AsymmetricGroup {
                        entity: id.clone(),
                        sibling: sibling.clone(),
                        expected: expected.iter().cloned().collect(),
                        found: found.iter().cloned().collect(),
                    });
                }
            }
        }
    }
    issues
}

/// Discover every group in the corpus. Returns the definitions (sorted by id) and any
/// `missing_group_member` issues raised by group documents.
pub fn discover(
    corpus: &Corpus,
    records: &BTreeMap<EntityId, CanonicalRecord>,
    config: &GroupConfig,
) -> (Vec<GroupDefinition>, Vec<Issue>) {
    let mut groups: Vec<GroupDefinition> = Vec::new();
    let mut issues = Vec::new();
    let mut claimed: BTreeSet<EntityId> = BTreeSet::new();
    let mut seen_sets: BTreeSet<Vec<EntityId>> = BTreeSet::new();
    let default_shared = config.shared_set();

    let mut push = |groups: &mut Vec<GroupDefinition>,
                    claimed: &mut BTreeSet<EntityId>,
                    id: String,
                    members: Vec<EntityId>,
                    shared: EnumSet<Field>,
                    source: GroupSource| {
        if members.len() < 2 || !seen_sets.insert(members.clone()) {
            return;
        }
        claimed.extend(members.iter().cloned());
        groups.push(GroupDefinition {
            id,
            members,
            shared,
            source,
            state: GroupState::Unsynced,
        });
    };

    for (path, doc) in corpus.groups.iter() {
        let mut present = Vec::new();
        for member in doc.members.iter() {
            if corpus.records.contains_key(member) {
                present.push(member.clone());
            } else {
                issues.push(Issue::MissingGroupMember {
                    group: doc.group_id.clone(),
                    member: member.clone(),
                });
            }
        }
        let shared = doc
            .shared_field_override()
            .map(|fields| {
                fields
                    .into_iter()
                    .filter(|f| !f.is_per_member())
                    .collect::<EnumSet<Field>>()
            })
            .unwrap_or(default_shared);
        push(
            &mut groups,
            &mut claimed,
            doc.group_id.clone(),
            present,
            shared,
            GroupSource::Document { path: path.clone() },
        );
    }

    for (id, entry) in corpus.records.iter() {
        if claimed.contains(id) || entry.document.siblings().is_empty() {
            continue;
        }
        let Some(set) = sibling_set(corpus, id) else {
            continue;
        };
        let closed = set
            .iter()
            .all(|member| sibling_set(corpus, member).as_ref() == Some(&set));
        if !closed || set.iter().any(|m| claimed.contains(m)) {
            continue;
        }
        let group_id = entry
            .document
            .group
            .as_ref()
            .and_then(|g| g.id.clone())
            .unwrap_or_else(|| id.to_string());
        push(
            &mut groups,
            &mut claimed,
            group_id,
            set.into_iter().collect(),
            default_shared,
            GroupSource::SiblingList,
        );
    }

    if config.infer_numbered {
        let unclaimed: Vec<EntityId> = records
            .keys()
            .filter(|id| !claimed.contains(*id))
            .cloned()
            .collect();
        for members in infer_numbered(unclaimed.iter()) {
            let group_id = match (members.first(), members.last()) {
                (Some(first), Some(last)) => format!("{first}..{last}"),
                _ => continue,
            };
            push(
                &mut groups,
                &mut claimed,
                group_id,
                members,
                default_shared,
                GroupSource::NumberedSuffix,
            );
        }
    }

    if config.infer_slash {
        for (id, record) in records.iter() {
            if claimed.contains(id) {
                continue;
            }
            let labels = [
                Some(id.to_string()),
                record.get(Field::Name).and_then(|n| n.as_text()).map(str::to_string),
            ];
            for label in labels.into_iter().flatten() {
                let members: Vec<EntityId> = expand_slash_name(&label)
                    .into_iter()
                    .filter(|m| records.contains_key(m) && !claimed.contains(m))
                    .collect();
                if members.len() >= 2 {
                    let group_id = members
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    push(
                        &mut groups,
                        &mut claimed,
                        group_id,
                        members,
                        default_shared,
                        GroupSource::SlashName,
                    );
                    break;
                }
            }
        }
    }

    groups.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.members.cmp(&b.members)));
    tracing::info!("discovered {} groups", groups.len());
    (groups, issues)
}

/// A shared-field value copied from one member to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCopy {
    pub member: EntityId,
    pub field: Field,
    pub from: EntityId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub group: String,
    pub state: GroupState,
    pub reference: Option<EntityId>,
    pub copies: Vec<FieldCopy>,
    #[serde(skip)]
    pub issues: Vec<Issue>,
}

/// Member with the highest quality score; ties go to the smallest id.
fn reference_member(
    members: &[EntityId],
    records: &BTreeMap<EntityId, CanonicalRecord>,
) -> Option<EntityId> {
    let mut best: Option<(&EntityId, u32)> = None;
    for member in members.iter() {
        let Some(record) = records.get(member) else {
            continue;
        };
        let score = record.score();
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((member, score));
        }
    }
    best.map(|(id, _)| id.clone())
}

/// Run one synchronization step over a group.
pub fn synchronize(
    group: &mut GroupDefinition,
    records: &mut BTreeMap<EntityId, CanonicalRecord>,
) -> SyncOutcome {
    let members: Vec<EntityId> = group
        .members
        .iter()
        .filter(|m| records.contains_key(*m))
        .cloned()
        .collect();
    let reference = reference_member(&members, records);
    let mut outcome = SyncOutcome {
        group: group.id.clone(),
        state: GroupState::Unsynced,
        reference: reference.clone(),
        copies: vec![],
        issues: vec![],
    };

    let mut planned: Vec<(FieldCopy, FieldValue, FieldOrigin)> = Vec::new();
    if let Some(donor) = reference.as_ref() {
        for field in group.shared.iter() {
            let Some(donor_value) = records
                .get(donor)
                .and_then(|r| r.get(field))
                .filter(|v| !v.is_blank())
                .cloned()
            else {
                continue;
            };
            let donor_richness = donor_value.richness();
            let donor_origin = records
                .get(donor)
                .and_then(|r| r.field_provenance.get(field.as_str()))
                .cloned()
                .unwrap_or_default();

            let mut tied: Vec<DivergentValue> = Vec::new();
            for member in members.iter().filter(|m| *m != donor) {
                let current = records
                    .get(member)
                    .and_then(|r| r.get(field))
                    .filter(|v| !v.is_blank());
                match current {
                    Some(value) if value.richness() > donor_richness => {
                        tracing::debug!(
                            "group {}: {member}.{field} is richer than {donor}'s, left alone",
                            group.id
                        );
                    }
                    Some(value) if value.richness() == donor_richness => {
                        if *value != donor_value {
                            tied.push(DivergentValue {
                                entity: member.clone(),
                                value: value.clone(),
                            });
                        }
                    }
                    _ => planned.push((
                        FieldCopy {
                            member: member.clone(),
                            field,
                            from: donor.clone(),
                        },
                        donor_value.clone(),
                        FieldOrigin {
                            layers: donor_origin.layers.clone(),
                            synced_from: Some(donor.clone()),
                        },
                    )),
                }
            }
            if !tied.is_empty() {
                tied.insert(
                    0,
                    DivergentValue {
                        entity: donor.clone(),
                        value: donor_value.clone(),
                    },
                );
                outcome.issues.push(Issue::DivergedGroup {
                    group: group.id.clone(),
                    field,
                    values: tied,
                });
            }
        }
    }

    if !outcome.issues.is_empty() {
        tracing::warn!("group {} diverged, no values copied", group.id);
        outcome.state = GroupState::Diverged;
        group.state = GroupState::Diverged;
        return outcome;
    }

    for (copy, value, origin) in planned {
        if let Some(record) = records.get_mut(&copy.member) {
            tracing::debug!(
                "group {}: {} <- {}.{}",
                group.id,
                copy.member,
                copy.from,
                copy.field
            );
            record.fields.insert(copy.field, value);
            record
                .field_provenance
                .insert(copy.field.as_str().to_string(), origin);
            record.incomplete = !record.fields.keys().any(|f| f.is_descriptive());
            outcome.copies.push(copy);
        }
    }
    for member in members.iter() {
        if let Some(record) = records.get_mut(member) {
            record.group = Some(group.id.clone());
        }
    }
    // a sibling richer than the reference keeps its value, so the group stays unsynced
    let unsettled = disagreeing_fields(group, records);
    if unsettled.is_empty() {
        outcome.state = GroupState::Synced;
    } else {
        tracing::warn!(
            "group {}: members still disagree on {} shared fields",
            group.id,
            unsettled.len()
        );
    }
    group.state = outcome.state;
    outcome
}

/// Members that disagree on a shared field, including members that lack it.
pub fn disagreeing_fields(
    group: &GroupDefinition,
    records: &BTreeMap<EntityId, CanonicalRecord>,
) -> Vec<Field> {
    let mut fields = Vec::new();
    for field in group.shared.iter() {
        let values: Vec<Option<&FieldValue>> = group
            .members
            .iter()
            .filter_map(|m| records.get(m))
            .map(|r| r.get(field).filter(|v| !v.is_blank()))
            .collect();
        if values.iter().all(|v| v.is_none()) {
            continue;
        }
        if values.windows(2).any(|pair| pair[0] != pair[1]) {
            fields.push(field);
        }
    }
    fields
}
