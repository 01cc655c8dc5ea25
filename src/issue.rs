//! Typed issues raised by every pipeline stage.
//!
//! Issues are the only channel through which per-unit problems surface: a record that fails to
//! parse, a merge conflict, a broken manifest pointer. None of them abort a run. Each issue
//! carries enough structured detail (entity, field, layer, path) to be acted on without re-reading
//! the source documents, and serializes with a `type` tag for the machine-readable report.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::properties::{EntityId, Field, FieldValue, LayerRank, ValueShape};

/// Ordered issue severity. The run verdict fails when any issue reaches the configured
/// threshold.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Discriminant of [Issue], used as the key of per-type summary counts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseFailure,
    DuplicateRecord,
    MissingLayer,
    IncompleteRecord,
    MergeConflict,
    SchemaDrift,
    RenameCandidate,
    AsymmetricGroup,
    MissingGroupMember,
    DivergedGroup,
    GroupConsistency,
    Orphan,
    BrokenRef,
    DuplicateRef,
    MismatchedIdentity,
    ManifestCycle,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::ParseFailure => "parse_failure",
            IssueKind::DuplicateRecord => "duplicate_record",
            IssueKind::MissingLayer => "missing_layer",
            IssueKind::IncompleteRecord => "incomplete_record",
            IssueKind::MergeConflict => "merge_conflict",
            IssueKind::SchemaDrift => "schema_drift",
            IssueKind::RenameCandidate => "rename_candidate",
            IssueKind::AsymmetricGroup => "asymmetric_group",
            IssueKind::MissingGroupMember => "missing_group_member",
            IssueKind::DivergedGroup => "diverged_group",
            IssueKind::GroupConsistency => "group_consistency",
            IssueKind::Orphan => "orphan",
            IssueKind::BrokenRef => "broken_ref",
            IssueKind::DuplicateRef => "duplicate_ref",
            IssueKind::MismatchedIdentity => "mismatched_identity",
            IssueKind::ManifestCycle => "manifest_cycle",
        }
    }
}

impl Display for IssueKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a field was reported as schema drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftReason {
    /// The name is outside the controlled vocabulary and no rename target was found.
    UnknownField,
    /// A vocabulary field holds a value of an undeclared shape.
    WrongShape {
        expected: Vec<ValueShape>,
        found: ValueShape,
    },
}

/// One value among the tied candidates of a diverged group field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergentValue {
    pub entity: EntityId,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Issue {
    /// A document or extraction unit could not be turned into field candidates. The unit was
    /// skipped.
    ParseFailure { path: String, message: String },

    /// Two record files declare the same identity. The later path was skipped.
    DuplicateRecord {
        entity: EntityId,
        path: String,
        first_path: String,
    },

    MissingLayer {
        entity: EntityId,
        layer: LayerRank,
        path: Option<String>,
    },

    /// The record has no descriptive content. It is still emitted, but never counted as
    /// production-ready.
    IncompleteRecord {
        entity: EntityId,
        path: Option<String>,
    },

    /// Two layers disagreed on a non-cumulative field. The losing value is kept here.
    MergeConflict {
        entity: EntityId,
        field: String,
        winner_layer: LayerRank,
        winner: FieldValue,
        loser_layer: LayerRank,
        loser: FieldValue,
        loser_more_complete: bool,
    },

    SchemaDrift {
        entity: EntityId,
        field: String,
        layers: Vec<LayerRank>,
        #[serde(flatten)]
        reason: DriftReason,
    },

    /// A field-name variant that looks like a vocabulary field. Never renamed automatically.
    RenameCandidate {
        field: String,
        suggested: Field,
        entities: Vec<EntityId>,
        /// True when no record holding the variant also holds the suggested field.
        exclusive: bool,
    },

    /// Two members of a sibling list disagree on the group's membership.
    AsymmetricGroup {
        entity: EntityId,
        sibling: EntityId,
        expected: Vec<EntityId>,
        found: Vec<EntityId>,
    },

    MissingGroupMember { group: String, member: EntityId },

    /// Siblings hold different values of equal richness for a shared field.
    DivergedGroup {
        group: String,
        field: Field,
        values: Vec<DivergentValue>,
    },

    GroupConsistency {
        group: String,
        field: Field,
        members: Vec<EntityId>,
    },

    Orphan { entity: EntityId, path: String },

    BrokenRef {
        manifest: String,
        pointer: String,
        resolved: String,
        declared: Option<EntityId>,
    },

    DuplicateRef {
        entity: EntityId,
        path: String,
        manifests: Vec<String>,
    },

    /// A manifest reference serves a record whose own identity differs from the declared one.
    MismatchedIdentity {
        manifest: String,
        pointer: String,
        resolved: String,
        declared: EntityId,
        found: EntityId,
    },

    ManifestCycle { manifests: Vec<String> },
}

impl Issue {
    pub fn kind(&self) -> IssueKind {
        match self {
            Issue::ParseFailure { .. } => IssueKind::ParseFailure,
            Issue::DuplicateRecord { .. } => IssueKind::DuplicateRecord,
            Issue::MissingLayer { .. } => IssueKind::MissingLayer,
            Issue::IncompleteRecord { .. } => IssueKind::IncompleteRecord,
            Issue::MergeConflict { .. } => IssueKind::MergeConflict,
            Issue::SchemaDrift { .. } => IssueKind::SchemaDrift,
            Issue::RenameCandidate { .. } => IssueKind::RenameCandidate,
            Issue::AsymmetricGroup { .. } => IssueKind::AsymmetricGroup,
            Issue::MissingGroupMember { .. } => IssueKind::MissingGroupMember,
            Issue::DivergedGroup { .. } => IssueKind::DivergedGroup,
            Issue::GroupConsistency { .. } => IssueKind::GroupConsistency,
            Issue::Orphan { .. } => IssueKind::Orphan,
            Issue::BrokenRef { .. } => IssueKind::BrokenRef,
            Issue::DuplicateRef { .. } => IssueKind::DuplicateRef,
            Issue::MismatchedIdentity { .. } => IssueKind::MismatchedIdentity,
            Issue::ManifestCycle { .. } => IssueKind::ManifestCycle,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Issue::MergeConflict {
                loser_more_complete,
                ..
            } => {
                if *loser_more_complete {
                    Severity::Warning
                } else {
                    Severity::Info
                }
            }
            Issue::DuplicateRef { .. }
            | Issue::Orphan { .. }
            | Issue::MissingLayer { .. }
            | Issue::IncompleteRecord { .. }
            | Issue::SchemaDrift { .. }
            | Issue::RenameCandidate { .. }
            | Issue::MissingGroupMember { .. }
            | Issue::GroupConsistency { .. } => Severity::Warning,
            Issue::ParseFailure { .. }
            | Issue::DuplicateRecord { .. }
            | Issue::AsymmetricGroup { .. }
            | Issue::DivergedGroup { .. }
            | Issue::BrokenRef { .. }
            | Issue::ManifestCycle { .. } => Severity::Error,
            Issue::MismatchedIdentity { .. } => Severity::Critical,
        }
    }

    /// Create a parse failure issue
    pub fn parse_failure(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Entity the issue is about, when it concerns exactly one.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Issue::DuplicateRecord { entity, .. }
            | Issue::MissingLayer { entity, .. }
            | Issue::IncompleteRecord { entity, .. }
            | Issue::MergeConflict { entity, .. }
            | Issue::SchemaDrift { entity, .. }
            | Issue::AsymmetricGroup { entity, .. }
            | Issue::Orphan { entity, .. }
            | Issue::DuplicateRef { entity, .. } => Some(entity),
            Issue::MismatchedIdentity { declared, .. } => Some(declared),
            Issue::MissingGroupMember { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn is_manifest_issue(&self) -> bool {
        matches!(
            self.kind(),
            IssueKind::Orphan
                | IssueKind::BrokenRef
                | IssueKind::DuplicateRef
                | IssueKind::MismatchedIdentity
                | IssueKind::ManifestCycle
        )
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: ", self.severity(), self.kind())?;
        match self {
            Issue::ParseFailure { path, message } => write!(f, "{path}: {message}"),
            Issue::DuplicateRecord {
                entity,
                path,
                first_path,
            } => write!(f, "{entity} in {path} is already defined by {first_path}"),
            Issue::MissingLayer {
                entity,
                layer,
                path,
            } => match path {
                Some(path) => write!(f, "{entity} ({path}) has no {layer} record"),
                None => write!(f, "{entity} has no {layer} record"),
            },
            Issue::IncompleteRecord { entity, .. } => {
                write!(f, "{entity} has no descriptive field")
            }
            Issue::MergeConflict {
                entity,
                field,
                winner_layer,
                loser_layer,
                loser_more_complete,
                ..
            } => {
                write!(
                    f,
                    "{entity}.{field}: {winner_layer} overrides {loser_layer}"
                )?;
                if *loser_more_complete {
                    write!(f, " (discarded value is more complete)")?;
                }
                Ok(())
            }
            Issue::SchemaDrift {
                entity,
                field,
                reason,
                ..
            } => match reason {
                DriftReason::UnknownField => {
                    write!(f, "{entity}.{field} is not a vocabulary field")
                }
                DriftReason::WrongShape { expected, found } => {
                    let expected = expected
                        .iter()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                        .join("|");
                    write!(f, "{entity}.{field} is a {found}, expected {expected}")
                }
            },
            Issue::RenameCandidate {
                field,
                suggested,
                entities,
                exclusive,
            } => write!(
                f,
                "'{field}' may be '{suggested}' ({} records{})",
                entities.len(),
                if *exclusive { ", never alongside it" } else { "" }
            ),
            Issue::AsymmetricGroup {
                entity, sibling, ..
            } => write!(
                f,
                "{entity} and {sibling} list different sibling sets"
            ),
            Issue::MissingGroupMember { group, member } => {
                write!(f, "group {group} names {member}, which has no record")
            }
            Issue::DivergedGroup {
                group,
                field,
                values,
            } => write!(
                f,
                "group {group} holds {} tied values for {field}",
                values.len()
            ),
            Issue::GroupConsistency {
                group,
                field,
                members,
            } => write!(
                f,
                "group {group} members {} disagree on {field}",
                members
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Issue::Orphan { entity, path } => {
                write!(f, "{entity} ({path}) is unreachable from the manifest root")
            }
            Issue::BrokenRef {
                manifest, pointer, ..
            } => write!(f, "{manifest} -> {pointer} does not exist"),
            Issue::DuplicateRef {
                entity, manifests, ..
            } => write!(
                f,
                "{entity} is referenced {} times ({})",
                manifests.len(),
                manifests.join(", ")
            ),
            Issue::MismatchedIdentity {
                manifest,
                pointer,
                declared,
                found,
                ..
            } => write!(
                f,
                "{manifest} -> {pointer} declares {declared} but the record is {found}"
            ),
            Issue::ManifestCycle { manifests } => {
                write!(f, "cycle through {}", manifests.join(" -> "))
            }
        }
    }
}

/// Pass/fail outcome of a run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Append-only issue collector owned by the run context.
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> IssueLog {
        IssueLog::default()
    }

    pub fn push(&mut self, issue: Issue) {
        match issue.severity() {
            Severity::Info => tracing::debug!("{issue}"),
            _ => tracing::warn!("{issue}"),
        }
        self.issues.push(issue);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind() == kind)
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<IssueKind, usize> {
        let mut counts = BTreeMap::new();
        for issue in self.issues.iter() {
            *counts.entry(issue.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_at_least(&self, threshold: Severity) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity() >= threshold)
            .count()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity()).max()
    }

    pub fn verdict(&self, fail_on: Severity) -> Verdict {
        if self.count_at_least(fail_on) > 0 {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    pub fn into_vec(self) -> Vec<Issue> {
        self.issues
    }
}

impl Extend<Issue> for IssueLog {
    fn extend<T: IntoIterator<Item = Issue>>(&mut self, iter: T) {
        for issue in iter {
            self.push(issue);
        }
    }
}
