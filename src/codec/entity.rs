//! Entity record files.
//!
//! ```yaml
//! id: ADD
//! layer1_base: { name: ADD, timing: "2" }
//! layer3_narrative: { description: "Add S into D." }
//! provenance:
//!   layer1_base: { source: instruction-table, extracted_at: "2025-01-19T10:00:00Z" }
//! group: { id: add_family, siblings: [ADDX, ADDS] }
//! ```
//!
//! Any `layer<N>` or `layer<N>_<label>` key is a layer section of rank N. Unknown top-level keys
//! are kept and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::{parse_mapping, yaml_kind, CorpusDocument};
use crate::{
    error::LaminaError,
    properties::{yaml_key_to_string, EntityId, LayerRank, LayerRecord, Provenance},
};

/// Sibling list carried inside an entity record file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMembership {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub siblings: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerSection {
    /// Section key as it appeared on disk (`layer3_silicon_doc`).
    pub key: String,
    pub fields: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDocument {
    pub id: EntityId,
    pub layers: BTreeMap<LayerRank, LayerSection>,
    pub provenance: BTreeMap<LayerRank, Provenance>,
    pub group: Option<GroupMembership>,
    pub extra: Mapping,
}

impl EntityDocument {
    pub fn new(id: EntityId) -> EntityDocument {
        EntityDocument {
            id,
            ..Default::default()
        }
    }

    /// Siblings listed by this record, excluding itself.
    pub fn siblings(&self) -> Vec<EntityId> {
        let mut siblings: Vec<EntityId> = self
            .group
            .as_ref()
            .map(|g| g.siblings.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|s| *s != self.id && !s.is_empty())
            .collect();
        siblings.sort();
        siblings.dedup();
        siblings
    }

    /// Replace the whole section for the record's layer. The previous section, if any, is
    /// discarded rather than patched.
    pub fn replace_layer(&mut self, record: &LayerRecord) {
        let rank = record.rank();
        let mut fields = Mapping::new();
        for (field, value) in record.fields.iter() {
            fields.insert(Value::String(field.as_str().to_string()), value.to_yaml());
        }
        for (name, value) in record.unvalidated.iter() {
            fields.insert(Value::String(name.clone()), value.to_yaml());
        }
        self.layers.insert(
            rank,
            LayerSection {
                key: rank.section_name(),
                fields,
            },
        );
        self.provenance.insert(rank, record.provenance.clone());
    }

    fn parse_group(value: Value) -> Result<Option<GroupMembership>, LaminaError> {
        match value {
            Value::Null => Ok(None),
            Value::String(id) => Ok(Some(GroupMembership {
                id: Some(id),
                siblings: vec![],
            })),
            Value::Mapping(_) => Ok(Some(serde_yaml::from_value(value)?)),
            other => Err(LaminaError::Codec(format!(
                "group must be a mapping, found {}",
                yaml_kind(&other)
            ))),
        }
    }
}

impl CorpusDocument for EntityDocument {
    fn parse(content: &str) -> Result<Self, LaminaError> {
        let root = parse_mapping(content)?;
        let mut doc = EntityDocument::default();
        let mut raw_provenance: Option<Value> = None;

        for (key, value) in root.into_iter() {
            let Some(key) = yaml_key_to_string(&key) else {
                return Err(LaminaError::Codec(
                    "top-level keys must be scalars".to_string(),
                ));
            };
            if key == "id" {
                let id = match &value {
                    Value::String(s) => EntityId::new(s),
                    Value::Number(n) => EntityId::new(&n.to_string()),
                    other => {
                        return Err(LaminaError::Codec(format!(
                            "id must be a scalar, found {}",
                            yaml_kind(other)
                        )))
                    }
                };
                doc.id = id;
            } else if let Some(rank) = LayerRank::from_section_name(&key) {
                let fields = match value {
                    Value::Mapping(map) => map,
                    Value::Null => Mapping::new(),
                    other => {
                        return Err(LaminaError::Codec(format!(
                            "{key} must be a mapping of fields, found {}",
                            yaml_kind(&other)
                        )))
                    }
                };
                if let Some(existing) = doc.layers.get(&rank) {
                    return Err(LaminaError::Codec(format!(
                        "{key} and {} are both {rank} sections",
                        existing.key
                    )));
                }
                doc.layers.insert(rank, LayerSection { key, fields });
            } else if key == "provenance" {
                raw_provenance = Some(value);
            } else if key == "group" {
                doc.group = Self::parse_group(value)?;
            } else {
                doc.extra.insert(Value::String(key), value);
            }
        }

        if doc.id.is_empty() {
            return Err(LaminaError::Codec(
                "record has no id field".to_string(),
            ));
        }

        if let Some(value) = raw_provenance {
            let stamps: BTreeMap<String, Provenance> = match value {
                Value::Null => BTreeMap::new(),
                other => serde_yaml::from_value(other)?,
            };
            for (section, stamp) in stamps {
                match LayerRank::from_section_name(&section) {
                    Some(rank) => {
                        doc.provenance.insert(rank, stamp);
                    }
                    None => tracing::debug!(
                        "{}: provenance for unknown section '{section}' ignored",
                        doc.id
                    ),
                }
            }
        }
        Ok(doc)
    }

    fn render(&self) -> Result<String, LaminaError> {
        let mut root = Mapping::new();
        root.insert(
            Value::String("id".to_string()),
            Value::String(self.id.to_string()),
        );
        for section in self.layers.values() {
            root.insert(
                Value::String(section.key.clone()),
                Value::Mapping(section.fields.clone()),
            );
        }
        if !self.provenance.is_empty() {
            let mut stamps = Mapping::new();
            for (rank, stamp) in self.provenance.iter() {
                let key = self
                    .layers
                    .get(rank)
                    .map(|s| s.key.clone())
                    .unwrap_or_else(|| rank.section_name());
                stamps.insert(Value::String(key), serde_yaml::to_value(stamp)?);
            }
            root.insert(
                Value::String("provenance".to_string()),
                Value::Mapping(stamps),
            );
        }
        if let Some(group) = &self.group {
            root.insert(
                Value::String("group".to_string()),
                serde_yaml::to_value(group)?,
            );
        }
        for (key, value) in self.extra.iter() {
            root.insert(key.clone(), value.clone());
        }
        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }
}
