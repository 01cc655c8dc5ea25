//! Explicit group documents.
//!
//! ```yaml
//! group_id: counter_family
//! title: Counter instructions
//! members: [ADDCT1, ADDCT2, ADDCT3]
//! shared_fields: [description, timing]
//! ```
//!
//! `members` may also be a mapping keyed by member id, in which case the values are ignored.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use super::CorpusDocument;
use crate::{
    error::LaminaError,
    properties::{yaml_key_to_string, EntityId, Field},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_members")]
    pub members: Vec<EntityId>,
    /// Overrides the configured shared-field list for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_fields: Option<Vec<String>>,
}

fn deserialize_members<'de, D>(deserializer: D) -> Result<Vec<EntityId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let mut members: Vec<EntityId> = match value {
        Value::Null => vec![],
        Value::Sequence(items) => items
            .iter()
            .filter_map(yaml_key_to_string)
            .map(|s| EntityId::new(&s))
            .collect(),
        Value::Mapping(map) => map
            .keys()
            .filter_map(yaml_key_to_string)
            .map(|s| EntityId::new(&s))
            .collect(),
        _ => {
            return Err(serde::de::Error::custom(
                "members must be a list or a mapping keyed by member id",
            ))
        }
    };
    members.retain(|m| !m.is_empty());
    members.sort();
    members.dedup();
    Ok(members)
}

impl GroupDocument {
    /// The document's shared-field override resolved against the vocabulary. Unknown names are
    /// dropped with a warning.
    pub fn shared_field_override(&self) -> Option<Vec<Field>> {
        self.shared_fields.as_ref().map(|names| {
            names
                .iter()
                .filter_map(|name| match Field::from_name(name.trim()) {
                    Some(field) => Some(field),
                    None => {
                        tracing::warn!(
                            "group {}: '{name}' is not a vocabulary field, ignored",
                            self.group_id
                        );
                        None
                    }
                })
                .collect()
        })
    }
}

impl CorpusDocument for GroupDocument {
    fn parse(content: &str) -> Result<Self, LaminaError> {
        let doc: GroupDocument = serde_yaml::from_str(content)?;
        if doc.group_id.trim().is_empty() {
            return Err(LaminaError::Codec("group document has no group_id".to_string()));
        }
        Ok(doc)
    }

    fn render(&self) -> Result<String, LaminaError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
