//! Production documents: the canonical view of one entity with no per-layer sectioning.
//!
//! Winning vocabulary fields are flattened to the top level in vocabulary order, followed by the
//! `unvalidated` bucket, the contributing `layers`, `group`, `quality`, and the `fingerprint` of
//! the canonical record the document was rendered from.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::{parse_mapping, CorpusDocument};
use crate::{
    error::LaminaError,
    properties::{
        yaml_key_to_string, CanonicalRecord, EntityId, Field, FieldValue, LayerRank, QualityScore,
    },
};

const RESERVED_KEYS: [&str; 6] = ["id", "unvalidated", "layers", "group", "quality", "fingerprint"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionDocument {
    pub id: EntityId,
    pub fields: BTreeMap<Field, FieldValue>,
    pub unvalidated: BTreeMap<String, FieldValue>,
    pub layers: Vec<LayerRank>,
    pub group: Option<String>,
    pub quality: Option<QualityScore>,
    pub fingerprint: String,
}

impl ProductionDocument {
    pub fn from_record(record: &CanonicalRecord) -> Result<ProductionDocument, LaminaError> {
        Ok(ProductionDocument {
            id: record.id.clone(),
            fields: record.fields.clone(),
            unvalidated: record.unvalidated.clone(),
            layers: record.layers.clone(),
            group: record.group.clone(),
            quality: record.quality.clone(),
            fingerprint: record.fingerprint()?,
        })
    }
}

fn key(s: &str) -> Value {
    Value::String(s.to_string())
}

impl CorpusDocument for ProductionDocument {
    fn parse(content: &str) -> Result<Self, LaminaError> {
        let root = parse_mapping(content)?;
        let mut doc = ProductionDocument::default();
        for (k, v) in root.iter() {
            let Some(name) = yaml_key_to_string(k) else {
                continue;
            };
            match name.as_str() {
                "id" => doc.id = serde_yaml::from_value(v.clone())?,
                "layers" => doc.layers = serde_yaml::from_value(v.clone())?,
                "group" => doc.group = serde_yaml::from_value(v.clone())?,
                "quality" => doc.quality = serde_yaml::from_value(v.clone())?,
                "fingerprint" => doc.fingerprint = serde_yaml::from_value(v.clone())?,
                "unvalidated" => {
                    if let Some(FieldValue::Mapping(map)) = FieldValue::from_yaml(v) {
                        doc.unvalidated.extend(map);
                    }
                }
                other => {
                    let Some(value) = FieldValue::from_yaml(v) else {
                        continue;
                    };
                    match Field::from_name(other) {
                        Some(field) => {
                            doc.fields.insert(field, value);
                        }
                        None => {
                            doc.unvalidated.insert(other.to_string(), value);
                        }
                    }
                }
            }
        }
        if doc.id.is_empty() {
            return Err(LaminaError::Codec("production document has no id".to_string()));
        }
        Ok(doc)
    }

    fn render(&self) -> Result<String, LaminaError> {
        let mut root = Mapping::new();
        root.insert(key("id"), Value::String(self.id.to_string()));
        for (field, value) in self.fields.iter() {
            debug_assert!(!RESERVED_KEYS.contains(&field.as_str()));
            root.insert(key(field.as_str()), value.to_yaml());
        }
        if !self.unvalidated.is_empty() {
            let bucket: Mapping = self
                .unvalidated
                .iter()
                .map(|(k, v)| (key(k), v.to_yaml()))
                .collect();
            root.insert(key("unvalidated"), Value::Mapping(bucket));
        }
        root.insert(key("layers"), serde_yaml::to_value(&self.layers)?);
        if let Some(group) = &self.group {
            root.insert(key("group"), Value::String(group.clone()));
        }
        if let Some(quality) = &self.quality {
            root.insert(key("quality"), serde_yaml::to_value(quality)?);
        }
        root.insert(key("fingerprint"), Value::String(self.fingerprint.clone()));
        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }
}
