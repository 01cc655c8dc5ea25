//! The normalized-record contract between external extraction adapters and the core.
//!
//! An adapter turns one raw source (a table, a manual, a scraped page) into a list of
//! [RawExtraction] units. [normalize] checks a unit against the contract and produces the typed
//! [LayerRecord] every later stage consumes: names in the controlled vocabulary become typed
//! fields, anything else lands in the `unvalidated` bucket. Blank candidates are dropped.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{
    error::LaminaError,
    properties::{yaml_key_to_string, EntityId, Field, FieldValue, LayerRank, LayerRecord, Provenance},
};

/// One extraction unit as an adapter emits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    pub entity: String,
    pub layer: u8,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
    #[serde(default)]
    pub fields: Mapping,
}

/// Convert one extraction unit into a layer record.
pub fn normalize(raw: RawExtraction) -> Result<LayerRecord, LaminaError> {
    let entity = EntityId::new(&raw.entity);
    if entity.is_empty() {
        return Err(LaminaError::Codec(format!(
            "extraction from '{}' has no entity id",
            raw.source
        )));
    }
    let layer = LayerRank::new(raw.layer).ok_or_else(|| {
        LaminaError::Codec(format!("{entity}: layer numbers start at 1"))
    })?;
    let mut provenance = Provenance::new(raw.source);
    provenance.extracted_at = raw.extracted_at;
    from_section(entity, layer, &raw.fields, provenance)
}

/// Build a layer record from a section's field mapping.
pub fn from_section(
    entity: EntityId,
    layer: LayerRank,
    fields: &Mapping,
    provenance: Provenance,
) -> Result<LayerRecord, LaminaError> {
    let mut record = LayerRecord::new(entity, layer, provenance);
    for (name, value) in fields.iter() {
        let Some(name) = yaml_key_to_string(name) else {
            return Err(LaminaError::Codec(format!(
                "{}: {layer} has a non-scalar field name",
                record.entity
            )));
        };
        let name = name.trim();
        let Some(value) = FieldValue::from_yaml(value) else {
            tracing::trace!("{}: dropping blank '{name}' from {layer}", record.entity);
            continue;
        };
        match Field::from_name(name) {
            Some(field) => {
                record.fields.insert(field, value);
            }
            None => {
                record.unvalidated.insert(name.to_string(), value);
            }
        }
    }
    Ok(record)
}

/// Outcome of extracting one unit: a normalized record or a per-unit failure message.
pub type UnitResult = Result<LayerRecord, String>;

/// External extraction adapters implement this to feed the core.
pub trait SourceAdapter {
    fn source_name(&self) -> &str;

    /// Extract all units in `content`. `Err` means the whole document was unreadable; per-unit
    /// failures are returned in the list so the rest of the batch still applies.
    fn extract(&self, content: &str) -> Result<Vec<UnitResult>, LaminaError>;
}

/// Reads a YAML list of [RawExtraction] units.
///
/// ```yaml
/// - { entity: ADD, layer: 1, source: instruction-table, fields: { name: ADD, timing: "2" } }
/// - { entity: ADD, layer: 3, source: manual, fields: { description: Add S into D. } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct YamlBatchAdapter {
    name: String,
}

impl YamlBatchAdapter {
    pub fn new<S: Into<String>>(name: S) -> YamlBatchAdapter {
        YamlBatchAdapter { name: name.into() }
    }
}

impl SourceAdapter for YamlBatchAdapter {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn extract(&self, content: &str) -> Result<Vec<UnitResult>, LaminaError> {
        let units = match serde_yaml::from_str::<Value>(content)? {
            Value::Sequence(units) => units,
            Value::Null => vec![],
            _ => {
                return Err(LaminaError::Codec(format!(
                    "{}: a batch must be a list of extraction units",
                    self.name
                )))
            }
        };
        Ok(units
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| {
                serde_yaml::from_value::<RawExtraction>(unit)
                    .map_err(LaminaError::from)
                    .and_then(normalize)
                    .map_err(|e| format!("unit {idx}: {e}"))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{LAYER_BASE, LAYER_NARRATIVE};
    use test_log::test;

    #[test]
    fn test_normalize_splits_vocabulary_and_unvalidated() {
        let fields: Mapping = serde_yaml::from_str(
            "name: ADD\ncycles: 2\ndetailed_description: long\ndescription: ''\nrelated: [ADDX]\n",
        )
        .unwrap();
        let record = normalize(RawExtraction {
            entity: "add".to_string(),
            layer: 3,
            source: "manual".to_string(),
            extracted_at: Some("2025-01-19".to_string()),
            fields,
        })
        .unwrap();

        assert_eq!(record.entity.as_str(), "ADD");
        assert_eq!(record.rank(), LAYER_NARRATIVE);
        assert_eq!(
            record.fields.keys().copied().collect::<Vec<_>>(),
            vec![Field::Name, Field::Related]
        );
        assert!(!record.fields.contains_key(&Field::Description));
        assert_eq!(
            record.unvalidated.keys().cloned().collect::<Vec<_>>(),
            vec!["cycles", "detailed_description"]
        );
        assert_eq!(record.provenance.extracted_at.as_deref(), Some("2025-01-19"));
    }

    #[test]
    fn test_normalize_rejects_contract_violations() {
        let missing_entity = RawExtraction {
            entity: "  ".to_string(),
            layer: 1,
            source: "table".to_string(),
            ..Default::default()
        };
        assert!(normalize(missing_entity).is_err());

        let zero_layer = RawExtraction {
            entity: "ADD".to_string(),
            layer: 0,
            source: "table".to_string(),
            ..Default::default()
        };
        assert!(normalize(zero_layer).is_err());
    }

    #[test]
    fn test_batch_adapter_isolates_bad_units() {
        let batch = r#"
- { entity: ADD, layer: 1, source: table, fields: { name: ADD } }
- { entity: SUB, layer: zero, source: table }
- { entity: SUB, layer: 1, source: table, fields: { name: SUB } }
"#;
        let units = YamlBatchAdapter::new("batch").extract(batch).unwrap();
        assert_eq!(units.len(), 3);
        assert!(units[0].is_ok());
        assert!(units[1].as_ref().unwrap_err().starts_with("unit 1"));
        let sub = units[2].as_ref().unwrap();
        assert_eq!(sub.rank(), LAYER_BASE);
        assert_eq!(sub.entity.as_str(), "SUB");
    }

    #[test]
    fn test_batch_adapter_rejects_non_list() {
        assert!(YamlBatchAdapter::new("batch").extract("entity: ADD\n").is_err());
        assert!(YamlBatchAdapter::new("batch").extract("").unwrap().is_empty());
    }
}
