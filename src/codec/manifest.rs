//! Manifest (index) documents.
//!
//! ```yaml
//! type: category
//! key: Math
//! title: Math and logic
//! children: [../other/branch.yaml]
//! entries:
//!   - { id: ADD, path: ../../records/add.yaml }
//! ```
//!
//! Every pointer is relative to the manifest holding it. Older manifests spell entry fields
//! `object_id` and `yaml_path`; both are accepted.

use serde::{Deserialize, Serialize};

use super::CorpusDocument;
use crate::{error::LaminaError, properties::EntityId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(alias = "object_id")]
    pub id: EntityId,
    #[serde(alias = "yaml_path")]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<ManifestEntry>,
}

impl ManifestDocument {
    pub fn new<S: Into<String>>(kind: S) -> ManifestDocument {
        ManifestDocument {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn has_child(&self, pointer: &str) -> bool {
        self.children.iter().any(|c| c == pointer)
    }
}

impl CorpusDocument for ManifestDocument {
    fn parse(content: &str) -> Result<Self, LaminaError> {
        let doc: ManifestDocument = serde_yaml::from_str(content)?;
        if doc.kind.trim().is_empty() {
            return Err(LaminaError::Codec("manifest has an empty type tag".to_string()));
        }
        Ok(doc)
    }

    fn render(&self) -> Result<String, LaminaError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_parse_manifest() {
        let doc = ManifestDocument::parse(
            "type: root\nchildren: [categories/math.yaml]\nentries:\n  - { id: add, path: ../records/add.yaml }\n",
        )
        .unwrap();
        assert_eq!(doc.kind, "root");
        assert!(doc.has_child("categories/math.yaml"));
        assert_eq!(doc.entries[0].id.as_str(), "ADD");
    }

    #[test]
    fn test_legacy_entry_keys() {
        let doc = ManifestDocument::parse(
            "type: category\nentries:\n  - object_id: ADDX\n    yaml_path: ../records/addx.yaml\n",
        )
        .unwrap();
        assert_eq!(
            doc.entries,
            vec![ManifestEntry {
                id: EntityId::new("ADDX"),
                path: "../records/addx.yaml".to_string(),
            }]
        );
    }

    #[test]
    fn test_type_tag_required() {
        assert!(ManifestDocument::parse("children: [a.yaml]\n").is_err());
    }

    #[test]
    fn test_render_omits_empty_lists() {
        let rendered = ManifestDocument::new("category").render().unwrap();
        assert_eq!(rendered, "type: category\n");
    }
}
