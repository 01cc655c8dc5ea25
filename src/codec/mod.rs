//! On-disk document formats of a corpus.
//!
//! ## Key Components
//!
//! - [`CorpusDocument`] trait - parse a document from YAML text and render it back
//! - [`entity::EntityDocument`] - one entity record file, one section per layer
//! - [`group::GroupDocument`] - an explicit group definition
//! - [`manifest::ManifestDocument`] - an index node listing child manifests and record references
//! - [`production::ProductionDocument`] - the materialized canonical view of one entity
//!
//! Every document is rendered as a complete replacement of what was on disk. Nothing in this
//! module patches a document in place.

pub mod entity;
pub mod group;
pub mod manifest;
pub mod production;

pub use entity::{EntityDocument, GroupMembership, LayerSection};
pub use group::GroupDocument;
pub use manifest::{ManifestDocument, ManifestEntry};
pub use production::ProductionDocument;

use crate::error::LaminaError;

pub trait CorpusDocument: Sized {
    /// Parse the document from its YAML source.
    fn parse(content: &str) -> Result<Self, LaminaError>;

    /// Render the complete document.
    fn render(&self) -> Result<String, LaminaError>;
}

pub(crate) fn parse_mapping(content: &str) -> Result<serde_yaml::Mapping, LaminaError> {
    match serde_yaml::from_str::<serde_yaml::Value>(content)? {
        serde_yaml::Value::Mapping(map) => Ok(map),
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        other => Err(LaminaError::Codec(format!(
            "expected a mapping at the document root, found {}",
            yaml_kind(&other)
        ))),
    }
}

pub(crate) fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    use serde_yaml::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
