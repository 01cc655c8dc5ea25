pub use enumset::EnumSet;
/// [crate::properties] contains the typed building blocks every pipeline stage exchanges: the
/// controlled field vocabulary, field values, entity identities, layer ranks, and the layer and
/// canonical records built from them.
use enumset::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};
use unicode_normalization::UnicodeNormalization;

use crate::error::LaminaError;

/// Shape a field value takes on disk.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    Scalar,
    List,
    Mapping,
}

impl Display for ValueShape {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ValueShape::Scalar => write!(f, "scalar"),
            ValueShape::List => write!(f, "list"),
            ValueShape::Mapping => write!(f, "mapping"),
        }
    }
}

/// Field categories a record's completeness is scored against.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    Identity,
    Structural,
    Descriptive,
    Behavioral,
    CrossReference,
}

/// The controlled vocabulary of field names a normalized source may emit.
///
/// Each field declares the value shapes it accepts, the quality category it counts toward, and
/// whether it is intentionally per-member (never copied between group siblings).
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Category,
    Syntax,
    Encoding,
    Operands,
    Parameters,
    Returns,
    Description,
    BriefDescription,
    Notes,
    Examples,
    Timing,
    Flags,
    Specifics,
    Related,
    DocumentationSource,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Category => "category",
            Field::Syntax => "syntax",
            Field::Encoding => "encoding",
            Field::Operands => "operands",
            Field::Parameters => "parameters",
            Field::Returns => "returns",
            Field::Description => "description",
            Field::BriefDescription => "brief_description",
            Field::Notes => "notes",
            Field::Examples => "examples",
            Field::Timing => "timing",
            Field::Flags => "flags",
            Field::Specifics => "specifics",
            Field::Related => "related",
            Field::DocumentationSource => "documentation_source",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        EnumSet::<Field>::all()
            .iter()
            .find(|field| field.as_str() == name)
    }

    pub fn shapes(&self) -> EnumSet<ValueShape> {
        match self {
            Field::Name
            | Field::Category
            | Field::Encoding
            | Field::Returns
            | Field::Description
            | Field::BriefDescription
            | Field::DocumentationSource => ValueShape::Scalar.into(),
            Field::Syntax | Field::Operands => ValueShape::Scalar | ValueShape::List,
            Field::Parameters => ValueShape::List | ValueShape::Mapping,
            Field::Notes | Field::Examples | Field::Related => {
                ValueShape::Scalar | ValueShape::List
            }
            Field::Timing | Field::Flags => ValueShape::Scalar | ValueShape::Mapping,
            Field::Specifics => ValueShape::Mapping.into(),
        }
    }

    pub fn quality_category(&self) -> QualityCategory {
        match self {
            Field::Name | Field::Category => QualityCategory::Identity,
            Field::Syntax
            | Field::Encoding
            | Field::Operands
            | Field::Parameters
            | Field::Returns => QualityCategory::Structural,
            Field::Description | Field::BriefDescription | Field::Notes | Field::Examples => {
                QualityCategory::Descriptive
            }
            Field::Timing | Field::Flags | Field::Specifics => QualityCategory::Behavioral,
            Field::Related | Field::DocumentationSource => QualityCategory::CrossReference,
        }
    }

    /// Per-variant data (an operand form, a counter number) that group synchronization must
    /// never copy between siblings.
    pub fn is_per_member(&self) -> bool {
        matches!(self, Field::Operands | Field::Specifics)
    }

    /// Fields that satisfy the "at least one descriptive field" completeness minimum.
    pub fn is_descriptive(&self) -> bool {
        matches!(self, Field::Description | Field::BriefDescription)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Field {
    type Err = LaminaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::from_name(s)
            .ok_or_else(|| LaminaError::Serialization(format!("'{s}' is not a vocabulary field")))
    }
}

/// A typed field value.
///
/// Scalars keep their YAML scalar type so materialized documents round-trip numbers and booleans
/// unchanged. Nulls are never represented; a null or blank candidate is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_yaml::Number),
    Text(String),
    List(Vec<FieldValue>),
    Mapping(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn text<S: Into<String>>(s: S) -> FieldValue {
        FieldValue::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> FieldValue
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::List(items.into_iter().map(|s| FieldValue::Text(s.into())).collect())
    }

    /// Convert a raw YAML value into a field value. Returns `None` for nulls and for values that
    /// are blank all the way down (empty strings, empty lists, empty mappings).
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<FieldValue> {
        use serde_yaml::Value;
        let converted = match value {
            Value::Null => return None,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => FieldValue::Number(n.clone()),
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Sequence(seq) => {
                FieldValue::List(seq.iter().filter_map(FieldValue::from_yaml).collect())
            }
            Value::Mapping(map) => FieldValue::Mapping(
                map.iter()
                    .filter_map(|(k, v)| {
                        let key = yaml_key_to_string(k)?;
                        FieldValue::from_yaml(v).map(|v| (key, v))
                    })
                    .collect(),
            ),
            Value::Tagged(tagged) => return FieldValue::from_yaml(&tagged.value),
        };
        if converted.is_blank() {
            None
        } else {
            Some(converted)
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        use serde_yaml::Value;
        match self {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => Value::Sequence(items.iter().map(|i| i.to_yaml()).collect()),
            FieldValue::Mapping(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.to_yaml()))
                    .collect(),
            ),
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            FieldValue::Bool(_) | FieldValue::Number(_) | FieldValue::Text(_) => {
                ValueShape::Scalar
            }
            FieldValue::List(_) => ValueShape::List,
            FieldValue::Mapping(_) => ValueShape::Mapping,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|i| i.is_blank()),
            FieldValue::Mapping(map) => map.values().all(|v| v.is_blank()),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    /// Heuristic completeness measure used to compare competing values: trimmed character count
    /// for scalars, summed recursively for structured values.
    pub fn richness(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.trim().chars().count(),
            FieldValue::Bool(b) => b.to_string().len(),
            FieldValue::Number(n) => n.to_string().len(),
            FieldValue::List(items) => items.iter().map(|i| i.richness()).sum(),
            FieldValue::Mapping(map) => map
                .iter()
                .map(|(k, v)| k.chars().count() + v.richness())
                .sum(),
        }
    }

    /// Items of a cumulative field: a list's elements, or the scalar/mapping itself.
    pub fn items(&self) -> Vec<FieldValue> {
        match self {
            FieldValue::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Scalar rendering used for grouping attributes and human messages.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => n.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

pub(crate) fn yaml_key_to_string(key: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Stable, case-normalized entity identity.
///
/// Identities are NFKC-normalized, trimmed, and upper-cased, so `add`, ` ADD ` and `ＡＤＤ` all
/// name the same entity.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: &str) -> EntityId {
        EntityId(raw.nfkc().collect::<String>().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EntityId {
    fn from(raw: String) -> Self {
        EntityId::new(&raw)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        EntityId::new(raw)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source authority rank of a layer. 1 is the structural base; higher ranks are progressively
/// more narrative and may override lower ones.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct LayerRank(u8);

pub const LAYER_BASE: LayerRank = LayerRank(1);
pub const LAYER_DETAIL: LayerRank = LayerRank(2);
pub const LAYER_NARRATIVE: LayerRank = LayerRank(3);
pub const LAYER_CLARIFICATION: LayerRank = LayerRank(4);

impl LayerRank {
    pub fn new(rank: u8) -> Option<LayerRank> {
        if rank == 0 {
            None
        } else {
            Some(LayerRank(rank))
        }
    }

    pub fn rank(&self) -> u8 {
        self.0
    }

    pub fn label(&self) -> Option<&'static str> {
        match self.0 {
            1 => Some("base"),
            2 => Some("detail"),
            3 => Some("narrative"),
            4 => Some("clarification"),
            _ => None,
        }
    }

    /// Canonical section key in an entity record file (`layer1_base`, ..., `layer7`).
    pub fn section_name(&self) -> String {
        match self.label() {
            Some(label) => format!("layer{}_{}", self.0, label),
            None => format!("layer{}", self.0),
        }
    }

    /// Parse any `layer<N>` or `layer<N>_<label>` section key.
    pub fn from_section_name(key: &str) -> Option<LayerRank> {
        let rest = key.strip_prefix("layer")?;
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let suffix = &rest[digits_end..];
        if !(suffix.is_empty() || (suffix.starts_with('_') && suffix.len() > 1)) {
            return None;
        }
        rest[..digits_end].parse::<u8>().ok().and_then(LayerRank::new)
    }
}

impl TryFrom<u8> for LayerRank {
    type Error = String;

    fn try_from(rank: u8) -> Result<Self, Self::Error> {
        LayerRank::new(rank).ok_or_else(|| "layer rank must be at least 1".to_string())
    }
}

impl From<LayerRank> for u8 {
    fn from(rank: LayerRank) -> Self {
        rank.0
    }
}

impl Display for LayerRank {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "layer {}", self.0)
    }
}

/// Where a layer record came from.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Provenance {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
}

impl Provenance {
    pub fn new<S: Into<String>>(source: S) -> Provenance {
        Provenance {
            source: source.into(),
            extracted_at: None,
        }
    }

    pub fn at<S: Into<String>>(mut self, extracted_at: S) -> Provenance {
        self.extracted_at = Some(extracted_at.into());
        self
    }
}

/// The field-candidate set one source contributed for one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub entity: EntityId,
    pub layer: Option<LayerRank>,
    pub fields: BTreeMap<Field, FieldValue>,
    /// Candidates whose names are outside the controlled vocabulary.
    pub unvalidated: BTreeMap<String, FieldValue>,
    pub provenance: Provenance,
}

impl LayerRecord {
    pub fn new(entity: EntityId, layer: LayerRank, provenance: Provenance) -> LayerRecord {
        LayerRecord {
            entity,
            layer: Some(layer),
            provenance,
            ..Default::default()
        }
    }

    pub fn with(mut self, field: Field, value: FieldValue) -> LayerRecord {
        self.fields.insert(field, value);
        self
    }

    pub fn with_unvalidated<S: Into<String>>(mut self, name: S, value: FieldValue) -> LayerRecord {
        self.unvalidated.insert(name.into(), value);
        self
    }

    pub fn rank(&self) -> LayerRank {
        self.layer.unwrap_or(LAYER_BASE)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unvalidated.is_empty()
    }
}

/// Which layers a canonical field value came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOrigin {
    pub layers: Vec<LayerRank>,
    /// Set when group synchronization copied the value from a sibling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_from: Option<EntityId>,
}

/// Ordinal reporting band for a quality score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Minimal,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityBand {
    pub const ALL: [QualityBand; 5] = [
        QualityBand::Minimal,
        QualityBand::Poor,
        QualityBand::Fair,
        QualityBand::Good,
        QualityBand::Excellent,
    ];

    /// Band for a score expressed as a percentage of the maximum attainable score.
    pub fn from_percentage(percentage: f64) -> QualityBand {
        if percentage >= 85.0 {
            QualityBand::Excellent
        } else if percentage >= 65.0 {
            QualityBand::Good
        } else if percentage >= 45.0 {
            QualityBand::Fair
        } else if percentage >= 25.0 {
            QualityBand::Poor
        } else {
            QualityBand::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBand::Minimal => "minimal",
            QualityBand::Poor => "poor",
            QualityBand::Fair => "fair",
            QualityBand::Good => "good",
            QualityBand::Excellent => "excellent",
        }
    }
}

impl Display for QualityBand {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: u32,
    pub max: u32,
    pub band: QualityBand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<QualityCategory>,
}

/// The merged view of one entity across all its layer records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: EntityId,
    pub fields: BTreeMap<Field, FieldValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unvalidated: BTreeMap<String, FieldValue>,
    /// Per field name (vocabulary or unvalidated), the layers that contributed its value.
    pub field_provenance: BTreeMap<String, FieldOrigin>,
    /// Every layer rank that had a record for this entity, ascending.
    pub layers: Vec<LayerRank>,
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScore>,
}

impl CanonicalRecord {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.get(&field).is_some_and(|v| !v.is_blank())
    }

    /// Grouping attribute value (e.g. `category`) rendered as a scalar.
    pub fn attribute(&self, field: Field) -> Option<String> {
        self.get(field)
            .map(|v| v.render().trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn score(&self) -> u32 {
        self.quality.as_ref().map(|q| q.score).unwrap_or(0)
    }

    /// SHA-256 over the canonical YAML rendering. Equal fingerprints mean byte-identical merges.
    pub fn fingerprint(&self) -> Result<String, LaminaError> {
        let rendered = serde_yaml::to_string(self)?;
        Ok(hex::encode(Sha256::digest(rendered.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_field_names_round_trip() {
        for field in EnumSet::<Field>::all() {
            assert_eq!(Field::from_name(field.as_str()), Some(field));
            assert_eq!(field.as_str().parse::<Field>().unwrap(), field);
        }
        assert!(Field::from_name("detailed_description").is_none());
        assert!("flags_affected".parse::<Field>().is_err());
    }

    #[test]
    fn test_field_serde_matches_vocabulary() {
        let json = serde_json::to_string(&Field::BriefDescription).unwrap();
        assert_eq!(json, "\"brief_description\"");
        let field: Field = serde_json::from_str("\"documentation_source\"").unwrap();
        assert_eq!(field, Field::DocumentationSource);
    }

    #[test]
    fn test_per_member_fields_are_not_descriptive() {
        for field in EnumSet::<Field>::all() {
            if field.is_per_member() {
                assert!(!field.is_descriptive());
            }
        }
        assert!(Field::Specifics.is_per_member());
        assert!(!Field::Description.is_per_member());
    }

    #[test]
    fn test_entity_id_normalization() {
        assert_eq!(EntityId::new(" add "), EntityId::new("ADD"));
        assert_eq!(EntityId::new("ＡＤＤ"), EntityId::new("add"));
        assert_eq!(EntityId::new("jct1").as_str(), "JCT1");
        let parsed: EntityId = serde_yaml::from_str("addx").unwrap();
        assert_eq!(parsed.as_str(), "ADDX");
    }

    #[test]
    fn test_layer_section_names() {
        assert_eq!(
            LayerRank::from_section_name("layer1_base"),
            Some(LAYER_BASE)
        );
        assert_eq!(
            LayerRank::from_section_name("layer3_silicon_doc"),
            Some(LAYER_NARRATIVE)
        );
        assert_eq!(
            LayerRank::from_section_name("layer4_chip_clarifications"),
            Some(LAYER_CLARIFICATION)
        );
        assert_eq!(
            LayerRank::from_section_name("layer12").map(|r| r.rank()),
            Some(12)
        );
        assert_eq!(LayerRank::from_section_name("layer0_base"), None);
        assert_eq!(LayerRank::from_section_name("layer_base"), None);
        assert_eq!(LayerRank::from_section_name("layer2_"), None);
        assert_eq!(LayerRank::from_section_name("layers"), None);
        assert_eq!(LAYER_DETAIL.section_name(), "layer2_detail");
        assert_eq!(LayerRank::new(7).unwrap().section_name(), "layer7");
    }

    #[test]
    fn test_field_value_from_yaml_drops_blanks() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("{a: '', b: [], c: ~, d: '  ', e: [x, ''], f: 2}").unwrap();
        let value = FieldValue::from_yaml(&yaml).unwrap();
        let FieldValue::Mapping(map) = value else {
            panic!("expected mapping");
        };
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec!["e", "f"]);
        assert_eq!(map["e"], FieldValue::list(["x"]));
        assert!(FieldValue::from_yaml(&serde_yaml::Value::Null).is_none());
    }

    #[test]
    fn test_richness() {
        assert_eq!(FieldValue::text("  foo  ").richness(), 3);
        assert_eq!(FieldValue::list(["ab", "cde"]).richness(), 5);
        let mut map = BTreeMap::new();
        map.insert("C".to_string(), FieldValue::text("carry"));
        assert_eq!(FieldValue::Mapping(map).richness(), 6);
    }

    #[test]
    fn test_shapes() {
        assert_eq!(FieldValue::text("x").shape(), ValueShape::Scalar);
        assert!(Field::Timing.shapes().contains(ValueShape::Mapping));
        assert!(!Field::Description.shapes().contains(ValueShape::List));
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(QualityBand::from_percentage(15.0), QualityBand::Minimal);
        assert_eq!(QualityBand::from_percentage(25.0), QualityBand::Poor);
        assert_eq!(QualityBand::from_percentage(50.0), QualityBand::Fair);
        assert_eq!(QualityBand::from_percentage(70.0), QualityBand::Good);
        assert_eq!(QualityBand::from_percentage(100.0), QualityBand::Excellent);
        assert!(QualityBand::Minimal < QualityBand::Excellent);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let mut record = CanonicalRecord {
            id: EntityId::new("add"),
            ..Default::default()
        };
        record
            .fields
            .insert(Field::Description, FieldValue::text("Add S into D."));
        let a = record.fingerprint().unwrap();
        let b = record.clone().fingerprint().unwrap();
        assert_eq!(a, b);
        record.fields.insert(Field::Timing, FieldValue::text("2"));
        assert_ne!(a, record.fingerprint().unwrap());
    }
}
