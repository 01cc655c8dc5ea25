use crate::{
    error::LaminaError,
    issue::Severity,
    merge::PrecedencePolicy,
    properties::{EnumSet, Field, LayerRank, LAYER_BASE},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

pub const CONFIG_FILE_NAME: &str = "lamina.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub records_dir: String,
    pub groups_dir: String,
    pub manifest_root: String,
    pub production_dir: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            records_dir: "records".to_string(),
            groups_dir: "groups".to_string(),
            manifest_root: "manifests/root.yaml".to_string(),
            production_dir: "production".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub precedence: PrecedencePolicy,
    pub cumulative_fields: Vec<Field>,
    pub required_layers: Vec<u8>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            precedence: PrecedencePolicy::default(),
            cumulative_fields: vec![Field::Related, Field::Notes, Field::Examples],
            required_layers: vec![LAYER_BASE.rank()],
        }
    }
}

impl MergeConfig {
    pub fn cumulative_set(&self) -> EnumSet<Field> {
        self.cumulative_fields.iter().copied().collect()
    }

    pub fn required_ranks(&self) -> Vec<LayerRank> {
        let mut ranks: Vec<LayerRank> = self
            .required_layers
            .iter()
            .filter_map(|r| LayerRank::new(*r))
            .collect();
        ranks.sort();
        ranks.dedup();
        ranks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub shared_fields: Vec<Field>,
    pub infer_numbered: bool,
    pub infer_slash: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            shared_fields: vec![
                Field::Description,
                Field::Category,
                Field::Timing,
                Field::DocumentationSource,
                Field::Related,
            ],
            infer_numbered: true,
            infer_slash: true,
        }
    }
}

impl GroupConfig {
    /// Shared fields with per-member fields removed; those are never synchronized even when
    /// listed.
    pub fn shared_set(&self) -> EnumSet<Field> {
        self.shared_fields
            .iter()
            .copied()
            .filter(|f| !f.is_per_member())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub identity_weight: u32,
    pub structural_weight: u32,
    pub descriptive_weight: u32,
    pub behavioral_weight: u32,
    pub cross_reference_weight: u32,
    pub min_description_length: usize,
    pub production_ready: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            identity_weight: 10,
            structural_weight: 20,
            descriptive_weight: 30,
            behavioral_weight: 20,
            cross_reference_weight: 20,
            min_description_length: 100,
            production_ready: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub grouping_field: Field,
    pub node_dir: String,
    pub node_type: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        ManifestConfig {
            grouping_field: Field::Category,
            node_dir: "manifests/categories".to_string(),
            node_type: "category".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub fail_on: Severity,
}

/// Everything a run is parameterized by. Every section and key is optional in `lamina.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaminaConfig {
    pub corpus: CorpusConfig,
    pub merge: MergeConfig,
    pub groups: GroupConfig,
    pub quality: QualityConfig,
    pub manifests: ManifestConfig,
    pub report: ReportConfig,
}

impl LaminaConfig {
    /// Reject configurations that would make a run meaningless.
    pub fn validate(&self) -> Result<(), LaminaError> {
        if self.merge.required_layers.contains(&0) {
            return Err(LaminaError::Config(
                "merge.required_layers: layer ranks start at 1".to_string(),
            ));
        }
        let q = &self.quality;
        let max = q.identity_weight
            + q.structural_weight
            + q.descriptive_weight
            + q.behavioral_weight
            + q.cross_reference_weight;
        if max == 0 {
            return Err(LaminaError::Config(
                "quality: at least one category weight must be non-zero".to_string(),
            ));
        }
        if q.production_ready > max {
            return Err(LaminaError::Config(format!(
                "quality.production_ready ({}) exceeds the maximum score ({max})",
                q.production_ready
            )));
        }
        if self.corpus.manifest_root.trim().is_empty() {
            return Err(LaminaError::Config(
                "corpus.manifest_root must name a document".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider {
    fn load(&self) -> Result<LaminaConfig, LaminaError>;
    fn store(&self, config: &LaminaConfig) -> Result<(), LaminaError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    /// Provider for the `lamina.toml` at a corpus root.
    pub fn for_corpus<P: AsRef<Path>>(corpus_root: P) -> Self {
        TomlConfigProvider {
            path: corpus_root.as_ref().join(CONFIG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<LaminaConfig, LaminaError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(LaminaConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: LaminaConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn store(&self, config: &LaminaConfig) -> Result<(), LaminaError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        config.validate()?;
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}
