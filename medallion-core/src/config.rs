//! Configuration system for the medallion pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! The config file is `medallion.toml` in the workspace directory unless an
//! explicit path is given.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::gold::SplitPolicy;
use crate::schema::{PROVENANCE_COLUMNS, SchemaDefinition, parse_timestamp};
use crate::silver::FeatureTransform;

/// Name of the workspace-level configuration file.
pub const CONFIG_FILE_NAME: &str = "medallion.toml";

/// Prefix for environment variable overrides (`MEDALLION_GOLD__TEST_SIZE=0.3`).
pub const ENV_PREFIX: &str = "MEDALLION_";

/// Top-level configuration for every pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub bronze: BronzeConfig,
    #[serde(default)]
    pub silver: SilverConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub gold: GoldConfig,
    /// Externally supplied rules table used by ingest and validation.
    #[serde(default)]
    pub schema: SchemaDefinition,
}

impl PipelineConfig {
    /// Default configuration rooted at `data_root`.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.paths.data_root = data_root.into();
        config
    }

    /// Collect every configuration problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.schema.validate();
        problems.extend(self.generate.validate());
        problems.extend(self.silver.validate());
        problems.extend(self.transform.validate(&self.schema));
        problems.extend(self.gold.validate());
        problems
    }

    /// Fail with [`ConfigError::Invalid`] if [`validate`](Self::validate) finds problems.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

/// Location of the data tree. File names inside it are fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

impl PathsConfig {
    pub fn incoming_dir(&self) -> PathBuf {
        self.data_root.join("incoming")
    }

    pub fn bronze_dir(&self) -> PathBuf {
        self.data_root.join("bronze")
    }

    pub fn bronze_table(&self) -> PathBuf {
        self.bronze_dir().join("bronze_all.csv")
    }

    pub fn manifest(&self) -> PathBuf {
        self.bronze_dir().join("manifest.json")
    }

    /// Raw copy of an incoming batch file inside bronze.
    pub fn raw_copy(&self, file_name: &str) -> PathBuf {
        self.bronze_dir().join(format!("raw_{file_name}"))
    }

    pub fn silver_dir(&self) -> PathBuf {
        self.data_root.join("silver")
    }

    pub fn silver_table(&self) -> PathBuf {
        self.silver_dir().join("silver_all.csv")
    }

    pub fn rejected_table(&self) -> PathBuf {
        self.silver_dir().join("rejected_rows.csv")
    }

    pub fn validation_summary(&self) -> PathBuf {
        self.silver_dir().join("validation_summary.json")
    }

    pub fn transformed_table(&self) -> PathBuf {
        self.silver_dir().join("transformed_silver.csv")
    }

    pub fn gold_dir(&self) -> PathBuf {
        self.data_root.join("gold")
    }

    pub fn gold_table(&self) -> PathBuf {
        self.gold_dir().join("gold.csv")
    }

    pub fn train_table(&self) -> PathBuf {
        self.gold_dir().join("train.csv")
    }

    pub fn test_table(&self) -> PathBuf {
        self.gold_dir().join("test.csv")
    }

    pub fn data_version(&self) -> PathBuf {
        self.gold_dir().join("data_version.json")
    }
}

/// Synthetic batch generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Number of batch files to emit.
    #[serde(default = "default_batches")]
    pub batches: usize,
    /// Inclusive lower bound of rows per batch.
    #[serde(default = "default_rows_per_batch")]
    pub rows_min: usize,
    /// Inclusive upper bound of rows per batch.
    #[serde(default = "default_rows_per_batch")]
    pub rows_max: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Fraction of rows deliberately corrupted, in `[0, 1]`.
    #[serde(default)]
    pub defect_rate: f64,
    /// Timestamp of the first generated row; rows advance one minute each.
    #[serde(default = "default_start_timestamp")]
    pub start_timestamp: String,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            batches: default_batches(),
            rows_min: default_rows_per_batch(),
            rows_max: default_rows_per_batch(),
            seed: default_seed(),
            defect_rate: 0.0,
            start_timestamp: default_start_timestamp(),
        }
    }
}

fn default_batches() -> usize {
    5
}
fn default_rows_per_batch() -> usize {
    100
}
fn default_seed() -> u64 {
    42
}
fn default_start_timestamp() -> String {
    "2024-01-01 00:00:00".to_string()
}

impl GenerateConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.batches == 0 {
            problems.push("generate.batches must be at least 1".to_string());
        }
        if self.rows_min == 0 {
            problems.push("generate.rows_min must be at least 1".to_string());
        }
        if self.rows_min > self.rows_max {
            problems.push(format!(
                "generate.rows_min ({}) exceeds generate.rows_max ({})",
                self.rows_min, self.rows_max
            ));
        }
        if !(0.0..=1.0).contains(&self.defect_rate) {
            problems.push(format!(
                "generate.defect_rate must be within [0, 1], got {}",
                self.defect_rate
            ));
        }
        if parse_timestamp(&self.start_timestamp).is_none() {
            problems.push(format!(
                "generate.start_timestamp '{}' is not a valid timestamp",
                self.start_timestamp
            ));
        }
        problems
    }
}

/// Bronze ingest settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BronzeConfig {
    /// Delete incoming batch files once they are recorded in the manifest.
    #[serde(default)]
    pub consume_incoming: bool,
}

/// Silver validation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SilverConfig {
    /// Reject rows whose timestamp gap to the previous row exceeds this many
    /// times the smallest positive gap. Off unless set; `0` also disables it.
    #[serde(default)]
    pub max_gap_factor: Option<f64>,
}

impl SilverConfig {
    /// The effective gap factor, if the continuity check is enabled.
    pub fn gap_factor(&self) -> Option<f64> {
        self.max_gap_factor.filter(|f| *f > 0.0)
    }

    pub fn validate(&self) -> Vec<String> {
        match self.max_gap_factor {
            Some(f) if !f.is_finite() || f < 0.0 => {
                vec![format!("silver.max_gap_factor must be a non-negative number, got {f}")]
            }
            _ => Vec::new(),
        }
    }
}

/// Silver feature engineering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "crate::silver::default_features")]
    pub features: Vec<FeatureTransform>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            features: crate::silver::default_features(),
        }
    }
}

impl TransformConfig {
    pub fn validate(&self, schema: &SchemaDefinition) -> Vec<String> {
        let mut problems = Vec::new();
        let mut outputs: Vec<&str> = Vec::new();
        for feature in &self.features {
            if schema.column(&feature.output).is_some() || outputs.contains(&feature.output.as_str())
            {
                problems.push(format!(
                    "transform feature output '{}' clashes with an existing column",
                    feature.output
                ));
            }
            let known_input = schema.column(&feature.input).is_some()
                || PROVENANCE_COLUMNS.contains(&feature.input.as_str())
                || outputs.contains(&feature.input.as_str());
            if !known_input {
                problems.push(format!(
                    "transform feature '{}' reads unknown column '{}'",
                    feature.output, feature.input
                ));
            }
            problems.extend(feature.method.validate(&feature.output));
            outputs.push(&feature.output);
        }
        problems
    }
}

/// Gold build and split settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldConfig {
    /// Columns of the modeling table, in output order.
    #[serde(default = "default_gold_columns")]
    pub columns: Vec<String>,
    /// Column whose value decides a row's partition under the hash policy.
    #[serde(default = "default_key_column")]
    pub key_column: String,
    /// Fraction of rows assigned to the test partition.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub policy: SplitPolicy,
}

impl Default for GoldConfig {
    fn default() -> Self {
        Self {
            columns: default_gold_columns(),
            key_column: default_key_column(),
            test_size: default_test_size(),
            seed: default_seed(),
            policy: SplitPolicy::default(),
        }
    }
}

fn default_gold_columns() -> Vec<String> {
    [
        "id",
        "feature_num_scaled",
        "feature_cat_code",
        "day_of_week",
        "target",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_key_column() -> String {
    "id".to_string()
}
fn default_test_size() -> f64 {
    0.2
}

impl GoldConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..=1.0).contains(&self.test_size) {
            problems.push(format!(
                "gold.test_size must be within [0, 1], got {}",
                self.test_size
            ));
        }
        if self.columns.is_empty() {
            problems.push("gold.columns must not be empty".to_string());
        }
        problems
    }
}

/// Load configuration with layered merging.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `MEDALLION_`, `__` separates sections)
/// 2. The explicit config file, or `<workspace>/medallion.toml` if present
/// 3. Built-in defaults
///
/// A relative `paths.data_root` is resolved against `workspace`. CLI
/// overrides are applied by the caller on the returned value.
pub fn load_config(
    workspace: &Path,
    config_file: Option<&Path>,
) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let ws_config = workspace.join(CONFIG_FILE_NAME);
            if ws_config.exists() {
                figment = figment.merge(Toml::file(&ws_config));
            }
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let mut config: PipelineConfig = figment.extract()?;
    if config.paths.data_root.is_relative() {
        config.paths.data_root = workspace.join(&config.paths.data_root);
    }
    Ok(config)
}

/// Whether a workspace-level `medallion.toml` exists.
pub fn config_exists(workspace: &Path) -> bool {
    workspace.join(CONFIG_FILE_NAME).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_exists() {
        let dir = TempDir::new().unwrap();
        assert!(!config_exists(dir.path()));
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[gold]\ntest_size = 0.1\n").unwrap();
        assert!(config_exists(dir.path()));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.generate.batches, 5);
        assert_eq!(config.gold.test_size, 0.2);
        assert_eq!(config.gold.seed, 42);
    }

    #[test]
    fn test_layout_paths() {
        let paths = PathsConfig {
            data_root: PathBuf::from("/tmp/d"),
        };
        assert_eq!(paths.bronze_table(), PathBuf::from("/tmp/d/bronze/bronze_all.csv"));
        assert_eq!(
            paths.raw_copy("batch_01.csv"),
            PathBuf::from("/tmp/d/bronze/raw_batch_01.csv")
        );
        assert_eq!(paths.test_table(), PathBuf::from("/tmp/d/gold/test.csv"));
    }

    #[test]
    fn test_load_config_defaults_resolve_data_root() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.paths.data_root, dir.path().join("data"));
    }

    #[test]
    fn test_load_config_merges_workspace_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[generate]\nbatches = 3\n\n[gold]\ntest_size = 0.25\npolicy = \"shuffle\"\n",
        )
        .unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.generate.batches, 3);
        assert_eq!(config.generate.rows_min, 100);
        assert_eq!(config.gold.test_size, 0.25);
        assert_eq!(config.gold.policy, SplitPolicy::Shuffle);
    }

    #[test]
    fn test_load_config_schema_override_replaces_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[schema]
natural_key = ["id"]

[[schema.columns]]
name = "id"
dtype = "identifier"

[[schema.columns]]
name = "score"
dtype = "float"
min = 0.0
max = 1.0
"#,
        )
        .unwrap();
        let config = load_config(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.schema.column_names(), vec!["id", "score"]);
        assert_eq!(config.schema.column("score").unwrap().max, Some(1.0));
        assert!(config.schema.column("id").unwrap().required);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = load_config(dir.path(), Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_validate_catches_bad_values() {
        let mut config = PipelineConfig::default();
        config.generate.rows_min = 10;
        config.generate.rows_max = 5;
        config.gold.test_size = 1.5;
        config.generate.defect_rate = -0.1;
        let problems = config.validate();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_transform_features_checked_against_schema() {
        let mut config = PipelineConfig::default();
        config.transform.features.push(FeatureTransform::new(
            "score_z",
            "score",
            crate::silver::FeatureMethod::ZScore,
        ));
        config.transform.features.push(FeatureTransform::new(
            "feature_num",
            "feature_num_scaled",
            crate::silver::FeatureMethod::Hour,
        ));
        let problems = config.validate();
        assert_eq!(problems.len(), 2, "{problems:?}");
        assert!(problems[0].contains("unknown column 'score'"));
        assert!(problems[1].contains("clashes"));
    }

    #[test]
    fn test_gap_factor_zero_disables() {
        let silver = SilverConfig {
            max_gap_factor: Some(0.0),
        };
        assert_eq!(silver.gap_factor(), None);
        assert_eq!(SilverConfig::default().gap_factor(), None);
        let on = SilverConfig {
            max_gap_factor: Some(3.0),
        };
        assert_eq!(on.gap_factor(), Some(3.0));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.schema, config.schema);
        assert_eq!(back.transform.features, config.transform.features);
        assert_eq!(back.gold.columns, config.gold.columns);
    }
}
