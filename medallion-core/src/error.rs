//! Error types for the medallion pipeline.
//!
//! Uses `thiserror` for the public error types. A [`StageError`] is always
//! fatal for the stage that raised it and names the stage, the offending
//! file and the specific mismatch. Rows that fail validation are *not*
//! errors; they are reported as [`crate::silver::Rejection`] values.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level error type for the medallion core library.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// The pipeline stage an error or report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Generate,
    IngestBronze,
    ValidateSilver,
    TransformSilver,
    BuildGold,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::IngestBronze => "ingest-bronze",
            Stage::ValidateSilver => "validate-silver",
            Stage::TransformSilver => "transform-silver",
            Stage::BuildGold => "build-gold",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal stage failure tied to a specific file.
#[derive(Debug, thiserror::Error)]
#[error("[{stage}] {}: {kind}", .path.display())]
pub struct StageError {
    pub stage: Stage,
    pub path: PathBuf,
    #[source]
    pub kind: StageErrorKind,
}

impl StageError {
    pub fn new(stage: Stage, path: impl Into<PathBuf>, kind: StageErrorKind) -> Self {
        Self {
            stage,
            path: path.into(),
            kind,
        }
    }

    pub fn missing_input(stage: Stage, path: &Path) -> Self {
        Self::new(stage, path, StageErrorKind::MissingInput)
    }

    pub fn read(stage: Stage, path: &Path, source: std::io::Error) -> Self {
        Self::new(stage, path, StageErrorKind::Read { source })
    }

    pub fn write(stage: Stage, path: &Path, source: std::io::Error) -> Self {
        Self::new(stage, path, StageErrorKind::Write { source })
    }
}

/// The specific reason a stage aborted.
#[derive(Debug, thiserror::Error)]
pub enum StageErrorKind {
    #[error("input file not found")]
    MissingInput,

    #[error("missing expected column(s): {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    #[error("header mismatch: expected [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("line {line} has {found} field(s), header has {expected}")]
    RowWidth {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("empty file (no header row)")]
    EmptyFile,

    #[error("CSV parse error: {source}")]
    Csv {
        #[source]
        source: csv::Error,
    },

    #[error("read failed: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {message}")]
    Serialization { message: String },

    #[error("no usable columns: {message}")]
    NoColumns { message: String },

    #[error("invalid definition: {message}")]
    Definition { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_names_stage_file_and_mismatch() {
        let err = StageError::new(
            Stage::ValidateSilver,
            "data/bronze/bronze_all.csv",
            StageErrorKind::MissingColumns {
                columns: vec!["target".into(), "timestamp".into()],
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("validate-silver"));
        assert!(msg.contains("bronze_all.csv"));
        assert!(msg.contains("target, timestamp"));
    }

    #[test]
    fn test_pipeline_error_is_transparent_for_stage() {
        let err: PipelineError =
            StageError::missing_input(Stage::BuildGold, Path::new("gold.csv")).into();
        assert_eq!(err.to_string(), "[build-gold] gold.csv: input file not found");
    }

    #[test]
    fn test_config_error_lists_problems() {
        let err = ConfigError::Invalid {
            problems: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid configuration: a; b");
    }
}
