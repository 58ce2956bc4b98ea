//! # Medallion Core
//!
//! Core library for the medallion batch pipeline.
//! Provides the synthetic batch generator, the bronze ingester, silver
//! validation and feature engineering, the gold builder with its
//! reproducible split, configuration, and the shared table and persistence
//! helpers every stage uses.

pub mod bronze;
pub mod config;
pub mod error;
pub mod generate;
pub mod gold;
pub mod persistence;
pub mod schema;
pub mod silver;
pub mod table;

// Re-export commonly used types at the crate root.
pub use bronze::{IngestManifest, IngestReport};
pub use config::{PipelineConfig, load_config};
pub use error::{ConfigError, PipelineError, Result, Stage, StageError, StageErrorKind};
pub use generate::GenerateReport;
pub use gold::{GoldReport, SplitPolicy};
pub use schema::{ColumnSchema, ColumnType, SchemaDefinition};
pub use silver::{ReasonCode, TransformReport, ValidationSummary};
pub use table::Table;

/// Outcome of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub ingest: IngestReport,
    pub validation: ValidationSummary,
    pub transform: TransformReport,
    pub gold: GoldReport,
}

/// Run ingest, validation, transform and gold in order, stopping at the
/// first fatal stage error.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    let ingest = bronze::ingest::run(config)?;
    let validation = silver::validate::run(config)?;
    let transform = silver::transform::run(config)?;
    let gold = gold::build::run(config)?;
    Ok(PipelineReport {
        ingest,
        validation,
        transform,
        gold,
    })
}
