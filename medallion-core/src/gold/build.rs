//! Gold stage: modeling table plus train/test partitions.

use serde::{Deserialize, Serialize};

use super::split::{SplitAssignment, SplitPolicy, split_by_hash, split_by_shuffle};
use super::version::DataVersion;
use crate::config::{GoldConfig, PipelineConfig};
use crate::error::{PipelineError, Stage, StageError, StageErrorKind};
use crate::persistence;
use crate::table::Table;

/// Gold table and its partitions, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldTables {
    pub gold: Table,
    pub train: Table,
    pub test: Table,
    /// Configured columns absent from the input table.
    pub skipped: Vec<String>,
}

/// Outcome of a gold run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldReport {
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub columns: Vec<String>,
    pub skipped_columns: Vec<String>,
    pub policy: SplitPolicy,
    pub version_id: String,
}

/// Project `table` onto the configured columns and split it.
pub fn build_gold(table: &Table, gold: &GoldConfig) -> Result<GoldTables, StageErrorKind> {
    let mut selected = Vec::new();
    let mut skipped = Vec::new();
    for name in &gold.columns {
        match table.column_index(name) {
            Some(idx) => selected.push(idx),
            None => skipped.push(name.clone()),
        }
    }
    if selected.is_empty() {
        return Err(StageErrorKind::NoColumns {
            message: format!("none of [{}] are present", gold.columns.join(", ")),
        });
    }

    let assignment = match gold.policy {
        SplitPolicy::Hash => {
            let key_idx =
                table
                    .column_index(&gold.key_column)
                    .ok_or_else(|| StageErrorKind::MissingColumns {
                        columns: vec![gold.key_column.clone()],
                    })?;
            split_by_hash(table.column_values(key_idx), gold.test_size, gold.seed)
        }
        SplitPolicy::Shuffle => split_by_shuffle(table.row_count(), gold.test_size, gold.seed),
    };

    let projected = table.select(&selected);
    let SplitAssignment { train, test } = assignment;
    Ok(GoldTables {
        train: take_rows(&projected, &train),
        test: take_rows(&projected, &test),
        gold: projected,
        skipped,
    })
}

fn take_rows(table: &Table, indices: &[usize]) -> Table {
    Table {
        columns: table.columns.clone(),
        rows: indices.iter().map(|&i| table.rows[i].clone()).collect(),
    }
}

/// Run the gold stage over the transformed silver table.
pub fn run(config: &PipelineConfig) -> Result<GoldReport, PipelineError> {
    let stage = Stage::BuildGold;
    let paths = &config.paths;
    let input = paths.transformed_table();
    let table = Table::read_csv(stage, &input)?;

    let tables =
        build_gold(&table, &config.gold).map_err(|kind| StageError::new(stage, &input, kind))?;
    for column in &tables.skipped {
        tracing::warn!(column = %column, "Gold column not found in transformed table, skipping");
    }

    let gold_path = paths.gold_table();
    tables.gold.write_csv(stage, &gold_path)?;
    tables.train.write_csv(stage, &paths.train_table())?;
    tables.test.write_csv(stage, &paths.test_table())?;

    let version = DataVersion::capture(&gold_path, tables.gold.row_count())
        .map_err(|e| StageError::read(stage, &gold_path, e))?;
    let version_path = paths.data_version();
    persistence::write_stage_json(stage, &version_path, &version)?;

    let report = GoldReport {
        rows: tables.gold.row_count(),
        train_rows: tables.train.row_count(),
        test_rows: tables.test.row_count(),
        columns: tables.gold.columns.clone(),
        skipped_columns: tables.skipped,
        policy: config.gold.policy,
        version_id: version.version_id,
    };
    tracing::info!(
        rows = report.rows,
        train = report.train_rows,
        test = report.test_rows,
        version = %report.version_id,
        "Gold build complete"
    );
    Ok(report)
}
