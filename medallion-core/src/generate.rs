//! Synthetic batch generator.
//!
//! Produces schema-conforming batches from a seeded RNG so the same
//! configuration always yields byte-identical files.

use chrono::{Duration, NaiveDateTime};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{GenerateConfig, PipelineConfig};
use crate::error::{PipelineError, Stage, StageError, StageErrorKind};
use crate::schema::parse_timestamp;
use crate::table::{Table, format_float};

/// Columns of a generated batch.
pub const SYNTHETIC_COLUMNS: [&str; 5] = ["id", "feature_num", "feature_cat", "target", "timestamp"];

const FEATURE_MEAN: f64 = 50.0;
const FEATURE_STD: f64 = 15.0;
const CATEGORIES: [(&str, f64); 3] = [("A", 0.5), ("B", 0.3), ("C", 0.2)];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Files written by a generate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReport {
    pub files: Vec<PathBuf>,
    pub total_rows: usize,
}

/// File name of the `index`-th batch (0-based).
pub fn batch_file_name(index: usize) -> String {
    format!("batch_{:02}.csv", index + 1)
}

/// Build every batch in memory.
pub fn generate_batches(config: &GenerateConfig) -> Result<Vec<Table>, StageErrorKind> {
    let start = parse_timestamp(&config.start_timestamp).ok_or_else(|| {
        StageErrorKind::Definition {
            message: format!("invalid start timestamp '{}'", config.start_timestamp),
        }
    })?;
    let categories = WeightedIndex::new(CATEGORIES.iter().map(|(_, weight)| *weight)).map_err(
        |e| StageErrorKind::Definition {
            message: format!("category weights: {e}"),
        },
    )?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let defect_rate = config.defect_rate.clamp(0.0, 1.0);

    let sizes: Vec<usize> = (0..config.batches)
        .map(|_| rng.gen_range(config.rows_min..=config.rows_max.max(config.rows_min)))
        .collect();

    let columns: Vec<String> = SYNTHETIC_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut next_id = 1usize;
    let mut batches = Vec::with_capacity(sizes.len());
    for size in sizes {
        let mut table = Table::new(columns.clone());
        for _ in 0..size {
            let mut row = synthetic_row(&mut rng, &categories, next_id, start);
            if defect_rate > 0.0 && rng.gen_bool(defect_rate) {
                inject_defect(&mut rng, &mut row);
            }
            table.rows.push(row);
            next_id += 1;
        }
        batches.push(table);
    }
    Ok(batches)
}

fn synthetic_row(
    rng: &mut StdRng,
    categories: &WeightedIndex<f64>,
    id: usize,
    start: NaiveDateTime,
) -> Vec<String> {
    let value = FEATURE_MEAN + FEATURE_STD * standard_normal(rng);
    let value = (value * 1000.0).round() / 1000.0;
    let category = CATEGORIES[categories.sample(rng)].0;

    let target = if rng.gen_bool(0.5) { "1" } else { "0" };
    let timestamp = start + Duration::minutes(id as i64 - 1);

    vec![
        id.to_string(),
        format_float(value),
        category.to_string(),
        target.to_string(),
        timestamp.format(TIMESTAMP_FORMAT).to_string(),
    ]
}

// Box-Muller; `1 - u` keeps the log argument in (0, 1].
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.gen_range(0.0..1.0f64);
    let u2 = rng.gen_range(0.0..1.0f64);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn inject_defect(rng: &mut StdRng, row: &mut [String]) {
    match rng.gen_range(0..3) {
        0 => row[1] = String::new(),
        1 => row[1] = "1000.0".to_string(),
        _ => row[2] = "Z".to_string(),
    }
}

/// Run the generate stage, writing batches into the incoming directory.
pub fn run(config: &PipelineConfig) -> Result<GenerateReport, PipelineError> {
    let stage = Stage::Generate;
    let incoming = config.paths.incoming_dir();
    let batches =
        generate_batches(&config.generate).map_err(|kind| StageError::new(stage, &incoming, kind))?;

    let mut files = Vec::with_capacity(batches.len());
    let mut total_rows = 0;
    for (index, batch) in batches.iter().enumerate() {
        let path = incoming.join(batch_file_name(index));
        batch.write_csv(stage, &path)?;
        tracing::info!(file = %path.display(), rows = batch.row_count(), "Wrote batch");
        total_rows += batch.row_count();
        files.push(path);
    }

    tracing::info!(batches = files.len(), total_rows, "Generation complete");
    Ok(GenerateReport { files, total_rows })
}
