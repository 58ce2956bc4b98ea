//! Silver feature engineering.
//!
//! Each feature derives one new column from one input column. Column-level
//! aggregates (min/max, mean/std, label sets) are computed once over the
//! whole table before rows are mapped, and rows are never dropped.

use chrono::{Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use super::rules::parse_number;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage, StageError, StageErrorKind};
use crate::schema::{SchemaDefinition, parse_timestamp};
use crate::table::{Table, format_float};

/// Code emitted when a value cannot be encoded.
const UNKNOWN_CODE: &str = "-1";

/// A derived column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransform {
    pub output: String,
    pub input: String,
    pub method: FeatureMethod,
}

impl FeatureTransform {
    pub fn new(output: &str, input: &str, method: FeatureMethod) -> Self {
        Self {
            output: output.to_string(),
            input: input.to_string(),
            method,
        }
    }
}

/// How a feature is derived from its input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureMethod {
    /// Monday = 0 … Sunday = 6.
    DayOfWeek,
    Hour,
    /// 1 on Saturday and Sunday, else 0.
    IsWeekend,
    /// Index in the schema's allowed set, or in the sorted distinct values.
    LabelEncode,
    /// Min-max over the table, clipped to [0, 1].
    MinMaxScale,
    /// Standard score using the population standard deviation.
    ZScore,
    /// Index of the first boundary greater than the value.
    Bucketize { boundaries: Vec<f64> },
}

impl FeatureMethod {
    /// Problems with this method's parameters, labelled by `output`.
    pub fn validate(&self, output: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if let FeatureMethod::Bucketize { boundaries } = self {
            if boundaries.is_empty() {
                problems.push(format!("feature '{output}': bucketize needs at least one boundary"));
            }
            if boundaries.iter().any(|b| !b.is_finite()) {
                problems.push(format!("feature '{output}': bucketize boundaries must be finite"));
            }
            if boundaries.windows(2).any(|w| w[0] >= w[1]) {
                problems.push(format!(
                    "feature '{output}': bucketize boundaries must be strictly increasing"
                ));
            }
        }
        problems
    }
}

/// Features derived when no `[[transform.features]]` are configured.
pub fn default_features() -> Vec<FeatureTransform> {
    vec![
        FeatureTransform::new("day_of_week", "timestamp", FeatureMethod::DayOfWeek),
        FeatureTransform::new("feature_cat_code", "feature_cat", FeatureMethod::LabelEncode),
        FeatureTransform::new("feature_num_scaled", "feature_num", FeatureMethod::MinMaxScale),
    ]
}

/// Summary of a transform run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub rows: usize,
    pub columns_added: Vec<String>,
}

/// Append every feature column to `table`, in order.
///
/// Later features may use earlier outputs as input. A missing input column
/// fails the whole call before anything is derived.
pub fn transform_table(
    table: &Table,
    features: &[FeatureTransform],
    schema: &SchemaDefinition,
) -> Result<Table, StageErrorKind> {
    let mut available = table.columns.clone();
    let mut missing = Vec::new();
    for feature in features {
        if !available.contains(&feature.input) && !missing.contains(&feature.input) {
            missing.push(feature.input.clone());
        }
        if available.contains(&feature.output) {
            return Err(StageErrorKind::Definition {
                message: format!("feature output '{}' already exists", feature.output),
            });
        }
        available.push(feature.output.clone());
    }
    if !missing.is_empty() {
        return Err(StageErrorKind::MissingColumns { columns: missing });
    }

    let mut out = table.clone();
    for feature in features {
        let idx = out
            .column_index(&feature.input)
            .ok_or_else(|| StageErrorKind::MissingColumns {
                columns: vec![feature.input.clone()],
            })?;
        let values: Vec<String> = {
            let column: Vec<&str> = out.column_values(idx).collect();
            derive(&feature.method, &column, schema, &feature.input)
        };
        out.columns.push(feature.output.clone());
        for (row, value) in out.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }
    Ok(out)
}

fn derive(
    method: &FeatureMethod,
    column: &[&str],
    schema: &SchemaDefinition,
    input: &str,
) -> Vec<String> {
    match method {
        FeatureMethod::DayOfWeek => map_timestamps(column, |ts| {
            ts.weekday().num_days_from_monday().to_string()
        }),
        FeatureMethod::Hour => map_timestamps(column, |ts| ts.hour().to_string()),
        FeatureMethod::IsWeekend => map_timestamps(column, |ts| {
            let weekend = matches!(ts.weekday(), Weekday::Sat | Weekday::Sun);
            (if weekend { "1" } else { "0" }).to_string()
        }),
        FeatureMethod::LabelEncode => {
            let labels = label_set(column, schema, input);
            column
                .iter()
                .map(|v| {
                    let v = v.trim();
                    labels
                        .iter()
                        .position(|l| l == v)
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| UNKNOWN_CODE.to_string())
                })
                .collect()
        }
        FeatureMethod::MinMaxScale => {
            let numbers = parse_column(column);
            let present: Vec<f64> = numbers.iter().flatten().copied().collect();
            let min = present.iter().copied().fold(f64::INFINITY, f64::min);
            let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            map_numbers(&numbers, |v| {
                if max > min {
                    ((v - min) / (max - min)).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
        }
        FeatureMethod::ZScore => {
            let numbers = parse_column(column);
            let present: Vec<f64> = numbers.iter().flatten().copied().collect();
            let n = present.len().max(1) as f64;
            let mean = present.iter().sum::<f64>() / n;
            let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            map_numbers(&numbers, |v| if std > 0.0 { (v - mean) / std } else { 0.0 })
        }
        FeatureMethod::Bucketize { boundaries } => parse_column(column)
            .into_iter()
            .map(|v| match v {
                Some(v) => boundaries
                    .iter()
                    .position(|b| v < *b)
                    .unwrap_or(boundaries.len())
                    .to_string(),
                None => String::new(),
            })
            .collect(),
    }
}

fn map_timestamps(column: &[&str], f: impl Fn(chrono::NaiveDateTime) -> String) -> Vec<String> {
    column
        .iter()
        .map(|v| parse_timestamp(v).map(&f).unwrap_or_else(|| UNKNOWN_CODE.to_string()))
        .collect()
}

fn parse_column(column: &[&str]) -> Vec<Option<f64>> {
    column.iter().map(|v| parse_number(v)).collect()
}

fn map_numbers(numbers: &[Option<f64>], f: impl Fn(f64) -> f64) -> Vec<String> {
    numbers
        .iter()
        .map(|v| v.map(|v| format_float(f(v))).unwrap_or_default())
        .collect()
}

/// Label order: the schema's allowed set when declared, else sorted distinct values.
fn label_set(column: &[&str], schema: &SchemaDefinition, input: &str) -> Vec<String> {
    if let Some(col) = schema.column(input) {
        if !col.allowed.is_empty() {
            return col.allowed.clone();
        }
    }
    let mut labels: Vec<String> = column
        .iter()
        .map(|v| v.trim())
        .filter(|v| !schema.is_null(v))
        .map(str::to_string)
        .collect();
    labels.sort();
    labels.dedup();
    labels
}

/// Run the silver transform stage.
pub fn run(config: &PipelineConfig) -> Result<TransformReport, PipelineError> {
    let stage = Stage::TransformSilver;
    let input = config.paths.silver_table();
    let table = Table::read_csv(stage, &input)?;

    let features = &config.transform.features;
    let transformed = transform_table(&table, features, &config.schema)
        .map_err(|kind| StageError::new(stage, &input, kind))?;
    transformed.write_csv(stage, &config.paths.transformed_table())?;

    let report = TransformReport {
        rows: transformed.row_count(),
        columns_added: features.iter().map(|f| f.output.clone()).collect(),
    };
    tracing::info!(
        rows = report.rows,
        features = ?report.columns_added,
        "Silver transform complete"
    );
    Ok(report)
}
