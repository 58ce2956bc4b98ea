//! Schema and rules table for batch data.
//!
//! The schema is supplied externally through the `[schema]` configuration
//! section; [`SchemaDefinition::default`] matches the synthetic generator.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Provenance column holding the originating batch id.
pub const SOURCE_BATCH_COLUMN: &str = "source_batch";
/// Provenance column holding the RFC 3339 ingestion time.
pub const INGESTED_AT_COLUMN: &str = "ingested_at";
/// Provenance columns appended by the bronze ingester, in order.
pub const PROVENANCE_COLUMNS: [&str; 2] = [SOURCE_BATCH_COLUMN, INGESTED_AT_COLUMN];

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Identifier,
    Integer,
    Float,
    Categorical,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

/// Schema and quality constraints for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Inclusive lower bound for numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values for categorical columns, in code order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    /// Regex an identifier must match in full.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Reject rows repeating a value already accepted.
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: &str, dtype: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            required: true,
            min: None,
            max: None,
            allowed: Vec::new(),
            pattern: None,
            unique: false,
            description: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Position of `value` in the allowed set, used as its label code.
    pub fn category_code(&self, value: &str) -> Option<usize> {
        self.allowed.iter().position(|v| v == value)
    }
}

/// Schema definition for batch and bronze tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Columns forming the natural key used for duplicate detection.
    #[serde(default)]
    pub natural_key: Vec<String>,
    /// Cell values treated as null (case-insensitive, after trimming).
    #[serde(default = "default_null_tokens")]
    pub null_tokens: Vec<String>,
    pub columns: Vec<ColumnSchema>,
}

fn default_null_tokens() -> Vec<String> {
    ["", "NA", "N/A", "NaN", "null", "None"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SchemaDefinition {
    fn default() -> Self {
        Self {
            columns: vec![
                ColumnSchema::new("id", ColumnType::Identifier).with_pattern("^[1-9][0-9]*$"),
                ColumnSchema::new("feature_num", ColumnType::Float).with_range(-100.0, 200.0),
                ColumnSchema::new("feature_cat", ColumnType::Categorical)
                    .with_allowed(&["A", "B", "C"]),
                ColumnSchema::new("target", ColumnType::Categorical).with_allowed(&["0", "1"]),
                ColumnSchema::new("timestamp", ColumnType::Timestamp).unique(),
            ],
            natural_key: vec!["id".to_string()],
            null_tokens: default_null_tokens(),
        }
    }
}

impl SchemaDefinition {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column names followed by the bronze provenance columns.
    pub fn bronze_column_names(&self) -> Vec<String> {
        let mut names = self.column_names();
        names.extend(PROVENANCE_COLUMNS.iter().map(|c| c.to_string()));
        names
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Schema columns absent from `header`, in schema order.
    pub fn missing_columns(&self, header: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !header.iter().any(|h| h == &c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_null(&self, value: &str) -> bool {
        let value = value.trim();
        self.null_tokens
            .iter()
            .any(|token| token.trim().eq_ignore_ascii_case(value))
    }

    /// Check the schema for internal consistency, returning every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.columns.is_empty() {
            problems.push("schema.columns must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                problems.push(format!("schema column '{}' is declared twice", col.name));
            }
            if PROVENANCE_COLUMNS.contains(&col.name.as_str()) {
                problems.push(format!(
                    "schema column '{}' clashes with a provenance column",
                    col.name
                ));
            }
            if let (Some(min), Some(max)) = (col.min, col.max) {
                if min > max {
                    problems.push(format!(
                        "schema column '{}' has min {min} greater than max {max}",
                        col.name
                    ));
                }
            }
            if (col.min.is_some() || col.max.is_some()) && !col.dtype.is_numeric() {
                problems.push(format!(
                    "schema column '{}' declares a range but is not numeric",
                    col.name
                ));
            }
            if col.dtype == ColumnType::Categorical && col.allowed.is_empty() {
                problems.push(format!(
                    "categorical column '{}' has no allowed values",
                    col.name
                ));
            }
            if let Some(pattern) = &col.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    problems.push(format!(
                        "schema column '{}' has an invalid pattern: {e}",
                        col.name
                    ));
                }
            }
        }

        for key in &self.natural_key {
            if self.column(key).is_none() {
                problems.push(format!("natural key column '{key}' is not in the schema"));
            }
        }
        problems
    }
}

/// Parse a timestamp in one of the accepted layouts.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    const LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    for layout in LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
