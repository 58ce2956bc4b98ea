//! Silver validation stage.
//!
//! Partitions the cumulative bronze table into accepted and rejected rows in
//! a single ordered pass. Every input row lands in exactly one partition.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::rules::{
    CategoryRule, ColumnRef, DuplicateKeyRule, DuplicateValueRule, IdentifierRule, RangeRule,
    ReasonCode, RequiredFieldRule, RowRule, RowView, RuleContext, TimestampGapRule, TypeRule,
    continuity_gaps,
};
use crate::config::{PipelineConfig, SilverConfig};
use crate::error::{PipelineError, Stage, StageError, StageErrorKind};
use crate::persistence;
use crate::schema::{ColumnType, SchemaDefinition};
use crate::table::Table;

/// Extra columns appended to the raw header in `rejected_rows.csv`.
pub const REASON_CODE_COLUMN: &str = "reason_code";
pub const FAILED_COLUMN_COLUMN: &str = "failed_column";

/// A row that failed validation. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// 0-based position in the input table.
    pub row: usize,
    pub cells: Vec<String>,
    pub reason: ReasonCode,
    pub column: String,
}

/// Counts written to `validation_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_rows: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub by_reason: BTreeMap<ReasonCode, usize>,
    pub input_path: PathBuf,
    pub input_sha256: String,
    pub validated_at: DateTime<Utc>,
}

/// Result of a validation pass.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub accepted: Table,
    pub rejected: Vec<Rejection>,
}

impl ValidationOutcome {
    pub fn total_rows(&self) -> usize {
        self.accepted.row_count() + self.rejected.len()
    }

    pub fn by_reason(&self) -> BTreeMap<ReasonCode, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejected {
            *counts.entry(rejection.reason).or_insert(0) += 1;
        }
        counts
    }

    /// Rejected rows with their raw cells, reason code and failed column.
    pub fn rejected_table(&self) -> Table {
        let mut columns = self.accepted.columns.clone();
        columns.push(REASON_CODE_COLUMN.to_string());
        columns.push(FAILED_COLUMN_COLUMN.to_string());
        let mut table = Table::new(columns);
        for rejection in &self.rejected {
            let mut row = rejection.cells.clone();
            row.push(rejection.reason.to_string());
            row.push(rejection.column.clone());
            table.rows.push(row);
        }
        table
    }

    pub fn summary(&self, input_path: &Path, input_sha256: String) -> ValidationSummary {
        ValidationSummary {
            total_rows: self.total_rows(),
            accepted: self.accepted.row_count(),
            rejected: self.rejected.len(),
            by_reason: self.by_reason(),
            input_path: input_path.to_path_buf(),
            input_sha256,
            validated_at: Utc::now(),
        }
    }
}

/// Ordered rule set bound to one input header.
pub struct Validator<'a> {
    schema: &'a SchemaDefinition,
    rules: Vec<Box<dyn RowRule>>,
    gap_column: Option<(usize, f64)>,
}

impl std::fmt::Debug for Validator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.reason()).collect::<Vec<_>>(),
            )
            .field("gap_column", &self.gap_column)
            .finish()
    }
}

impl<'a> Validator<'a> {
    /// Resolve the schema against `header` and build the rules in order.
    ///
    /// Fails if any schema column is missing from the header or an identifier
    /// pattern does not compile.
    pub fn new(
        schema: &'a SchemaDefinition,
        silver: &SilverConfig,
        header: &[String],
    ) -> Result<Self, StageErrorKind> {
        let missing = schema.missing_columns(header);
        if !missing.is_empty() {
            return Err(StageErrorKind::MissingColumns { columns: missing });
        }
        let position = |name: &str| header.iter().position(|h| h == name);
        let resolved: Vec<(usize, &crate::schema::ColumnSchema)> = schema
            .columns
            .iter()
            .filter_map(|c| position(&c.name).map(|idx| (idx, c)))
            .collect();

        let mut rules: Vec<Box<dyn RowRule>> = Vec::new();

        let required: Vec<ColumnRef> = resolved
            .iter()
            .filter(|(_, c)| c.required)
            .map(|(idx, c)| (*idx, c.name.clone()))
            .collect();
        if !required.is_empty() {
            rules.push(Box::new(RequiredFieldRule { columns: required }));
        }

        let typed: Vec<_> = resolved
            .iter()
            .filter(|(_, c)| c.dtype.is_numeric() || c.dtype == ColumnType::Timestamp)
            .map(|(idx, c)| (*idx, c.name.clone(), c.dtype))
            .collect();
        if !typed.is_empty() {
            rules.push(Box::new(TypeRule { columns: typed }));
        }

        let ranged: Vec<_> = resolved
            .iter()
            .filter(|(_, c)| c.dtype.is_numeric() && (c.min.is_some() || c.max.is_some()))
            .map(|(idx, c)| (*idx, c.name.clone(), c.min, c.max))
            .collect();
        if !ranged.is_empty() {
            rules.push(Box::new(RangeRule { columns: ranged }));
        }

        let categorical: Vec<_> = resolved
            .iter()
            .filter(|(_, c)| c.dtype == ColumnType::Categorical && !c.allowed.is_empty())
            .map(|(idx, c)| (*idx, c.name.clone(), c.allowed.clone()))
            .collect();
        if !categorical.is_empty() {
            rules.push(Box::new(CategoryRule {
                columns: categorical,
            }));
        }

        let mut identifiers = Vec::new();
        for (idx, c) in resolved.iter().filter(|(_, c)| c.dtype == ColumnType::Identifier) {
            let pattern = match &c.pattern {
                Some(p) => Some(Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    StageErrorKind::Definition {
                        message: format!("pattern for column '{}': {e}", c.name),
                    }
                })?),
                None => None,
            };
            identifiers.push((*idx, c.name.clone(), pattern));
        }
        if !identifiers.is_empty() {
            rules.push(Box::new(IdentifierRule {
                columns: identifiers,
            }));
        }

        if !schema.natural_key.is_empty() {
            let mut key = Vec::new();
            for name in &schema.natural_key {
                let idx = position(name).ok_or_else(|| StageErrorKind::MissingColumns {
                    columns: vec![name.clone()],
                })?;
                key.push((idx, name.clone()));
            }
            rules.push(Box::new(DuplicateKeyRule { columns: key }));
        }

        let unique: Vec<ColumnRef> = resolved
            .iter()
            .filter(|(_, c)| c.unique)
            .map(|(idx, c)| (*idx, c.name.clone()))
            .collect();
        if !unique.is_empty() {
            rules.push(Box::new(DuplicateValueRule { columns: unique }));
        }

        let gap_column = silver.gap_factor().and_then(|factor| {
            resolved
                .iter()
                .find(|(_, c)| c.dtype == ColumnType::Timestamp)
                .map(|(idx, c)| {
                    rules.push(Box::new(TimestampGapRule {
                        column: (*idx, c.name.clone()),
                    }));
                    (*idx, factor)
                })
        });

        Ok(Self {
            schema,
            rules,
            gap_column,
        })
    }

    /// Reason codes of the active rules, in evaluation order.
    pub fn reasons(&self) -> Vec<ReasonCode> {
        self.rules.iter().map(|r| r.reason()).collect()
    }

    /// Single ordered pass: each row stops at the first rule it breaks.
    pub fn validate(&self, table: &Table) -> ValidationOutcome {
        let gap_rows = match self.gap_column {
            Some((idx, factor)) => continuity_gaps(table.column_values(idx).enumerate(), factor),
            None => Default::default(),
        };
        let mut ctx = RuleContext::with_gap_rows(gap_rows);

        let mut accepted = Table::new(table.columns.clone());
        let mut rejected = Vec::new();

        for (index, cells) in table.rows.iter().enumerate() {
            let row = RowView::new(index, cells, self.schema);
            let failure = self
                .rules
                .iter()
                .find_map(|rule| rule.check(&row, &ctx).map(|v| (rule.reason(), v)));

            match failure {
                Some((reason, violation)) => {
                    tracing::trace!(row = index, reason = %reason, column = %violation.column, "Row rejected");
                    rejected.push(Rejection {
                        row: index,
                        cells: cells.clone(),
                        reason,
                        column: violation.column,
                    });
                }
                None => {
                    for rule in &self.rules {
                        rule.record(&row, &mut ctx);
                    }
                    accepted.rows.push(cells.clone());
                }
            }
        }

        ValidationOutcome { accepted, rejected }
    }
}

/// Run the silver validation stage over the bronze table.
pub fn run(config: &PipelineConfig) -> Result<ValidationSummary, PipelineError> {
    let stage = Stage::ValidateSilver;
    let paths = &config.paths;
    let input = paths.bronze_table();

    let table = Table::read_csv(stage, &input)?;
    let checksum = persistence::hash_file(&input).map_err(|e| StageError::read(stage, &input, e))?;
    let validator = Validator::new(&config.schema, &config.silver, &table.columns)
        .map_err(|kind| StageError::new(stage, &input, kind))?;

    let outcome = validator.validate(&table);
    let summary = outcome.summary(&input, checksum);

    outcome.accepted.write_csv(stage, &paths.silver_table())?;
    outcome.rejected_table().write_csv(stage, &paths.rejected_table())?;
    let summary_path = paths.validation_summary();
    persistence::write_stage_json(stage, &summary_path, &summary)?;

    tracing::info!(
        total = summary.total_rows,
        accepted = summary.accepted,
        rejected = summary.rejected,
        "Silver validation complete"
    );
    for (reason, count) in &summary.by_reason {
        tracing::info!(reason = %reason, count, "Rejected rows by reason");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn header() -> Vec<String> {
        SchemaDefinition::default().column_names()
    }

    fn row(id: usize, num: &str, cat: &str, target: &str, minute: usize) -> Vec<String> {
        vec![
            id.to_string(),
            num.to_string(),
            cat.to_string(),
            target.to_string(),
            format!("2024-01-01 {:02}:{:02}:00", minute / 60, minute % 60),
        ]
    }

    fn clean_table(n: usize) -> Table {
        let mut table = Table::new(header());
        for i in 0..n {
            table.rows.push(row(i + 1, "50.0", "A", "1", i));
        }
        table
    }

    fn gap_check(factor: f64) -> SilverConfig {
        SilverConfig {
            max_gap_factor: Some(factor),
        }
    }

    fn validate(table: &Table) -> ValidationOutcome {
        let schema = SchemaDefinition::default();
        Validator::new(&schema, &SilverConfig::default(), &table.columns)
            .unwrap()
            .validate(table)
    }

    #[test]
    fn test_rules_in_fixed_order() {
        let schema = SchemaDefinition::default();
        let validator = Validator::new(&schema, &SilverConfig::default(), &header()).unwrap();
        assert_eq!(
            validator.reasons(),
            vec![
                ReasonCode::MissingRequiredField,
                ReasonCode::InvalidType,
                ReasonCode::OutOfRange,
                ReasonCode::InvalidCategory,
                ReasonCode::MalformedIdentifier,
                ReasonCode::DuplicateKey,
                ReasonCode::DuplicateValue,
            ]
        );

        let with_gaps = Validator::new(&schema, &gap_check(3.0), &header()).unwrap();
        assert_eq!(with_gaps.reasons().last(), Some(&ReasonCode::TimestampGap));
        assert_eq!(with_gaps.reasons().len(), 8);
    }

    #[test]
    fn test_hundred_rows_with_clustered_null_timestamps() {
        let mut table = clean_table(100);
        for i in [40, 41, 42, 70, 71] {
            table.rows[i][4] = String::new();
        }
        for i in [10, 20, 30] {
            table.rows[i][1] = "1000".to_string();
        }

        let outcome = validate(&table);
        assert_eq!(outcome.accepted.row_count(), 92);
        assert_eq!(outcome.rejected.len(), 8);
        let by_reason = outcome.by_reason();
        assert_eq!(by_reason[&ReasonCode::MissingRequiredField], 5);
        assert_eq!(by_reason[&ReasonCode::OutOfRange], 3);
        assert_eq!(by_reason.len(), 2);
    }

    #[test]
    fn test_hundred_rows_five_missing_three_out_of_range() {
        let mut table = clean_table(100);
        for i in [3, 17, 42, 60, 99] {
            table.rows[i][1] = String::new();
        }
        for i in [10, 20, 30] {
            table.rows[i][1] = "1000".to_string();
        }

        let outcome = validate(&table);
        assert_eq!(outcome.accepted.row_count(), 92);
        assert_eq!(outcome.rejected.len(), 8);
        let by_reason = outcome.by_reason();
        assert_eq!(by_reason[&ReasonCode::MissingRequiredField], 5);
        assert_eq!(by_reason[&ReasonCode::OutOfRange], 3);
        assert_eq!(by_reason.len(), 2);
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let mut table = Table::new(header());
        // Missing target and out-of-range value: missing field is checked first.
        table.rows.push(row(1, "999", "Z", "", 0));
        let outcome = validate(&table);
        assert_eq!(outcome.rejected[0].reason, ReasonCode::MissingRequiredField);
        assert_eq!(outcome.rejected[0].column, "target");
    }

    #[test]
    fn test_each_reason_code() {
        let mut table = Table::new(header());
        table.rows.push(row(1, "10", "A", "0", 0));
        table.rows.push(row(2, "abc", "A", "0", 1));
        table.rows.push(row(3, "-100.5", "A", "0", 2));
        table.rows.push(row(4, "10", "D", "0", 3));
        table.rows.push(row(5, "10", "A", "2", 4));
        table.rows.push(row(0, "10", "A", "0", 5));
        table.rows.push(row(1, "10", "B", "1", 6));
        table.rows.push(row(8, "10", "A", "0", 0));

        let outcome = validate(&table);
        let reasons: Vec<_> = outcome
            .rejected
            .iter()
            .map(|r| (r.row, r.reason, r.column.as_str()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (1, ReasonCode::InvalidType, "feature_num"),
                (2, ReasonCode::OutOfRange, "feature_num"),
                (3, ReasonCode::InvalidCategory, "feature_cat"),
                (4, ReasonCode::InvalidCategory, "target"),
                (5, ReasonCode::MalformedIdentifier, "id"),
                (6, ReasonCode::DuplicateKey, "id"),
                (7, ReasonCode::DuplicateValue, "timestamp"),
            ]
        );
        assert_eq!(outcome.accepted.row_count(), 1);
    }

    #[test]
    fn test_duplicate_key_keeps_first_accepted() {
        let mut table = Table::new(header());
        // The first id=1 row is rejected, so the second one is not a duplicate.
        table.rows.push(row(1, "", "A", "0", 0));
        table.rows.push(row(1, "5", "A", "0", 1));
        table.rows.push(row(1, "6", "A", "0", 2));
        let outcome = validate(&table);
        assert_eq!(outcome.accepted.rows, vec![table.rows[1].clone()]);
        assert_eq!(outcome.rejected[1].reason, ReasonCode::DuplicateKey);
    }

    #[test]
    fn test_timestamp_gap_rejected() {
        let mut table = clean_table(5);
        table.rows.push(row(6, "50.0", "A", "1", 120));
        let schema = SchemaDefinition::default();
        let outcome = Validator::new(&schema, &gap_check(3.0), &table.columns)
            .unwrap()
            .validate(&table);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].row, 5);
        assert_eq!(outcome.rejected[0].reason, ReasonCode::TimestampGap);

        // Off by default.
        assert!(validate(&table).rejected.is_empty());
    }

    #[test]
    fn test_missing_schema_columns_listed() {
        let schema = SchemaDefinition::default();
        let header = vec!["id".to_string(), "feature_num".to_string()];
        let err = Validator::new(&schema, &SilverConfig::default(), &header).unwrap_err();
        match err {
            StageErrorKind::MissingColumns { columns } => {
                assert_eq!(columns, vec!["feature_cat", "target", "timestamp"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_optional_column_may_be_null() {
        let mut schema = SchemaDefinition::default();
        schema.columns.push(ColumnSchema::new("note", ColumnType::Text).optional());
        let mut columns = header();
        columns.push("note".to_string());
        let mut table = Table::new(columns);
        let mut cells = row(1, "1", "A", "0", 0);
        cells.push("NA".to_string());
        table.rows.push(cells);

        let outcome = Validator::new(&schema, &SilverConfig::default(), &table.columns)
            .unwrap()
            .validate(&table);
        assert_eq!(outcome.accepted.row_count(), 1);
    }

    #[test]
    fn test_rejected_table_appends_reason_columns() {
        let mut table = clean_table(2);
        table.rows[1][2] = "Q".to_string();
        let rejected = validate(&table).rejected_table();
        assert_eq!(
            &rejected.columns[5..],
            &["reason_code".to_string(), "failed_column".to_string()]
        );
        assert_eq!(rejected.rows[0][5], "invalid-category");
        assert_eq!(rejected.rows[0][6], "feature_cat");
    }

    #[test]
    fn test_validation_is_deterministic() {
        let mut table = clean_table(30);
        table.rows[4][0] = "x".into();
        table.rows[9][1] = "NaN".into();
        let a = validate(&table);
        let b = validate(&table);
        assert_eq!(a.accepted, b.accepted);
        assert_eq!(a.rejected, b.rejected);
    }

    #[test]
    fn test_run_writes_outputs() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::with_data_root(dir.path());
        let mut table = clean_table(10);
        table.rows[2][3] = String::new();
        table
            .write_csv(Stage::IngestBronze, &config.paths.bronze_table())
            .unwrap();

        let summary = run(&config).unwrap();
        assert_eq!(summary.total_rows, 10);
        assert_eq!(summary.accepted, 9);
        assert_eq!(summary.by_reason[&ReasonCode::MissingRequiredField], 1);

        let silver = Table::read_csv(Stage::TransformSilver, &config.paths.silver_table()).unwrap();
        assert_eq!(silver.row_count(), 9);
        let written: ValidationSummary =
            persistence::load_json(&config.paths.validation_summary())
                .unwrap()
                .unwrap();
        assert_eq!(written.rejected, 1);
        let json = std::fs::read_to_string(config.paths.validation_summary()).unwrap();
        assert!(json.contains("\"missing-required-field\": 1"));
    }

    #[test]
    fn test_run_missing_input_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::with_data_root(dir.path());
        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("bronze_all.csv"));
        assert!(!config.paths.silver_table().exists());
    }
}
