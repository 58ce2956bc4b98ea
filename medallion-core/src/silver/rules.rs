//! Row-level quality rules.
//!
//! A rule pairs a predicate with the [`ReasonCode`] it reports. The validator
//! holds rules in a fixed order and stops at the first one a row violates,
//! so adding or reordering a rule never touches the control flow.

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::schema::{ColumnType, SchemaDefinition, parse_timestamp};

/// Label identifying which rule rejected a row. Declaration order is rule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    MissingRequiredField,
    InvalidType,
    OutOfRange,
    InvalidCategory,
    MalformedIdentifier,
    DuplicateKey,
    DuplicateValue,
    TimestampGap,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MissingRequiredField => "missing-required-field",
            ReasonCode::InvalidType => "invalid-type",
            ReasonCode::OutOfRange => "out-of-range",
            ReasonCode::InvalidCategory => "invalid-category",
            ReasonCode::MalformedIdentifier => "malformed-identifier",
            ReasonCode::DuplicateKey => "duplicate-key",
            ReasonCode::DuplicateValue => "duplicate-value",
            ReasonCode::TimestampGap => "timestamp-gap",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw row as seen by the rules.
pub struct RowView<'a> {
    /// 0-based position in the input table.
    pub index: usize,
    pub cells: &'a [String],
    schema: &'a SchemaDefinition,
}

impl<'a> RowView<'a> {
    pub fn new(index: usize, cells: &'a [String], schema: &'a SchemaDefinition) -> Self {
        Self {
            index,
            cells,
            schema,
        }
    }

    /// Trimmed cell value, or `None` when the cell holds a null token.
    pub fn value(&self, idx: usize) -> Option<&'a str> {
        let raw = self.cells.get(idx)?;
        if self.schema.is_null(raw) {
            None
        } else {
            Some(raw.trim())
        }
    }
}

/// Which column a row failed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub column: String,
}

impl Violation {
    fn at(column: &str) -> Option<Self> {
        Some(Self {
            column: column.to_string(),
        })
    }
}

/// State shared across the single validation pass.
///
/// Key and unique-value sets only ever hold values of *accepted* rows.
#[derive(Debug, Default)]
pub struct RuleContext {
    accepted_keys: HashSet<Vec<String>>,
    accepted_values: HashMap<usize, HashSet<String>>,
    gap_rows: HashSet<usize>,
}

impl RuleContext {
    pub fn with_gap_rows(gap_rows: HashSet<usize>) -> Self {
        Self {
            gap_rows,
            ..Self::default()
        }
    }

    pub fn record_key(&mut self, key: Vec<String>) {
        self.accepted_keys.insert(key);
    }

    pub fn record_value(&mut self, column: usize, value: &str) {
        self.accepted_values
            .entry(column)
            .or_default()
            .insert(value.to_string());
    }

    fn has_key(&self, key: &[String]) -> bool {
        self.accepted_keys.contains(key)
    }

    fn has_value(&self, column: usize, value: &str) -> bool {
        self.accepted_values
            .get(&column)
            .is_some_and(|values| values.contains(value))
    }
}

/// A predicate over one row, reporting a fixed reason code when violated.
pub trait RowRule: Send + Sync {
    fn reason(&self) -> ReasonCode;

    /// `Some` with the offending column when the row breaks the rule.
    fn check(&self, row: &RowView<'_>, ctx: &RuleContext) -> Option<Violation>;

    /// Called once for every accepted row.
    fn record(&self, _row: &RowView<'_>, _ctx: &mut RuleContext) {}
}

/// (header index, column name) pair resolved against the input table.
pub type ColumnRef = (usize, String);

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Required columns must not be null.
pub struct RequiredFieldRule {
    pub columns: Vec<ColumnRef>,
}

impl RowRule for RequiredFieldRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::MissingRequiredField
    }

    fn check(&self, row: &RowView<'_>, _ctx: &RuleContext) -> Option<Violation> {
        self.columns
            .iter()
            .find(|(idx, _)| row.value(*idx).is_none())
            .and_then(|(_, name)| Violation::at(name))
    }
}

/// Non-null integer, float and timestamp cells must parse.
pub struct TypeRule {
    pub columns: Vec<(usize, String, ColumnType)>,
}

impl RowRule for TypeRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::InvalidType
    }

    fn check(&self, row: &RowView<'_>, _ctx: &RuleContext) -> Option<Violation> {
        for (idx, name, dtype) in &self.columns {
            let Some(value) = row.value(*idx) else {
                continue;
            };
            let ok = match dtype {
                ColumnType::Integer => value.parse::<i64>().is_ok(),
                ColumnType::Float => parse_number(value).is_some(),
                ColumnType::Timestamp => parse_timestamp(value).is_some(),
                _ => true,
            };
            if !ok {
                return Violation::at(name);
            }
        }
        None
    }
}

/// Numeric cells must lie within their declared inclusive range.
pub struct RangeRule {
    pub columns: Vec<(usize, String, Option<f64>, Option<f64>)>,
}

impl RowRule for RangeRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::OutOfRange
    }

    fn check(&self, row: &RowView<'_>, _ctx: &RuleContext) -> Option<Violation> {
        for (idx, name, min, max) in &self.columns {
            let Some(value) = row.value(*idx).and_then(parse_number) else {
                continue;
            };
            let below = min.is_some_and(|m| value < m);
            let above = max.is_some_and(|m| value > m);
            if below || above {
                return Violation::at(name);
            }
        }
        None
    }
}

/// Categorical cells must be one of the allowed values.
pub struct CategoryRule {
    pub columns: Vec<(usize, String, Vec<String>)>,
}

impl RowRule for CategoryRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::InvalidCategory
    }

    fn check(&self, row: &RowView<'_>, _ctx: &RuleContext) -> Option<Violation> {
        for (idx, name, allowed) in &self.columns {
            if let Some(value) = row.value(*idx) {
                if !allowed.iter().any(|a| a == value) {
                    return Violation::at(name);
                }
            }
        }
        None
    }
}

/// Identifier cells must be non-empty and match their pattern in full.
pub struct IdentifierRule {
    pub columns: Vec<(usize, String, Option<Regex>)>,
}

impl RowRule for IdentifierRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::MalformedIdentifier
    }

    fn check(&self, row: &RowView<'_>, _ctx: &RuleContext) -> Option<Violation> {
        for (idx, name, pattern) in &self.columns {
            let Some(value) = row.value(*idx) else {
                continue;
            };
            let well_formed = match pattern {
                Some(re) => re.is_match(value),
                None => !value.is_empty() && !value.chars().any(char::is_whitespace),
            };
            if !well_formed {
                return Violation::at(name);
            }
        }
        None
    }
}

/// The natural key must not repeat one already accepted.
pub struct DuplicateKeyRule {
    pub columns: Vec<ColumnRef>,
}

impl DuplicateKeyRule {
    pub fn key(&self, row: &RowView<'_>) -> Vec<String> {
        self.columns
            .iter()
            .map(|(idx, _)| row.value(*idx).unwrap_or("").to_string())
            .collect()
    }

    fn label(&self) -> String {
        self.columns
            .iter()
            .map(|(_, name)| name.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl RowRule for DuplicateKeyRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::DuplicateKey
    }

    fn check(&self, row: &RowView<'_>, ctx: &RuleContext) -> Option<Violation> {
        if ctx.has_key(&self.key(row)) {
            return Violation::at(&self.label());
        }
        None
    }

    fn record(&self, row: &RowView<'_>, ctx: &mut RuleContext) {
        ctx.record_key(self.key(row));
    }
}

/// Columns marked `unique` must not repeat a value already accepted.
pub struct DuplicateValueRule {
    pub columns: Vec<ColumnRef>,
}

impl RowRule for DuplicateValueRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::DuplicateValue
    }

    fn check(&self, row: &RowView<'_>, ctx: &RuleContext) -> Option<Violation> {
        for (idx, name) in &self.columns {
            if let Some(value) = row.value(*idx) {
                if ctx.has_value(*idx, value) {
                    return Violation::at(name);
                }
            }
        }
        None
    }

    fn record(&self, row: &RowView<'_>, ctx: &mut RuleContext) {
        for (idx, _) in &self.columns {
            if let Some(value) = row.value(*idx) {
                ctx.record_value(*idx, value);
            }
        }
    }
}

/// Rows following an abnormally large timestamp gap.
pub struct TimestampGapRule {
    pub column: ColumnRef,
}

impl RowRule for TimestampGapRule {
    fn reason(&self) -> ReasonCode {
        ReasonCode::TimestampGap
    }

    fn check(&self, row: &RowView<'_>, ctx: &RuleContext) -> Option<Violation> {
        if ctx.gap_rows.contains(&row.index) {
            return Violation::at(&self.column.1);
        }
        None
    }
}

/// Parse a finite float.
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rows whose timestamp follows its sorted predecessor by more than
/// `factor` times the smallest positive gap in the table.
pub fn continuity_gaps<'a>(
    timestamps: impl Iterator<Item = (usize, &'a str)>,
    factor: f64,
) -> HashSet<usize> {
    let mut parsed: Vec<(NaiveDateTime, usize)> = timestamps
        .filter_map(|(idx, raw)| parse_timestamp(raw).map(|ts| (ts, idx)))
        .collect();
    parsed.sort();

    let diffs: Vec<(i64, usize)> = parsed
        .windows(2)
        .map(|w| ((w[1].0 - w[0].0).num_milliseconds(), w[1].1))
        .collect();

    let Some(expected) = diffs.iter().map(|(d, _)| *d).filter(|d| *d > 0).min() else {
        return HashSet::new();
    };
    let limit = factor * expected as f64;
    diffs
        .into_iter()
        .filter(|(d, _)| *d as f64 > limit)
        .map(|(_, idx)| idx)
        .collect()
}
