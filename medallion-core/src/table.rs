//! In-memory CSV tables.
//!
//! Cells stay as strings from bronze through silver so raw values are
//! carried verbatim; typed interpretation happens in the validator and the
//! transformer.

use crate::error::{Stage, StageError, StageErrorKind};
use crate::persistence;
use std::path::Path;

/// A header plus rows of string cells. Every row has the header's width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of column `idx`, in row order.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).map(String::as_str).unwrap_or(""))
    }

    /// Read a CSV file, failing with a stage error that names the file.
    pub fn read_csv(stage: Stage, path: &Path) -> Result<Self, StageError> {
        if !path.exists() {
            return Err(StageError::missing_input(stage, path));
        }
        let bytes = std::fs::read(path).map_err(|e| StageError::read(stage, path, e))?;
        Self::parse_csv(&bytes).map_err(|kind| StageError::new(stage, path, kind))
    }

    /// Parse CSV bytes with a header row.
    pub fn parse_csv(bytes: &[u8]) -> Result<Self, StageErrorKind> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|source| StageErrorKind::Csv { source })?
            .iter()
            .map(str::to_string)
            .collect();
        if columns.is_empty() || (columns.len() == 1 && columns[0].is_empty()) {
            return Err(StageErrorKind::EmptyFile);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| StageErrorKind::Csv { source })?;
            if record.len() != columns.len() {
                return Err(StageErrorKind::RowWidth {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: columns.len(),
                    found: record.len(),
                });
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { columns, rows })
    }

    /// Serialize the table as CSV bytes (header first).
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, StageErrorKind> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|source| StageErrorKind::Csv { source })?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|source| StageErrorKind::Csv { source })?;
        }
        writer.into_inner().map_err(|e| StageErrorKind::Write {
            source: e.into_error(),
        })
    }

    /// Atomically write the table as CSV.
    pub fn write_csv(&self, stage: Stage, path: &Path) -> Result<(), StageError> {
        let bytes = self
            .to_csv_bytes()
            .map_err(|kind| StageError::new(stage, path, kind))?;
        persistence::atomic_write(path, &bytes).map_err(|e| StageError::write(stage, path, e))?;
        tracing::debug!(stage = %stage, path = %path.display(), rows = self.row_count(), "Wrote table");
        Ok(())
    }

    /// Project the table onto `columns` (which must all exist).
    pub fn select(&self, columns: &[usize]) -> Table {
        Table {
            columns: columns.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| columns.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }
}

/// Render a float cell so integral values keep a trailing `.0`.
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
