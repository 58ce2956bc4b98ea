//! Bronze ingest stage.
//!
//! Every new batch is read and checked before anything is written, so a
//! malformed batch aborts the run with bronze untouched. Commit order is raw
//! copies, then the cumulative table, then the manifest. Batch ids found in
//! the cumulative table's `source_batch` column count as processed even when
//! the manifest missed them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::manifest::{IngestManifest, ManifestEntry};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage, StageError, StageErrorKind};
use crate::config::PathsConfig;
use crate::persistence;
use crate::schema::{INGESTED_AT_COLUMN, SOURCE_BATCH_COLUMN};
use crate::table::Table;

const STAGE: Stage = Stage::IngestBronze;

/// Outcome of an ingest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub ingested: Vec<String>,
    pub skipped: Vec<String>,
    pub rows_appended: usize,
    /// Rows in the cumulative table after this run.
    pub total_rows: usize,
}

/// A new batch that passed the structural checks.
struct PendingBatch {
    batch_id: String,
    file_name: String,
    path: PathBuf,
    bytes: Vec<u8>,
    table: Table,
}

/// Incoming `*.csv` files in lexical order.
pub fn list_batches(incoming: &Path) -> Result<Vec<PathBuf>, StageError> {
    if !incoming.is_dir() {
        return Err(StageError::missing_input(STAGE, incoming));
    }
    let entries = std::fs::read_dir(incoming).map_err(|e| StageError::read(STAGE, incoming, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StageError::read(STAGE, incoming, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Batch id of an incoming file: its file stem.
pub fn batch_id(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_batch(path: &Path, expected: &[String]) -> Result<PendingBatch, StageError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let batch_id = batch_id(path);

    let bytes = std::fs::read(path).map_err(|e| StageError::read(STAGE, path, e))?;
    let table = Table::parse_csv(&bytes).map_err(|kind| StageError::new(STAGE, path, kind))?;
    if table.columns != expected {
        return Err(StageError::new(
            STAGE,
            path,
            StageErrorKind::HeaderMismatch {
                expected: expected.to_vec(),
                found: table.columns,
            },
        ));
    }

    Ok(PendingBatch {
        batch_id,
        file_name,
        path: path.to_path_buf(),
        bytes,
        table,
    })
}

fn load_bronze(path: &Path, expected: Vec<String>) -> Result<Table, StageError> {
    if !path.exists() {
        return Ok(Table::new(expected));
    }
    let table = Table::read_csv(STAGE, path)?;
    if table.columns != expected {
        return Err(StageError::new(
            STAGE,
            path,
            StageErrorKind::HeaderMismatch {
                expected,
                found: table.columns,
            },
        ));
    }
    Ok(table)
}

/// Add manifest entries for batches present in `bronze` but not in the
/// manifest. Returns the recovered batch ids.
fn recover_from_bronze(
    manifest: &mut IngestManifest,
    bronze: &Table,
    paths: &PathsConfig,
    run_id: Uuid,
) -> Vec<String> {
    let (Some(batch_idx), Some(stamp_idx)) = (
        bronze.column_index(SOURCE_BATCH_COLUMN),
        bronze.column_index(INGESTED_AT_COLUMN),
    ) else {
        return Vec::new();
    };

    let mut found: BTreeMap<&str, (usize, &str)> = BTreeMap::new();
    for row in &bronze.rows {
        let id = row.get(batch_idx).map(String::as_str).unwrap_or("");
        if id.is_empty() || manifest.contains(id) {
            continue;
        }
        let stamp = row.get(stamp_idx).map(String::as_str).unwrap_or("");
        found.entry(id).or_insert((0, stamp)).0 += 1;
    }

    let mut recovered = Vec::new();
    for (id, (row_count, stamp)) in found {
        let raw_path = paths.raw_copy(&format!("{id}.csv"));
        let checksum = persistence::hash_file(&raw_path).unwrap_or_default();
        let ingested_at = DateTime::parse_from_rfc3339(stamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        tracing::warn!(batch = %id, rows = row_count, "Batch found in bronze but not in manifest, recording it");
        manifest.record(ManifestEntry {
            batch_id: id.to_string(),
            row_count,
            raw_path,
            checksum,
            ingested_at,
            run_id,
        });
        recovered.push(id.to_string());
    }
    recovered
}

/// Run the bronze ingest stage.
pub fn run(config: &PipelineConfig) -> Result<IngestReport, PipelineError> {
    let paths = &config.paths;
    let run_id = Uuid::new_v4();
    let manifest_path = paths.manifest();
    let mut manifest =
        IngestManifest::load(&manifest_path).map_err(|e| StageError::read(STAGE, &manifest_path, e))?;

    let files = list_batches(&paths.incoming_dir())?;
    let schema_columns = config.schema.column_names();

    let bronze_path = paths.bronze_table();
    let mut bronze = load_bronze(&bronze_path, config.schema.bronze_column_names())?;
    let recovered = recover_from_bronze(&mut manifest, &bronze, paths, run_id);

    let mut pending = Vec::new();
    let mut skipped = Vec::new();
    for path in &files {
        let id = batch_id(path);
        if manifest.contains(&id) {
            tracing::info!(batch = %id, "Batch already ingested, skipping");
            skipped.push(id);
        } else {
            pending.push(read_batch(path, &schema_columns)?);
        }
    }

    if pending.is_empty() {
        if !recovered.is_empty() {
            manifest
                .save(&manifest_path)
                .map_err(|e| StageError::write(STAGE, &manifest_path, e))?;
        }
        tracing::info!(files = files.len(), "No new batches to ingest");
        return Ok(IngestReport {
            run_id,
            ingested: Vec::new(),
            skipped,
            rows_appended: 0,
            total_rows: bronze.row_count(),
        });
    }

    let ingested_at = Utc::now();
    let stamp = ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut ingested = Vec::new();
    let mut rows_appended = 0;
    let mut entries = Vec::new();

    for batch in &pending {
        let raw_path = paths.raw_copy(&batch.file_name);
        persistence::atomic_write(&raw_path, &batch.bytes)
            .map_err(|e| StageError::write(STAGE, &raw_path, e))?;

        for row in &batch.table.rows {
            let mut row = row.clone();
            row.push(batch.batch_id.clone());
            row.push(stamp.clone());
            bronze.rows.push(row);
        }
        rows_appended += batch.table.row_count();

        entries.push(ManifestEntry {
            batch_id: batch.batch_id.clone(),
            row_count: batch.table.row_count(),
            raw_path,
            checksum: persistence::hash_bytes(&batch.bytes),
            ingested_at,
            run_id,
        });
        tracing::info!(
            batch = %batch.batch_id,
            rows = batch.table.row_count(),
            "Ingested batch"
        );
        ingested.push(batch.batch_id.clone());
    }

    bronze.write_csv(STAGE, &bronze_path)?;
    for entry in entries {
        manifest.record(entry);
    }
    manifest
        .save(&manifest_path)
        .map_err(|e| StageError::write(STAGE, &manifest_path, e))?;

    if config.bronze.consume_incoming {
        for batch in &pending {
            std::fs::remove_file(&batch.path).map_err(|e| StageError::write(STAGE, &batch.path, e))?;
        }
    }

    tracing::info!(
        run_id = %run_id,
        batches = ingested.len(),
        rows = rows_appended,
        total = bronze.row_count(),
        "Bronze ingest complete"
    );
    Ok(IngestReport {
        run_id,
        ingested,
        skipped,
        rows_appended,
        total_rows: bronze.row_count(),
    })
}
