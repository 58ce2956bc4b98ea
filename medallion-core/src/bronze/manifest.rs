//! Persistent record of ingested batches.
//!
//! Membership in `processed` is what makes ingest idempotent; the entries
//! carry provenance for each batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::persistence;

/// One ingested batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub batch_id: String,
    pub row_count: usize,
    pub raw_path: PathBuf,
    /// SHA-256 of the raw batch file.
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
    pub run_id: Uuid,
}

/// Set of processed batch ids plus one entry per batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestManifest {
    #[serde(default)]
    pub processed: BTreeSet<String>,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl IngestManifest {
    /// Load the manifest, or an empty one if the file does not exist.
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(persistence::load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        persistence::atomic_write_json(path, self)
    }

    pub fn contains(&self, batch_id: &str) -> bool {
        self.processed.contains(batch_id)
    }

    /// Mark a batch as processed. Returns `false` if it already was.
    pub fn record(&mut self, entry: ManifestEntry) -> bool {
        if !self.processed.insert(entry.batch_id.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn total_rows(&self) -> usize {
        self.entries.iter().map(|e| e.row_count).sum()
    }
}
