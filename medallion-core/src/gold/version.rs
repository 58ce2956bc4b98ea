//! Content-addressed version record for the gold table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::persistence;

/// Identifies one concrete gold table by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVersion {
    /// SHA-256 of the gold table file.
    pub version_id: String,
    pub row_count: usize,
    pub dataset_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl DataVersion {
    /// Hash `dataset_path` as written on disk.
    pub fn capture(dataset_path: &Path, row_count: usize) -> io::Result<Self> {
        Ok(Self {
            version_id: persistence::hash_file(dataset_path)?,
            row_count,
            dataset_path: dataset_path.to_path_buf(),
            created_at: Utc::now(),
        })
    }

    /// Whether the file at `dataset_path` still matches this version.
    pub fn matches_file(&self) -> io::Result<bool> {
        Ok(persistence::hash_file(&self.dataset_path)? == self.version_id)
    }
}
