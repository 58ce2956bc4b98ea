//! Shared persistence utilities: atomic file writes, JSON load/save and checksums.
//!
//! Every stage output goes through [`atomic_write`] (write to a `.tmp`
//! sibling, then rename) so an aborted stage never leaves a half-written
//! table behind.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Stage, StageError, StageErrorKind};

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames onto the target path. Creates parent directories if needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Stage-level JSON write: encoding failures surface as
/// [`StageErrorKind::Serialization`], I/O failures as a write error.
pub fn write_stage_json<T: serde::Serialize>(
    stage: Stage,
    path: &Path,
    data: &T,
) -> Result<(), StageError> {
    let json = serde_json::to_vec_pretty(data).map_err(|e| {
        StageError::new(
            stage,
            path,
            StageErrorKind::Serialization {
                message: e.to_string(),
            },
        )
    })?;
    atomic_write(path, &json).map_err(|e| StageError::write(stage, path, e))
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// SHA-256 of file contents, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(hash_bytes(&content))
}

/// SHA-256 of arbitrary bytes, hex encoded.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// `with_extension` would turn `gold.csv` and `gold.json` into the same
// `gold.tmp`, so the temp name keeps the full file name.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
