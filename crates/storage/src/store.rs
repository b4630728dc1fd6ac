// SPDX-License-Identifier: MIT

//! Opaque job-history persistence (§4.1, §6).
//!
//! The registry treats the store as two operations: `load()` and
//! `flush(JobHistory)`. This implementation encodes the snapshot as
//! gzip-compressed JSON and writes it atomically (temp file + rename) so a
//! crash mid-flush never corrupts the previous snapshot.

use archive_core::error::StoreError;
use archive_core::job::JobState;
use archive_core::JobId;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// The full registry snapshot: every job, keyed by its ID.
///
/// Serialized as opaque bytes by the store; the registry is the only code
/// that interprets its contents.
pub type JobHistory = HashMap<JobId, JobState>;

/// File-backed implementation of the persistent state store.
///
/// `Load()` returns an empty history (not an error) when the file does not
/// yet exist, matching the "not found is treated as empty" contract in §4.1.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<JobHistory, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JobHistory::new()),
            Err(e) => return Err(StoreError::Read(e)),
        };

        let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .map_err(StoreError::Read)?;

        serde_json::from_str(&json).map_err(StoreError::Corrupt)
    }

    /// Write the full snapshot, unconditionally. The dirty-flag gating that
    /// skips this call when nothing changed lives in the registry, per §4.1
    /// ("writes only when a dirty bit is set").
    pub fn flush(&self, history: &JobHistory) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(StoreError::Write)?;
        }

        let json = serde_json::to_string(history).map_err(StoreError::Corrupt)?;

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(json.as_bytes()).map_err(StoreError::Write)?;
        let compressed = encoder.finish().map_err(StoreError::Write)?;

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, &compressed).map_err(StoreError::Write)?;
        fs::rename(&tmp_path, &self.path).map_err(StoreError::Write)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("history");
    path.with_file_name(format!("{name}.tmp"))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
