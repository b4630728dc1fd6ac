// SPDX-License-Identifier: MIT

//! Trait boundary for the remote content source named in §1/§4.5: list
//! entries under a query, and stream an entry's bytes from an offset. The
//! core never talks to a live filesystem or API directly — only through
//! this port.

use archive_core::job::EntryKind;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry discovered during indexing: its path (relative to the query
/// root), its kind, and its size in bytes (0 for directories and symlinks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size_bytes: u64,
    /// For symlinks: the link target. For executables: ignored (kind already
    /// distinguishes mode).
    pub link_target: Option<String>,
    /// Source modification time, Unix epoch seconds. Applied to the staged
    /// copy after materialisation (§4.3.2).
    pub modified_epoch_secs: i64,
}

/// Reader returned by `open_range`, boxed so implementations can be either
/// a local file handle or a network stream.
pub type EntryReader = std::pin::Pin<Box<dyn AsyncRead + Send + Unpin>>;

#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    /// List all entries reachable under the job's query.
    async fn list(&self, query: &archive_core::job::Query) -> Result<Vec<SourceEntry>, SourceError>;

    /// Open `entry` for reading starting at byte `offset` (used both for a
    /// fresh copy from 0 and a resume from `dst_size`).
    async fn open_range(&self, entry: &str, offset: u64) -> Result<EntryReader, SourceError>;
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;

    /// In-memory content source for tests: a fixed directory of entries,
    /// each with its full byte contents.
    #[derive(Clone, Default)]
    pub struct FakeContentSource {
        entries: Arc<Mutex<Vec<SourceEntry>>>,
        bytes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        /// Paths that should fail `open_range` once with a transient error
        /// (consumed on first attempt, to model a flaky source recovering).
        fail_once: Arc<Mutex<HashMap<String, u32>>>,
    }

    impl FakeContentSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
            let path = path.into();
            let contents = contents.into();
            self.entries.lock().push(SourceEntry {
                path: path.clone(),
                kind: EntryKind::File,
                size_bytes: contents.len() as u64,
                link_target: None,
                modified_epoch_secs: 0,
            });
            self.bytes.lock().insert(path, contents);
        }

        pub fn add_executable(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
            let path = path.into();
            let contents = contents.into();
            self.entries.lock().push(SourceEntry {
                path: path.clone(),
                kind: EntryKind::Executable,
                size_bytes: contents.len() as u64,
                link_target: None,
                modified_epoch_secs: 0,
            });
            self.bytes.lock().insert(path, contents);
        }

        pub fn add_directory(&self, path: impl Into<String>) {
            self.entries.lock().push(SourceEntry {
                path: path.into(),
                kind: EntryKind::Directory,
                size_bytes: 0,
                link_target: None,
                modified_epoch_secs: 0,
            });
        }

        pub fn add_symlink(&self, path: impl Into<String>, target: impl Into<String>) {
            self.entries.lock().push(SourceEntry {
                path: path.into(),
                kind: EntryKind::Symlink,
                size_bytes: 0,
                link_target: Some(target.into()),
                modified_epoch_secs: 0,
            });
        }

        /// Make the next `open_range` call for `path` fail with a transient
        /// I/O error, `times` times, before succeeding.
        pub fn fail_next_opens(&self, path: impl Into<String>, times: u32) {
            self.fail_once.lock().insert(path.into(), times);
        }

        pub fn set_bytes(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
            self.bytes.lock().insert(path.into(), contents.into());
        }

        /// Override the modification time recorded for `path` at indexing
        /// time (defaults to 0 from the `add_*` helpers).
        pub fn set_mtime(&self, path: &str, epoch_secs: i64) {
            if let Some(entry) = self.entries.lock().iter_mut().find(|e| e.path == path) {
                entry.modified_epoch_secs = epoch_secs;
            }
        }
    }

    #[async_trait]
    impl ContentSource for FakeContentSource {
        async fn list(
            &self,
            _query: &archive_core::job::Query,
        ) -> Result<Vec<SourceEntry>, SourceError> {
            Ok(self.entries.lock().clone())
        }

        async fn open_range(&self, entry: &str, offset: u64) -> Result<EntryReader, SourceError> {
            {
                let mut fail_once = self.fail_once.lock();
                if let Some(remaining) = fail_once.get_mut(entry) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(SourceError::Io(std::io::Error::other("injected flake")));
                    }
                }
            }

            let bytes = self
                .bytes
                .lock()
                .get(entry)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(entry.to_string()))?;
            let offset = offset.min(bytes.len() as u64) as usize;
            Ok(Box::pin(Cursor::new(bytes[offset..].to_vec())))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeContentSource;

#[cfg(test)]
#[path = "content_source_tests.rs"]
mod tests;
