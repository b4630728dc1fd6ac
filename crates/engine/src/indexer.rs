// SPDX-License-Identifier: MIT

//! Indexing stage (§4.3.1): list all entries under the job's query, build
//! the manifest, and total up bytes/items. Fully restartable — on
//! interruption the job simply reverts to `Queued` and re-lists from
//! scratch.

use archive_adapters::{ContentSource, SourceError};
use archive_core::job::{EntryCheckpoint, JobState};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("indexing cancelled")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Result of a completed index pass, applied to the job state by the caller
/// under the registry lock.
pub struct IndexResult {
    pub manifest: HashMap<String, EntryCheckpoint>,
    pub bytes_total: u64,
    pub items_total: u64,
}

pub async fn run_indexing(
    job: &JobState,
    source: &dyn ContentSource,
    cancel: &CancellationToken,
) -> Result<IndexResult, IndexError> {
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    let entries = source.list(&job.desc.query).await?;

    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    let mut manifest = HashMap::with_capacity(entries.len());
    let mut bytes_total = 0u64;
    for entry in entries {
        bytes_total += entry.size_bytes;
        let checkpoint = EntryCheckpoint::new(entry.kind, entry.size_bytes)
            .with_link_target(entry.link_target)
            .with_modified_epoch_secs(entry.modified_epoch_secs);
        manifest.insert(entry.path, checkpoint);
    }
    let items_total = manifest.len() as u64;

    Ok(IndexResult { manifest, bytes_total, items_total })
}

#[cfg(test)]
#[path = "indexer_tests.rs"]
mod tests;
