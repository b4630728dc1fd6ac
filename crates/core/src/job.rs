// SPDX-License-Identifier: MIT

//! Job identifiers, phase state machine, and the checkpointed data model
//! that the registry and pipeline workers operate on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

crate::define_id! {
    /// Unique identifier for an archive job.
    pub struct JobId("job-");
}

/// What to archive: either a conversation filter or a filesystem subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    Conversations { filter: String },
    Filesystem { path: String, revision: Option<String> },
}

/// Immutable job configuration, fixed at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub query: Query,
    pub output_path: PathBuf,
    pub staging_path: PathBuf,
    pub compress: bool,
    pub overwrite_final: bool,
}

impl JobDescriptor {
    /// Path of the final archive file, given the archive format in use.
    pub fn final_archive_path(&self, format: crate::config::ArchiveFormat) -> PathBuf {
        match format {
            crate::config::ArchiveFormat::TarGz => {
                let mut p = self.output_path.clone().into_os_string();
                p.push(".tar.gz");
                PathBuf::from(p)
            }
            crate::config::ArchiveFormat::Zip => {
                let name = self
                    .output_path
                    .file_name()
                    .map(|n| format!("{}.zip", n.to_string_lossy()))
                    .unwrap_or_else(|| "archive.zip".to_string());
                self.staging_path.join(name)
            }
        }
    }

    /// Directory where the mirrored source tree is materialised.
    pub fn workspace_dir(&self) -> PathBuf {
        self.staging_path.join("workspace")
    }
}

crate::builder! {
    pub struct JobDescriptorBuilder => JobDescriptor {
        set {
            job_id: JobId = JobId::new(),
            query: Query = Query::Filesystem { path: "/tmp".to_string(), revision: None },
            output_path: PathBuf = PathBuf::from("/tmp/out"),
            staging_path: PathBuf = PathBuf::from("/tmp/stage"),
            compress: bool = false,
            overwrite_final: bool = false,
        }
    }
}

/// Position in the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Queued,
    Indexing,
    Indexed,
    Copying,
    Copied,
    Packaging,
    Done,
    Paused,
    BackgroundPaused,
    Error,
}

crate::simple_display! {
    Phase {
        Queued => "queued",
        Indexing => "indexing",
        Indexed => "indexed",
        Copying => "copying",
        Copied => "copied",
        Packaging => "packaging",
        Done => "done",
        Paused => "paused",
        BackgroundPaused => "background_paused",
        Error => "error",
    }
}

impl Phase {
    /// True for phases currently owned by a stage worker (has a cancel-handle).
    pub fn is_running(self) -> bool {
        matches!(self, Phase::Indexing | Phase::Copying | Phase::Packaging)
    }

    /// The eligible (pre-working) phase the retry worker reverts to, if any.
    pub fn retry_target(self) -> Option<Phase> {
        match self {
            Phase::Indexing => Some(Phase::Queued),
            Phase::Copying => Some(Phase::Indexed),
            Phase::Packaging => Some(Phase::Copied),
            _ => None,
        }
    }
}

/// Progress/outcome state of one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    ToDo,
    InProgress,
    Complete,
    Skipped,
}

/// The kind of filesystem object a manifest entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Executable,
}

/// Per-entry checkpoint recorded during indexing and advanced during copying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCheckpoint {
    pub state: EntryState,
    pub kind: EntryKind,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_hex: Option<String>,
    /// Link target, recorded at indexing time so a crash between indexing
    /// and copying does not lose it (symlinks are created during copy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    /// Source modification time (Unix epoch seconds), applied to the staged
    /// copy once materialisation completes (§4.3.2).
    #[serde(default)]
    pub modified_epoch_secs: i64,
}

impl EntryCheckpoint {
    pub fn new(kind: EntryKind, size_bytes: u64) -> Self {
        Self {
            state: EntryState::ToDo,
            kind,
            size_bytes,
            hash_hex: None,
            link_target: None,
            modified_epoch_secs: 0,
        }
    }

    pub fn with_link_target(mut self, target: Option<String>) -> Self {
        self.link_target = target;
        self
    }

    pub fn with_modified_epoch_secs(mut self, epoch_secs: i64) -> Self {
        self.modified_epoch_secs = epoch_secs;
        self
    }
}

/// Per-container (conversation) checkpoint for the paged archival variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCheckpoint {
    pub cursor: String,
    pub page_size: u32,
    pub last: bool,
    pub byte_offset: u64,
}

/// Side table tracking retry scheduling for jobs in `Phase::Error`.
///
/// Not part of `JobState` itself: §3 keeps it as a separate keyed table so
/// that clearing it (on `resume`) is an atomic, independent operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorState {
    pub last_err: String,
    pub next_retry_at_epoch_ms: u64,
}

/// Full mutable state of one archive job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub desc: JobDescriptor,
    pub phase: Phase,
    pub started_at_epoch_ms: u64,
    #[serde(skip, default = "Instant::now")]
    pub started_at_monotonic: Instant,
    pub manifest: HashMap<String, EntryCheckpoint>,
    #[serde(default)]
    pub checkpoints: HashMap<String, ContainerCheckpoint>,
    pub bytes_total: u64,
    pub bytes_done: u64,
    pub bytes_packaged: u64,
    pub items_total: u64,
    pub items_done: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_message: Option<String>,
    /// The running phase this job was cancelled out of, when `phase` is
    /// `Paused` or `BackgroundPaused`. Used on resume to revert to the
    /// matching eligible (pre-working) phase, the same mapping the retry
    /// worker uses (`Phase::retry_target`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<Phase>,
    /// Retry scheduling for a job in `Phase::Error`, kept as its own table
    /// per §3 so that clearing it on resume is one atomic assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorState>,
}

impl JobState {
    pub fn new(desc: JobDescriptor, epoch_ms: u64) -> Self {
        Self {
            desc,
            phase: Phase::Queued,
            started_at_epoch_ms: epoch_ms,
            started_at_monotonic: Instant::now(),
            manifest: HashMap::new(),
            checkpoints: HashMap::new(),
            bytes_total: 0,
            bytes_done: 0,
            bytes_packaged: 0,
            items_total: 0,
            items_done: 0,
            err_message: None,
            paused_from: None,
            error: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.desc.job_id
    }

    /// Mark an entry complete, accounting its bytes into `bytes_done`/`items_done`
    /// if this is its first completion (idempotent against duplicate calls).
    pub fn complete_entry(&mut self, path: &str, hash_hex: Option<String>) {
        if let Some(cp) = self.manifest.get_mut(path) {
            if cp.state != EntryState::Complete {
                cp.state = EntryState::Complete;
                cp.hash_hex = hash_hex;
                self.items_done += 1;
            }
        }
    }

    pub fn skip_entry(&mut self, path: &str) {
        if let Some(cp) = self.manifest.get_mut(path) {
            if cp.state != EntryState::Skipped && cp.state != EntryState::Complete {
                cp.state = EntryState::Skipped;
                self.items_done += 1;
            }
        }
    }
}

/// Epoch milliseconds helper shared by the store and registry (avoids pulling
/// `SystemTime` handling into every caller).
pub fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
