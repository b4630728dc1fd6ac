// SPDX-License-Identifier: MIT

//! Error taxonomy shared by the registry and stage workers (§7).
//!
//! `IntegrityFailure` and `Cancelled` are deliberately absent: both are
//! recovered locally by the copier/executor and never surfaced as an error
//! variant on a job record.

use crate::job::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("precondition violated for job {job_id}: {reason}")]
    PreconditionViolation { job_id: JobId, reason: String },

    #[error("persistent state store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read job history: {0}")]
    Read(std::io::Error),

    #[error("failed to write job history: {0}")]
    Write(std::io::Error),

    #[error("job history is corrupt: {0}")]
    Corrupt(serde_json::Error),
}

/// Errors a stage worker can raise while executing one phase of one job.
/// `Transient` is recorded in `ErrorState` for later retry; `Fatal` is
/// surfaced without automatic retry.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transient I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl WorkerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }
}
