// SPDX-License-Identifier: MIT

//! The Job Registry (§4.2): a single mutex-guarded map plus a dirty bit.
//! Workers take the lock for every mutation and always leave it marked
//! dirty; the flush loop is the only reader of the dirty bit.

use archive_core::error::RegistryError;
use archive_core::job::{JobDescriptor, JobId, JobState, Phase};
use archive_storage::JobHistory;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

struct Inner {
    history: JobHistory,
    dirty: bool,
    /// Cancel handle for a job's currently running phase execution, if any.
    /// Not part of `JobState` itself: it is not serialisable and is rebuilt
    /// fresh every time a worker claims a job.
    cancel_handles: HashMap<JobId, CancellationToken>,
}

/// The mutex-guarded job map (§4.2, §4.4). All I/O against external storage
/// is the caller's responsibility; the registry only ever mutates memory
/// and flips the dirty bit.
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: JobHistory::new(),
                dirty: false,
                cancel_handles: HashMap::new(),
            }),
        }
    }

    /// Replace the in-memory view wholesale: used once at startup (`load()`)
    /// and on the storage-reset hook (§4.2).
    pub fn load_history(&self, history: JobHistory) {
        let mut inner = self.inner.lock();
        inner.history = history;
        inner.dirty = false;
    }

    /// Jobs sorted by `(started_at asc, job_id asc)`.
    pub fn list(&self) -> Vec<JobState> {
        let inner = self.inner.lock();
        let mut jobs: Vec<JobState> = inner.history.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.started_at_epoch_ms
                .cmp(&b.started_at_epoch_ms)
                .then_with(|| a.desc.job_id.as_str().cmp(b.desc.job_id.as_str()))
        });
        jobs
    }

    pub fn get(&self, job_id: &JobId) -> Result<JobState, RegistryError> {
        self.inner
            .lock()
            .history
            .get(job_id)
            .cloned()
            .ok_or(RegistryError::NotFound(*job_id))
    }

    /// Register a new job in `Phase::Queued` and mark dirty.
    pub fn insert(&self, desc: JobDescriptor, epoch_ms: u64) -> JobId {
        let job_id = desc.job_id;
        let state = JobState::new(desc, epoch_ms);
        let mut inner = self.inner.lock();
        inner.history.insert(job_id, state);
        inner.dirty = true;
        job_id
    }

    /// Remove a job from history, returning its cancel handle (if any) so
    /// the caller can cancel an in-flight execution before dropping it.
    pub fn delete(&self, job_id: &JobId) -> Result<Option<CancellationToken>, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.history.remove(job_id).is_none() {
            return Err(RegistryError::NotFound(*job_id));
        }
        inner.dirty = true;
        Ok(inner.cancel_handles.remove(job_id))
    }

    /// Record a phase transition (§4.2 `set`). If `phase` is a running
    /// phase, `cancel` is stored as its cancel-handle; `Done`/`Error`
    /// always clear any stored handle.
    pub fn set_phase(
        &self,
        job_id: &JobId,
        phase: Phase,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        {
            let job = inner
                .history
                .get_mut(job_id)
                .ok_or(RegistryError::NotFound(*job_id))?;
            job.phase = phase;
        }
        if phase.is_running() {
            if let Some(cancel) = cancel {
                inner.cancel_handles.insert(*job_id, cancel);
            }
        } else {
            inner.cancel_handles.remove(job_id);
        }
        inner.dirty = true;
        Ok(())
    }

    /// Apply an arbitrary mutation to a job's state and mark dirty. Used by
    /// stage workers to update manifests, counters, and checkpoints.
    pub fn mutate<F>(&self, job_id: &JobId, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut JobState),
    {
        let mut inner = self.inner.lock();
        let job = inner
            .history
            .get_mut(job_id)
            .ok_or(RegistryError::NotFound(*job_id))?;
        f(job);
        inner.dirty = true;
        Ok(())
    }

    /// `pause(job_id)` (§4.2): only valid for a running phase with a live
    /// cancel-handle. Invokes the handle, records which running phase the
    /// job was paused out of, and sets the side-state.
    pub fn pause(&self, job_id: &JobId, side_state: Phase) -> Result<(), RegistryError> {
        debug_assert!(matches!(side_state, Phase::Paused | Phase::BackgroundPaused));
        let mut inner = self.inner.lock();
        {
            let job = inner
                .history
                .get(job_id)
                .ok_or(RegistryError::NotFound(*job_id))?;
            if !job.phase.is_running() {
                return Err(RegistryError::PreconditionViolation {
                    job_id: *job_id,
                    reason: format!("job is in phase {} which is not running", job.phase),
                });
            }
        }
        let cancel = inner
            .cancel_handles
            .remove(job_id)
            .ok_or(RegistryError::PreconditionViolation {
                job_id: *job_id,
                reason: "no cancel handle registered for running job".to_string(),
            })?;
        cancel.cancel();

        let job = inner
            .history
            .get_mut(job_id)
            .ok_or(RegistryError::NotFound(*job_id))?;
        let running_phase = job.phase;
        job.phase = side_state;
        job.paused_from = Some(running_phase);
        inner.dirty = true;
        Ok(())
    }

    /// `resume(job_id)` (§4.2): valid for `Paused`, `BackgroundPaused`, or
    /// `Error`. Reverts to the eligible phase matching whichever running
    /// phase the job was interrupted from, clears any pending error state,
    /// and returns that eligible phase so the caller can pulse its signal.
    pub fn resume(&self, job_id: &JobId) -> Result<Phase, RegistryError> {
        let mut inner = self.inner.lock();
        let job = inner
            .history
            .get_mut(job_id)
            .ok_or(RegistryError::NotFound(*job_id))?;

        let eligible = match job.phase {
            Phase::Error => job
                .paused_from
                .and_then(Phase::retry_target)
                .unwrap_or(Phase::Queued),
            Phase::Paused | Phase::BackgroundPaused => job
                .paused_from
                .and_then(Phase::retry_target)
                .unwrap_or(Phase::Queued),
            other => {
                return Err(RegistryError::PreconditionViolation {
                    job_id: *job_id,
                    reason: format!("job is in phase {other} which cannot be resumed"),
                })
            }
        };

        job.phase = eligible;
        job.paused_from = None;
        job.err_message = None;
        job.error = None;
        inner.dirty = true;
        Ok(eligible)
    }

    /// Every job currently in `phase` (used by workers to claim work and by
    /// the app-state monitor to enumerate running jobs).
    pub fn job_ids_in_phase(&self, phase: Phase) -> Vec<JobId> {
        let inner = self.inner.lock();
        let mut ids: Vec<JobId> = inner
            .history
            .iter()
            .filter(|(_, job)| job.phase == phase)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Atomically claim the first job (by the same ordering as `list`) in
    /// `eligible`, advancing it to `working`. Returns `None` if no job is
    /// eligible. This is the single locked region guaranteeing only one
    /// worker ever owns a given job (§4.3).
    pub fn claim_one(&self, eligible: Phase, working: Phase) -> Option<JobId> {
        let mut inner = self.inner.lock();
        let mut candidates: Vec<&mut JobState> = inner
            .history
            .values_mut()
            .filter(|job| job.phase == eligible)
            .collect();
        candidates.sort_by(|a, b| {
            a.started_at_epoch_ms
                .cmp(&b.started_at_epoch_ms)
                .then_with(|| a.desc.job_id.as_str().cmp(b.desc.job_id.as_str()))
        });
        let job = candidates.into_iter().next()?;
        job.phase = working;
        let job_id = job.desc.job_id;
        inner.dirty = true;
        Some(job_id)
    }

    /// Snapshot the full history for a flush, and report whether it was
    /// dirty (clearing the bit). The caller performs the actual I/O.
    pub fn take_snapshot_if_dirty(&self) -> Option<JobHistory> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return None;
        }
        inner.dirty = false;
        Some(inner.history.clone())
    }

    /// Force a snapshot regardless of the dirty bit (used before shutdown).
    pub fn snapshot(&self) -> JobHistory {
        let mut inner = self.inner.lock();
        inner.dirty = false;
        inner.history.clone()
    }

    pub fn cancel_handle(&self, job_id: &JobId) -> Option<CancellationToken> {
        self.inner.lock().cancel_handles.get(job_id).cloned()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
