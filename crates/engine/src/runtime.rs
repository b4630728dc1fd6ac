// SPDX-License-Identifier: MIT

//! Wires the registry, stage workers, flush loop, retry worker, and
//! background/foreground lifecycle hooks together (§4.2–§4.4).

use crate::copier::{self, CopyError};
use crate::indexer::{self, IndexError};
use crate::packager::{self, PackageError};
use crate::paged::{self, PagedCopyError};
use crate::registry::JobRegistry;
use crate::signal::StageSignal;
use archive_adapters::{
    AttachmentSource, ContentSource, ConversationError, ConversationSource, PageRenderer, RenderError,
    SourceError,
};
use archive_core::error::{RegistryError, WorkerError};
use archive_core::job::{EntryState, JobDescriptor, JobId, JobState, Phase, Query};
use archive_core::{Clock, EngineConfig, SystemClock};
use archive_storage::FileStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shared engine state. `Engine` itself is a cheap `Arc` handle; clone it
/// freely to move into spawned worker tasks. Generic over `Clock` rather
/// than a trait object, since `Clock: Clone` is not object-safe.
struct Inner<C: Clock> {
    registry: JobRegistry,
    store: FileStore,
    content_source: Arc<dyn ContentSource>,
    conversation_source: Arc<dyn ConversationSource>,
    attachment_source: Arc<dyn AttachmentSource>,
    renderer: Arc<dyn PageRenderer>,
    clock: C,
    config: EngineConfig,
    indexer_signal: StageSignal,
    copier_signal: StageSignal,
    packager_signal: StageSignal,
    shutdown: CancellationToken,
    backgrounded: AtomicBool,
}

pub struct Engine<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Returned by `start()`: join handles for the background tasks, awaited by
/// `stop()`.
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    async fn join_all(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl<C: Clock + 'static> Engine<C> {
    pub fn new(
        store: FileStore,
        content_source: Arc<dyn ContentSource>,
        conversation_source: Arc<dyn ConversationSource>,
        attachment_source: Arc<dyn AttachmentSource>,
        renderer: Arc<dyn PageRenderer>,
        clock: C,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                store,
                content_source,
                conversation_source,
                attachment_source,
                renderer,
                clock,
                config,
                indexer_signal: StageSignal::new(),
                copier_signal: StageSignal::new(),
                packager_signal: StageSignal::new(),
                shutdown: CancellationToken::new(),
                backgrounded: AtomicBool::new(false),
            }),
        }
    }

    /// Idempotent start (§4.2): loads persisted state, then spawns the
    /// flush loop, the three stage workers, the retry worker, and the
    /// one-shot delayed background-resume sweep.
    pub fn start(&self) -> Result<EngineHandle, RegistryError> {
        let history = self.inner.store.load().unwrap_or_else(|e| {
            error!(error = %e, "failed to load persisted job history, starting empty");
            Default::default()
        });
        self.inner.registry.load_history(history);

        let tasks = vec![
            tokio::spawn(self.clone().run_flush_loop()),
            tokio::spawn(self.clone().run_retry_worker()),
            tokio::spawn(self.clone().run_stage_worker(
                Phase::Queued,
                Phase::Indexing,
                Phase::Indexed,
                self.inner.indexer_signal.clone(),
                self.inner.copier_signal.clone(),
            )),
            tokio::spawn(self.clone().run_stage_worker(
                Phase::Indexed,
                Phase::Copying,
                Phase::Copied,
                self.inner.copier_signal.clone(),
                self.inner.packager_signal.clone(),
            )),
            tokio::spawn(self.clone().run_stage_worker(
                Phase::Copied,
                Phase::Packaging,
                Phase::Done,
                self.inner.packager_signal.clone(),
                StageSignal::new(),
            )),
            tokio::spawn(self.clone().run_delayed_background_resume()),
        ];

        self.pulse_all();

        Ok(EngineHandle { tasks })
    }

    /// `stop()` (§4.2): pauses every running job to `BackgroundPaused`,
    /// forces a flush, and joins the background tasks.
    pub async fn stop(&self, handle: EngineHandle) {
        self.inner.shutdown.cancel();
        self.background_all_running();
        self.force_flush();
        handle.join_all().await;
    }

    pub fn submit(&self, desc: JobDescriptor) -> JobId {
        let job_id = self.inner.registry.insert(desc, self.inner.clock.epoch_ms());
        self.inner.indexer_signal.pulse();
        job_id
    }

    pub fn list(&self) -> Vec<JobState> {
        self.inner.registry.list()
    }

    pub fn get(&self, job_id: &JobId) -> Result<JobState, RegistryError> {
        self.inner.registry.get(job_id)
    }

    pub fn delete(&self, job_id: &JobId, delete_output_path: bool) -> Result<(), RegistryError> {
        let job = self.inner.registry.get(job_id)?;
        if let Some(cancel) = self.inner.registry.delete(job_id)? {
            cancel.cancel();
        }
        if delete_output_path {
            let _ = std::fs::remove_file(&job.desc.output_path);
            let _ = std::fs::remove_dir_all(&job.desc.output_path);
        }
        Ok(())
    }

    pub fn pause(&self, job_id: &JobId) -> Result<(), RegistryError> {
        self.inner.registry.pause(job_id, Phase::Paused)
    }

    pub fn resume(&self, job_id: &JobId) -> Result<(), RegistryError> {
        let eligible = self.inner.registry.resume(job_id)?;
        self.pulse_for(eligible);
        Ok(())
    }

    /// `on_store_reset` hook (§4.2): the next access re-reads and finds it
    /// empty, since storage has been wiped out from under the engine.
    pub fn on_store_reset(&self) {
        self.inner.registry.load_history(Default::default());
    }

    /// Application moved to background: cancel all running jobs into
    /// `BackgroundPaused` and flush, and stop stage workers from claiming
    /// new work until foreground returns.
    pub fn on_background(&self) {
        self.inner.backgrounded.store(true, Ordering::SeqCst);
        self.background_all_running();
        self.force_flush();
    }

    /// Application returned to foreground: resume claiming new work and
    /// re-arm the delayed background-resume sweep.
    pub fn on_foreground(&self) {
        self.inner.backgrounded.store(false, Ordering::SeqCst);
        tokio::spawn(self.clone().run_delayed_background_resume());
    }

    fn background_all_running(&self) {
        for phase in [Phase::Indexing, Phase::Copying, Phase::Packaging] {
            for job_id in self.inner.registry.job_ids_in_phase(phase) {
                if let Err(e) = self.inner.registry.pause(&job_id, Phase::BackgroundPaused) {
                    warn!(job_id = %job_id, error = %e, "failed to background job");
                }
            }
        }
    }

    fn force_flush(&self) {
        let snapshot = self.inner.registry.snapshot();
        if let Err(e) = self.inner.store.flush(&snapshot) {
            error!(error = %e, "forced flush failed");
        }
    }

    fn pulse_all(&self) {
        self.inner.indexer_signal.pulse();
        self.inner.copier_signal.pulse();
        self.inner.packager_signal.pulse();
    }

    fn pulse_for(&self, phase: Phase) {
        match phase {
            Phase::Queued => self.inner.indexer_signal.pulse(),
            Phase::Indexed => self.inner.copier_signal.pulse(),
            Phase::Copied => self.inner.packager_signal.pulse(),
            _ => {}
        }
    }

    async fn run_flush_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.flush_interval);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Some(snapshot) = self.inner.registry.take_snapshot_if_dirty() {
                        if let Err(e) = self.inner.store.flush(&snapshot) {
                            error!(error = %e, "periodic flush failed, will retry next interval");
                        }
                    }
                }
            }
        }
    }

    async fn run_retry_worker(self) {
        let mut ticker = tokio::time::interval(self.inner.config.retry_scan_interval);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let now = self.inner.clock.epoch_ms();
                    for job_id in self.inner.registry.job_ids_in_phase(Phase::Error) {
                        let Ok(job) = self.inner.registry.get(&job_id) else { continue };
                        let Some(error_state) = job.error.as_ref() else { continue };
                        if error_state.next_retry_at_epoch_ms > now {
                            continue;
                        }
                        let Some(target) = job.paused_from.and_then(Phase::retry_target) else {
                            warn!(job_id = %job_id, "job in Error phase with no eligible retry target");
                            continue;
                        };
                        if let Err(e) = self.inner.registry.mutate(&job_id, |j| {
                            j.phase = target;
                            j.err_message = None;
                            j.paused_from = None;
                            j.error = None;
                        }) {
                            warn!(job_id = %job_id, error = %e, "failed to revert job after retry scan");
                            continue;
                        }
                        warn!(job_id = %job_id, target = %target, "retry worker reverted errored job");
                        self.pulse_for(target);
                    }
                }
            }
        }
    }

    async fn run_delayed_background_resume(self) {
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            _ = tokio::time::sleep(self.inner.config.resume_delay) => {}
        }
        for job_id in self.inner.registry.job_ids_in_phase(Phase::BackgroundPaused) {
            match self.inner.registry.resume(&job_id) {
                Ok(eligible) => {
                    info!(job_id = %job_id, phase = %eligible, "resumed job from background pause");
                    self.pulse_for(eligible);
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "failed to resume backgrounded job"),
            }
        }
    }

    /// The generic stage-worker loop described in §4.3: wait on signal,
    /// claim the first eligible job, execute its phase, advance on
    /// success, record `ErrorState` on failure, and pulse the next stage.
    async fn run_stage_worker(
        self,
        eligible: Phase,
        working: Phase,
        completed: Phase,
        own_signal: StageSignal,
        next_signal: StageSignal,
    ) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = own_signal.wait() => {}
            }
            if self.inner.backgrounded.load(Ordering::SeqCst) {
                continue;
            }

            let Some(job_id) = self.inner.registry.claim_one(eligible, working) else {
                continue;
            };
            own_signal.pulse();

            let cancel = CancellationToken::new();
            if let Err(e) = self.inner.registry.set_phase(&job_id, working, Some(cancel.clone())) {
                warn!(job_id = %job_id, error = %e, "failed to record running phase");
                continue;
            }
            self.force_flush_quiet();

            info!(job_id = %job_id, phase = %working, "stage transition");
            match self.execute_phase(&job_id, working, &cancel).await {
                Ok(()) => {
                    if let Err(e) = self.inner.registry.set_phase(&job_id, completed, None) {
                        warn!(job_id = %job_id, error = %e, "failed to record completed phase");
                        continue;
                    }
                    info!(job_id = %job_id, phase = %completed, "stage complete");
                    next_signal.pulse();
                }
                Err(StageOutcome::Cancelled) => {
                    // Pause/shutdown already reverted the phase; nothing to do.
                }
                Err(StageOutcome::Failed(message)) => {
                    let retry_at = self.inner.clock.epoch_ms()
                        + self.inner.config.retry_backoff.as_millis() as u64;
                    error!(job_id = %job_id, error = %message, "stage failed, scheduling retry");
                    let _ = self.inner.registry.mutate(&job_id, |job| {
                        job.phase = Phase::Error;
                        job.paused_from = Some(working);
                        job.err_message = Some(message.clone());
                        job.error = Some(archive_core::job::ErrorState {
                            last_err: message,
                            next_retry_at_epoch_ms: retry_at,
                        });
                    });
                }
                Err(StageOutcome::Fatal(message)) => {
                    // §7 Fatal: surfaced, never auto-retried. No `ErrorState`
                    // entry is recorded, so the retry worker leaves this job
                    // alone; only a manual `resume()` can move it forward.
                    error!(job_id = %job_id, error = %message, "stage failed fatally, not scheduling retry");
                    let _ = self.inner.registry.mutate(&job_id, |job| {
                        job.phase = Phase::Error;
                        job.paused_from = Some(working);
                        job.err_message = Some(message);
                        job.error = None;
                    });
                }
            }
            self.force_flush_quiet();
        }
    }

    fn force_flush_quiet(&self) {
        if let Some(snapshot) = self.inner.registry.take_snapshot_if_dirty() {
            if let Err(e) = self.inner.store.flush(&snapshot) {
                error!(error = %e, "flush after phase transition failed");
            }
        }
    }

    async fn execute_phase(
        &self,
        job_id: &JobId,
        working: Phase,
        cancel: &CancellationToken,
    ) -> Result<(), StageOutcome> {
        match working {
            Phase::Indexing => self.execute_indexing(job_id, cancel).await,
            Phase::Copying => self.execute_copying(job_id, cancel).await,
            Phase::Packaging => self.execute_packaging(job_id, cancel).await,
            other => {
                warn!(job_id = %job_id, phase = %other, "stage worker invoked for non-working phase");
                Ok(())
            }
        }
    }

    async fn execute_indexing(&self, job_id: &JobId, cancel: &CancellationToken) -> Result<(), StageOutcome> {
        let job = self.inner.registry.get(job_id).map_err(|e| StageOutcome::Failed(e.to_string()))?;
        let result = indexer::run_indexing(&job, self.inner.content_source.as_ref(), cancel)
            .await
            .map_err(|e| match e {
                IndexError::Cancelled => StageOutcome::Cancelled,
                other => StageOutcome::from(classify_index_error(other)),
            })?;
        self.inner
            .registry
            .mutate(job_id, |j| {
                j.manifest = result.manifest;
                j.bytes_total = result.bytes_total;
                j.items_total = result.items_total;
            })
            .map_err(|e| StageOutcome::Failed(e.to_string()))?;
        Ok(())
    }

    async fn execute_copying(&self, job_id: &JobId, cancel: &CancellationToken) -> Result<(), StageOutcome> {
        let job = self.inner.registry.get(job_id).map_err(|e| StageOutcome::Failed(e.to_string()))?;

        match &job.desc.query {
            Query::Conversations { .. } => self.execute_paged_copying(job_id, &job, cancel).await,
            Query::Filesystem { .. } => self.execute_file_copying(job_id, &job, cancel).await,
        }
    }

    async fn execute_file_copying(
        &self,
        job_id: &JobId,
        job: &JobState,
        cancel: &CancellationToken,
    ) -> Result<(), StageOutcome> {
        let workspace_dir = job.desc.workspace_dir();
        let mut paths: Vec<String> = job.manifest.keys().cloned().collect();
        paths.sort();

        for path in paths {
            if cancel.is_cancelled() {
                return Err(StageOutcome::Cancelled);
            }
            let checkpoint = job.manifest.get(&path).cloned();
            let Some(checkpoint) = checkpoint else { continue };
            if checkpoint.state == EntryState::Complete || checkpoint.state == EntryState::Skipped {
                continue;
            }

            let registry = &self.inner.registry;
            let outcome = copier::copy_entry(
                &path,
                &checkpoint,
                self.inner.content_source.as_ref(),
                &workspace_dir,
                self.inner.config.copy_chunk_bytes,
                cancel,
                |delta| {
                    let _ = registry.mutate(job_id, |j| {
                        if delta >= 0 {
                            j.bytes_done += delta as u64;
                        } else {
                            j.bytes_done = j.bytes_done.saturating_sub((-delta) as u64);
                        }
                    });
                },
            )
            .await
            .map_err(|e| match e {
                CopyError::Cancelled => StageOutcome::Cancelled,
                other => StageOutcome::from(classify_copy_error(other)),
            })?;

            self.inner
                .registry
                .mutate(job_id, |j| {
                    if outcome.skipped {
                        j.skip_entry(&path);
                        warn!(job_id = %job_id, entry = %path, "entry skipped during copy");
                    } else {
                        j.complete_entry(&path, outcome.hash_hex.clone());
                    }
                })
                .map_err(|e| StageOutcome::Failed(e.to_string()))?;
        }
        Ok(())
    }

    async fn execute_paged_copying(
        &self,
        job_id: &JobId,
        job: &JobState,
        cancel: &CancellationToken,
    ) -> Result<(), StageOutcome> {
        let workspace_dir = job.desc.workspace_dir();
        let container_ids: Vec<String> = match &job.desc.query {
            Query::Conversations { filter } => filter.split(',').map(|s| s.trim().to_string()).collect(),
            _ => Vec::new(),
        };
        let conversation_concurrency = self.inner.config.paged_conversation_concurrency.max(1);
        let attachment_concurrency = self.inner.config.paged_attachment_concurrency;

        for chunk in container_ids.chunks(conversation_concurrency) {
            if cancel.is_cancelled() {
                return Err(StageOutcome::Cancelled);
            }
            let mut set = tokio::task::JoinSet::new();
            for container_id in chunk {
                let engine = self.clone();
                let job_id = *job_id;
                let workspace_dir = workspace_dir.clone();
                let cancel = cancel.clone();
                let container_id = container_id.clone();
                let mut checkpoint = job
                    .checkpoints
                    .get(&container_id)
                    .cloned()
                    .unwrap_or_default();
                set.spawn(async move {
                    let registry = &engine.inner.registry;
                    paged::run_paged_copy(
                        &container_id,
                        &mut checkpoint,
                        engine.inner.conversation_source.as_ref(),
                        &engine.inner.attachment_source,
                        engine.inner.renderer.as_ref(),
                        &workspace_dir,
                        attachment_concurrency,
                        &cancel,
                        |cp| {
                            let _ = registry.mutate(&job_id, |j| {
                                j.checkpoints.insert(container_id.clone(), cp.clone());
                            });
                        },
                    )
                    .await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined.map_err(|e| StageOutcome::Failed(e.to_string()))? {
                    Ok(()) => {}
                    Err(PagedCopyError::Cancelled) => {
                        set.abort_all();
                        return Err(StageOutcome::Cancelled);
                    }
                    Err(other) => {
                        set.abort_all();
                        return Err(StageOutcome::from(classify_paged_error(other)));
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute_packaging(&self, job_id: &JobId, cancel: &CancellationToken) -> Result<(), StageOutcome> {
        let job = self.inner.registry.get(job_id).map_err(|e| StageOutcome::Failed(e.to_string()))?;
        if !job.desc.compress {
            return Ok(());
        }
        let staging_dir = job.desc.workspace_dir();
        let archive_path = job.desc.final_archive_path(self.inner.config.archive_format);
        let format = self.inner.config.archive_format;
        let overwrite = job.desc.overwrite_final;
        let cancel = cancel.clone();

        let bytes = tokio::task::spawn_blocking(move || {
            packager::package(&staging_dir, &archive_path, format, overwrite, &cancel)
        })
        .await
        .map_err(|e| StageOutcome::Failed(e.to_string()))?
        .map_err(|e| match e {
            PackageError::Cancelled => StageOutcome::Cancelled,
            other => StageOutcome::from(classify_package_error(other)),
        })?;

        self.inner
            .registry
            .mutate(job_id, |j| j.bytes_packaged = bytes)
            .map_err(|e| StageOutcome::Failed(e.to_string()))?;
        Ok(())
    }
}

enum StageOutcome {
    Cancelled,
    Failed(String),
    Fatal(String),
}

impl From<WorkerError> for StageOutcome {
    fn from(e: WorkerError) -> Self {
        if e.is_fatal() {
            StageOutcome::Fatal(e.to_string())
        } else {
            StageOutcome::Failed(e.to_string())
        }
    }
}

/// Classify a non-cancelled copy failure per the §7 taxonomy: source/
/// destination I/O is transient and retried; a missing source entry or an
/// escaping symlink target will not resolve on retry.
fn classify_copy_error(e: CopyError) -> WorkerError {
    match e {
        CopyError::Cancelled => WorkerError::Fatal("cancelled".to_string()),
        CopyError::Io(io) => WorkerError::TransientIo(io),
        CopyError::Source(SourceError::Io(io)) => WorkerError::TransientIo(io),
        CopyError::Source(SourceError::NotFound(entry)) => {
            WorkerError::Fatal(format!("entry not found in source: {entry}"))
        }
        CopyError::SymlinkEscapesRoot(target) => {
            WorkerError::Fatal(format!("symlink target escapes job root: {target}"))
        }
    }
}

fn classify_index_error(e: IndexError) -> WorkerError {
    match e {
        IndexError::Cancelled => WorkerError::Fatal("cancelled".to_string()),
        IndexError::Source(SourceError::Io(io)) => WorkerError::TransientIo(io),
        IndexError::Source(SourceError::NotFound(entry)) => {
            WorkerError::Fatal(format!("entry not found in source: {entry}"))
        }
    }
}

fn classify_package_error(e: PackageError) -> WorkerError {
    match e {
        PackageError::Cancelled => WorkerError::Fatal("cancelled".to_string()),
        PackageError::Io(io) => WorkerError::TransientIo(io),
        PackageError::AlreadyExists(path) => {
            WorkerError::Fatal(format!("archive already exists at {}", path.display()))
        }
        PackageError::Zip(err) => WorkerError::Fatal(err.to_string()),
    }
}

fn classify_paged_error(e: PagedCopyError) -> WorkerError {
    match e {
        PagedCopyError::Cancelled => WorkerError::Fatal("cancelled".to_string()),
        PagedCopyError::Io(io) => WorkerError::TransientIo(io),
        PagedCopyError::Conversation(ConversationError::Io(io)) => WorkerError::TransientIo(io),
        PagedCopyError::Conversation(ConversationError::NotFound(id)) => {
            WorkerError::Fatal(format!("conversation not found: {id}"))
        }
        PagedCopyError::Render(RenderError::Io(io)) => WorkerError::TransientIo(io),
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
