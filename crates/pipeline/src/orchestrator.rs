//! Pipeline orchestrator.
//!
//! Owns the run state and sequences sticker load, the image phase, the
//! video phase and archive finalization. Front ends drive it through
//! [`Pipeline::start`], [`Pipeline::retry`] and [`Pipeline::reset`] and
//! observe it through [`PipelineEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stickerbatch_common::config::{AppConfig, ArchiveConfig};
use stickerbatch_media_model::{SourceFile, StickerPlacement};
use stickerbatch_render_engine::{sticker, FfmpegVideoWorker, ImageCompositor, StickerRef, VideoWorker};

use crate::archive::{ArchiveAssembler, FinishedArchive};
use crate::batch::BatchScheduler;
use crate::error::{FailureKind, GuardViolation, PipelineError, PipelineResult};
use crate::offload::VideoOffloadCoordinator;
use crate::progress::ProgressTracker;

/// Message shown for any failed run. Details go to the log.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong while applying the sticker. Please try again.";

/// Lifecycle of a pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// Ready to start.
    Idle,
    /// A run is in flight.
    Processing,
    /// The archive was produced.
    Succeeded,
    /// The run aborted.
    Failed(RunFailure),
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Full error text, including the offending file name where known.
    pub message: String,
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub files: Vec<SourceFile>,
    pub sticker: Option<StickerRef>,
    /// Expected to be clamped already.
    pub placement: StickerPlacement,
}

/// Events observed by front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(RunState),
    /// Overall progress in `[0, 100]`, non-decreasing within a run.
    Progress(f64),
    Notification(Notification),
}

/// User-facing notices.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Success {
        message: String,
        archive_name: String,
    },
    Error {
        message: String,
        retryable: bool,
    },
}

/// Receives every [`PipelineEvent`].
pub type EventCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// A request that passed the start guard.
#[derive(Debug, Clone)]
struct AcceptedRun {
    files: Vec<SourceFile>,
    sticker: StickerRef,
    placement: StickerPlacement,
}

/// The sticker pipeline.
pub struct Pipeline {
    state: RunState,
    scheduler: BatchScheduler,
    offload: VideoOffloadCoordinator,
    archive: ArchiveConfig,
    image_share: f64,
    cancel: Arc<AtomicBool>,
    last_run: Option<AcceptedRun>,
    on_event: Option<EventCallback>,
}

impl RunRequest {
    pub fn new(files: Vec<SourceFile>, sticker: StickerRef, placement: StickerPlacement) -> Self {
        Self {
            files,
            sticker: Some(sticker),
            placement,
        }
    }
}

impl RunState {
    /// Whether the state only changes through `reset` or `retry`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

impl Pipeline {
    /// Create a pipeline that sends video work to `worker`.
    pub fn new(config: &AppConfig, worker: Arc<dyn VideoWorker>) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let scheduler = BatchScheduler::new(
            config.pipeline.effective_batch_size(),
            ImageCompositor::new(),
        )
        .with_cancel_flag(Arc::clone(&cancel));

        let stall_timeout = match config.video.stall_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let offload = VideoOffloadCoordinator::new(worker).with_stall_timeout(stall_timeout);

        Self {
            state: RunState::Idle,
            scheduler,
            offload,
            archive: config.archive.clone(),
            image_share: config.pipeline.effective_image_share(),
            cancel,
            last_run: None,
            on_event: None,
        }
    }

    /// Create a pipeline backed by the ffmpeg video worker.
    pub fn with_ffmpeg(config: &AppConfig) -> Self {
        let worker = FfmpegVideoWorker::new(config.video.clone());
        Self::new(config, Arc::new(worker))
    }

    /// Register the event callback, replacing any previous one.
    pub fn on_event(&mut self, callback: EventCallback) {
        self.on_event = Some(callback);
    }

    /// Current run state.
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Flag that cancels the current run when set.
    ///
    /// Checked between batches and while waiting on the video worker.
    /// Cleared at the start of every run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Check whether `request` would be accepted by [`start`](Self::start).
    pub fn guard(&self, request: &RunRequest) -> Result<(), GuardViolation> {
        if self.state != RunState::Idle {
            return Err(GuardViolation::NotIdle);
        }
        if request.sticker.is_none() {
            return Err(GuardViolation::MissingSticker);
        }
        if request.files.is_empty() {
            return Err(GuardViolation::NoFiles);
        }
        Ok(())
    }

    /// Start a run.
    ///
    /// A request that fails the guard is ignored and yields `Ok(None)`;
    /// the state stays as it was. Otherwise the state moves to
    /// `Processing` and ends in `Succeeded` or `Failed`.
    pub async fn start(&mut self, request: RunRequest) -> PipelineResult<Option<FinishedArchive>> {
        if let Err(violation) = self.guard(&request) {
            tracing::debug!(%violation, "Start ignored");
            return Ok(None);
        }
        let RunRequest {
            files,
            sticker,
            placement,
        } = request;
        let Some(sticker) = sticker else {
            return Ok(None);
        };

        let run = AcceptedRun {
            files,
            sticker,
            placement,
        };
        self.last_run = Some(run.clone());
        self.run(run).await.map(Some)
    }

    /// Re-run the last failed request from the start.
    ///
    /// Does nothing unless the pipeline is in `Failed`.
    pub async fn retry(&mut self) -> PipelineResult<Option<FinishedArchive>> {
        if !matches!(self.state, RunState::Failed(_)) {
            tracing::debug!(state = ?self.state, "Retry ignored");
            return Ok(None);
        }
        let Some(run) = self.last_run.clone() else {
            return Ok(None);
        };
        tracing::info!(files = run.files.len(), "Retrying run");
        self.run(run).await.map(Some)
    }

    /// Return a finished pipeline to `Idle`.
    pub fn reset(&mut self) {
        if self.state.is_terminal() {
            self.last_run = None;
            self.set_state(RunState::Idle);
        }
    }

    async fn run(&mut self, run: AcceptedRun) -> PipelineResult<FinishedArchive> {
        self.cancel.store(false, Ordering::SeqCst);
        self.set_state(RunState::Processing);

        match self.execute(&run).await {
            Ok(archive) => {
                tracing::info!(
                    archive = %archive.file_name,
                    entries = archive.entries.len(),
                    bytes = archive.bytes.len(),
                    "Run succeeded"
                );
                self.set_state(RunState::Succeeded);
                self.emit(PipelineEvent::Notification(Notification::Success {
                    message: format!("Sticker applied to {} file(s)", run.files.len()),
                    archive_name: archive.file_name.clone(),
                }));
                Ok(archive)
            }
            Err(e) => {
                let kind = e.kind();
                tracing::error!(error = %e, ?kind, "Run failed");
                self.set_state(RunState::Failed(RunFailure {
                    kind,
                    message: e.to_string(),
                }));
                self.emit(PipelineEvent::Notification(Notification::Error {
                    message: GENERIC_FAILURE_MESSAGE.to_string(),
                    retryable: true,
                }));
                Err(e)
            }
        }
    }

    async fn execute(&self, run: &AcceptedRun) -> PipelineResult<FinishedArchive> {
        tracing::info!(
            files = run.files.len(),
            sticker = %run.sticker.describe(),
            x = run.placement.position.x,
            y = run.placement.position.y,
            size = run.placement.size,
            "Starting run"
        );

        let sticker = Arc::new(sticker::load(&run.sticker).await?);
        let mut tracker = ProgressTracker::new(self.image_share);

        let images = self
            .scheduler
            .run(&run.files, Arc::clone(&sticker), run.placement, |pct| {
                self.advance(tracker.image(pct))
            })
            .await?;
        self.advance(tracker.image(100.0));

        let mut archive = ArchiveAssembler::new(self.archive.compression);
        for (name, blob) in images {
            archive.add_file(name, blob);
        }

        self.offload
            .offload(
                &run.files,
                sticker,
                run.placement,
                &mut archive,
                |pct| self.advance(tracker.video(pct)),
                &self.cancel,
            )
            .await?;

        let entries = archive.names();
        let bytes = archive.finalize()?;
        if tracker.current() < 100.0 {
            self.emit(PipelineEvent::Progress(tracker.finish()));
        }

        Ok(FinishedArchive {
            file_name: self.archive.file_name.clone(),
            bytes,
            entries,
        })
    }

    fn advance(&self, overall: Option<f64>) {
        if let Some(value) = overall {
            self.emit(PipelineEvent::Progress(value));
        }
    }

    fn set_state(&mut self, state: RunState) {
        tracing::debug!(from = ?self.state, to = ?state, "Run state changed");
        self.state = state.clone();
        self.emit(PipelineEvent::StateChanged(state));
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("batch_size", &self.scheduler.batch_size())
            .field("worker", &self.offload.worker_name())
            .field("image_share", &self.image_share)
            .finish()
    }
}
