//! Video offload coordinator.
//!
//! Hands the run to a [`VideoWorker`] on its own thread and relays the
//! worker's messages: progress goes to the caller, heartbeats only keep the
//! stall timer quiet, the terminal message lands in the archive or becomes a
//! [`WorkerError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stickerbatch_media_model::{SourceFile, StickerPlacement, CANONICAL_VIDEO_NAME};
use stickerbatch_render_engine::{StickerImage, VideoRequest, VideoWorker, WorkerMessage, WorkerReply};
use tokio::sync::mpsc::unbounded_channel;

use crate::archive::ArchiveAssembler;
use crate::error::{PipelineError, PipelineResult, WorkerError};

/// How often the cancel flag is checked while waiting on the worker.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default silence allowed before a worker counts as stalled.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct VideoOffloadCoordinator {
    worker: Arc<dyn VideoWorker>,
    stall_timeout: Option<Duration>,
}

impl VideoOffloadCoordinator {
    pub fn new(worker: Arc<dyn VideoWorker>) -> Self {
        Self {
            worker,
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
        }
    }

    /// `None` waits forever.
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }

    /// Run the video phase.
    ///
    /// The worker gets the full file set and a snapshot of `archive`. On
    /// `Complete`, each stickered clip is added under its own name and the
    /// composed video under [`CANONICAL_VIDEO_NAME`]. Any message, including
    /// a heartbeat, resets the stall timer.
    ///
    /// Returning for any reason drops the receiving end, which tells the
    /// worker through [`WorkerReply::is_closed`] to stop. A cancel raised
    /// before the call never starts the worker.
    pub async fn offload<F>(
        &self,
        files: &[SourceFile],
        sticker: Arc<StickerImage>,
        placement: StickerPlacement,
        archive: &mut ArchiveAssembler,
        mut on_progress: F,
        cancel: &AtomicBool,
    ) -> PipelineResult<()>
    where
        F: FnMut(f64),
    {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("Video phase cancelled before start");
            return Err(PipelineError::Cancelled);
        }

        let request = VideoRequest {
            files: files.to_vec(),
            sticker,
            placement,
            archive: archive.snapshot(),
        };

        let (tx, mut rx) = unbounded_channel();
        let worker = Arc::clone(&self.worker);
        std::thread::Builder::new()
            .name("video-worker".to_string())
            .spawn(move || worker.run(request, WorkerReply::new(tx)))
            .map_err(WorkerError::Spawn)?;

        tracing::info!(
            worker = self.worker.name(),
            files = files.len(),
            archived = archive.len(),
            "Video phase started"
        );

        let poll = self
            .stall_timeout
            .map_or(POLL_INTERVAL, |limit| limit.min(POLL_INTERVAL));
        let mut last_message = Instant::now();

        loop {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!("Video phase cancelled");
                return Err(PipelineError::Cancelled);
            }

            let message = match tokio::time::timeout(poll, rx.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::error!(worker = self.worker.name(), "Video worker hung up");
                    return Err(WorkerError::Disconnected.into());
                }
                Err(_) => {
                    if let Some(limit) = self.stall_timeout {
                        if last_message.elapsed() >= limit {
                            tracing::error!(
                                worker = self.worker.name(),
                                timeout_secs = limit.as_secs_f64(),
                                "Video worker stalled"
                            );
                            return Err(WorkerError::Stalled {
                                secs: limit.as_secs(),
                            }
                            .into());
                        }
                    }
                    continue;
                }
            };
            last_message = Instant::now();

            match message {
                WorkerMessage::Progress(value) => on_progress(value),
                WorkerMessage::Heartbeat => {}
                WorkerMessage::Complete { video, clips } => {
                    for clip in clips {
                        archive.add_file(clip.name, clip.blob);
                    }
                    archive.add_file(CANONICAL_VIDEO_NAME, video);
                    tracing::info!(entries = archive.len(), "Video phase complete");
                    return Ok(());
                }
                WorkerMessage::Failed { message } => {
                    tracing::error!(worker = self.worker.name(), error = %message, "Video worker failed");
                    return Err(WorkerError::Failed(message).into());
                }
            }
        }
    }
}

impl std::fmt::Debug for VideoOffloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoOffloadCoordinator")
            .field("worker", &self.worker.name())
            .field("stall_timeout", &self.stall_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use stickerbatch_common::config::ArchiveCompression;
    use stickerbatch_media_model::{MediaKind, ProcessedOutput};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Replays a fixed script, then completes.
    struct Scripted {
        progress: Vec<f64>,
        seen_archive: Mutex<Vec<String>>,
    }

    impl VideoWorker for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn run(&self, request: VideoRequest, mut reply: WorkerReply) {
            if let Ok(mut seen) = self.seen_archive.lock() {
                *seen = request.archive.iter().map(|o| o.name.clone()).collect();
            }
            for value in &self.progress {
                reply.progress(*value);
            }
            let clips = request
                .files
                .iter()
                .filter(|f| f.is_video())
                .map(|f| ProcessedOutput::new(f.name(), f.content().clone()))
                .collect();
            reply.complete(vec![0xAAu8; 16], clips);
        }
    }

    struct Failing;

    impl VideoWorker for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _request: VideoRequest, reply: WorkerReply) {
            reply.fail("encoder exploded");
        }
    }

    /// Holds the reply open without saying anything.
    struct Silent;

    impl VideoWorker for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn run(&self, _request: VideoRequest, _reply: WorkerReply) {
            std::thread::sleep(Duration::from_secs(2));
        }
    }

    /// Never advances past 0% but keeps signalling for a while.
    struct Pinned {
        beats: usize,
    }

    impl VideoWorker for Pinned {
        fn name(&self) -> &str {
            "pinned"
        }

        fn run(&self, _request: VideoRequest, mut reply: WorkerReply) {
            for _ in 0..self.beats {
                reply.progress(0.0);
                std::thread::sleep(Duration::from_millis(40));
            }
            reply.complete(vec![1u8], Vec::new());
        }
    }

    /// Counts runs and waits until the coordinator hangs up.
    struct Patient {
        runs: AtomicUsize,
        hung_up: Arc<AtomicBool>,
    }

    impl VideoWorker for Patient {
        fn name(&self) -> &str {
            "patient"
        }

        fn run(&self, _request: VideoRequest, reply: WorkerReply) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if reply.is_closed() {
                    self.hung_up.store(true, Ordering::SeqCst);
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    /// Drops the reply without a terminal message.
    struct Vanishing;

    impl VideoWorker for Vanishing {
        fn name(&self) -> &str {
            "vanishing"
        }

        fn run(&self, _request: VideoRequest, reply: WorkerReply) {
            drop(reply);
        }
    }

    fn sticker() -> Arc<StickerImage> {
        Arc::new(StickerImage::from_rgba(
            "sticker.png",
            RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])),
        ))
    }

    fn files() -> Vec<SourceFile> {
        vec![
            SourceFile::new("a.png", MediaKind::Image, vec![1u8]),
            SourceFile::new("clip.mov", MediaKind::Video, vec![2u8]),
        ]
    }

    async fn run_with(
        worker: Arc<dyn VideoWorker>,
        timeout: Option<Duration>,
        archive: &mut ArchiveAssembler,
        cancel: &AtomicBool,
    ) -> (PipelineResult<()>, Vec<f64>) {
        let coordinator = VideoOffloadCoordinator::new(worker).with_stall_timeout(timeout);
        let mut seen = Vec::new();
        let result = coordinator
            .offload(
                &files(),
                sticker(),
                StickerPlacement::default(),
                archive,
                |p| seen.push(p),
                cancel,
            )
            .await;
        (result, seen)
    }

    #[tokio::test]
    async fn test_complete_adds_clips_and_video() {
        let worker = Arc::new(Scripted {
            progress: vec![25.0, 75.0, 100.0],
            seen_archive: Mutex::new(Vec::new()),
        });
        let mut archive = ArchiveAssembler::new(ArchiveCompression::Stored);
        archive.add_file("a.png", vec![9u8]);

        let (result, seen) =
            run_with(worker.clone(), None, &mut archive, &AtomicBool::new(false)).await;

        result.unwrap();
        assert_eq!(seen, vec![25.0, 75.0, 100.0]);
        assert_eq!(archive.names(), vec!["a.png", "clip.mov", "video.mp4"]);
        assert_eq!(*worker.seen_archive.lock().unwrap(), vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_message_becomes_worker_error() {
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(Arc::new(Failing), None, &mut archive, &AtomicBool::new(false)).await;

        match result {
            Err(PipelineError::Worker(WorkerError::Failed(message))) => {
                assert_eq!(message, "encoder exploded")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_silent_worker_stalls() {
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(
            Arc::new(Silent),
            Some(Duration::from_millis(100)),
            &mut archive,
            &AtomicBool::new(false),
        )
        .await;

        assert!(matches!(
            result,
            Err(PipelineError::Worker(WorkerError::Stalled { .. }))
        ));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_disconnect() {
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(Arc::new(Vanishing), None, &mut archive, &AtomicBool::new(false)).await;

        assert!(matches!(
            result,
            Err(PipelineError::Worker(WorkerError::Disconnected))
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(Arc::new(Silent), None, &mut archive, &AtomicBool::new(true)).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_keep_slow_worker_alive() {
        let mut archive = ArchiveAssembler::default();
        // 12 beats at 40ms outlast a 150ms stall timeout several times over.
        let (result, seen) = run_with(
            Arc::new(Pinned { beats: 12 }),
            Some(Duration::from_millis(150)),
            &mut archive,
            &AtomicBool::new(false),
        )
        .await;

        result.unwrap();
        assert!(seen.is_empty());
        assert_eq!(archive.names(), vec!["video.mp4"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_runs_worker() {
        let worker = Arc::new(Patient {
            runs: AtomicUsize::new(0),
            hung_up: Arc::new(AtomicBool::new(false)),
        });
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(worker.clone(), None, &mut archive, &AtomicBool::new(true)).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stall_tells_worker_to_stop() {
        let hung_up = Arc::new(AtomicBool::new(false));
        let worker = Arc::new(Patient {
            runs: AtomicUsize::new(0),
            hung_up: Arc::clone(&hung_up),
        });
        let mut archive = ArchiveAssembler::default();
        let (result, _) = run_with(
            worker.clone(),
            Some(Duration::from_millis(100)),
            &mut archive,
            &AtomicBool::new(false),
        )
        .await;

        assert!(matches!(
            result,
            Err(PipelineError::Worker(WorkerError::Stalled { .. }))
        ));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !hung_up.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hung_up.load(Ordering::SeqCst));
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
    }
}
