//! End-to-end runs through the orchestrator with an in-process video worker.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgba, RgbaImage};
use stickerbatch_common::config::AppConfig;
use stickerbatch_media_model::{MediaKind, ProcessedOutput, SourceFile, StickerPlacement};
use stickerbatch_pipeline::{
    FailureKind, Notification, Pipeline, PipelineEvent, RunRequest, RunState,
    GENERIC_FAILURE_MESSAGE,
};
use stickerbatch_render_engine::{StickerRef, VideoRequest, VideoWorker, WorkerReply};

/// Reports fixed progress and returns a dummy reel plus one clip per video source.
#[derive(Default)]
struct ScriptedWorker {
    calls: AtomicUsize,
    fail_with: Option<String>,
}

impl VideoWorker for ScriptedWorker {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(&self, request: VideoRequest, mut reply: WorkerReply) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            reply.fail(message.clone());
            return;
        }
        reply.progress(50.0);
        reply.progress(100.0);
        let clips = request
            .files
            .iter()
            .filter(|f| f.is_video())
            .map(|f| ProcessedOutput::new(f.name(), f.content().clone()))
            .collect();
        reply.complete(b"reel".to_vec(), clips);
    }
}

fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbaImage::from_pixel(width, height, Rgba(color))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn white_png(name: &str, side: u32) -> SourceFile {
    SourceFile::new(name, MediaKind::Image, png(side, side, [255, 255, 255, 255]))
}

fn red_sticker() -> StickerRef {
    StickerRef::Bytes {
        name: "sticker.png".to_string(),
        content: png(10, 10, [255, 0, 0, 255]).into(),
    }
}

fn placement() -> StickerPlacement {
    StickerPlacement::new(50.0, 50.0, 20.0)
}

fn three_pngs() -> Vec<SourceFile> {
    vec![
        white_png("a.png", 100),
        white_png("b.png", 200),
        white_png("c.png", 50),
    ]
}

fn setup(worker: Arc<ScriptedWorker>) -> (Pipeline, Arc<Mutex<Vec<PipelineEvent>>>) {
    let mut pipeline = Pipeline::new(&AppConfig::default(), worker);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    pipeline.on_event(Box::new(move |event| sink.lock().unwrap().push(event)));
    (pipeline, events)
}

fn progress_values(events: &[PipelineEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress(v) => Some(*v),
            _ => None,
        })
        .collect()
}

fn states(events: &[PipelineEvent]) -> Vec<RunState> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StateChanged(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn failure_kind(pipeline: &Pipeline) -> Option<FailureKind> {
    match pipeline.state() {
        RunState::Failed(failure) => Some(failure.kind),
        _ => None,
    }
}

fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            (file.name().to_string(), content)
        })
        .collect()
}

#[tokio::test]
async fn test_three_pngs_produce_four_entries() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, events) = setup(Arc::clone(&worker));

    let archive = pipeline
        .start(RunRequest::new(three_pngs(), red_sticker(), placement()))
        .await
        .unwrap()
        .expect("run should start");

    assert_eq!(pipeline.state(), &RunState::Succeeded);
    assert_eq!(archive.file_name, "stickers.zip");
    assert_eq!(archive.entries, vec!["a.png", "b.png", "c.png", "video.mp4"]);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 1);

    let entries = unzip(&archive.bytes);
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3], ("video.mp4".to_string(), b"reel".to_vec()));

    let expected_sides = [100, 200, 50];
    for ((name, bytes), side) in entries.iter().take(3).zip(expected_sides) {
        let decoded = image::load_from_memory(bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (side, side), "{name} changed size");
        assert_eq!(decoded.get_pixel(side / 2, side / 2), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    let events = events.lock().unwrap();
    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100.0));

    // Three image-phase updates, scaled into the image share, before any video update.
    let image_phase: Vec<f64> = progress.iter().copied().filter(|v| *v <= 80.0).collect();
    assert_eq!(image_phase.len(), 3);
    assert!((image_phase[0] - 26.67).abs() < 0.01);
    assert!((image_phase[1] - 53.33).abs() < 0.01);
    assert!((image_phase[2] - 80.0).abs() < 1e-9);

    assert_eq!(states(&events), vec![RunState::Processing, RunState::Succeeded]);

    let last_progress = events
        .iter()
        .rposition(|e| matches!(e, PipelineEvent::Progress(_)))
        .unwrap();
    let succeeded = events
        .iter()
        .position(|e| *e == PipelineEvent::StateChanged(RunState::Succeeded))
        .unwrap();
    assert!(last_progress < succeeded);

    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Notification(Notification::Success { archive_name, .. })
            if archive_name == "stickers.zip"
    )));
}

#[tokio::test]
async fn test_guard_violations_stay_idle() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, events) = setup(Arc::clone(&worker));

    let no_files = RunRequest::new(Vec::new(), red_sticker(), placement());
    assert!(pipeline.start(no_files).await.unwrap().is_none());

    let no_sticker = RunRequest {
        files: three_pngs(),
        sticker: None,
        placement: placement(),
    };
    assert!(pipeline.start(no_sticker).await.unwrap().is_none());

    assert_eq!(pipeline.state(), &RunState::Idle);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bad_sticker_fails_before_compositing() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, events) = setup(Arc::clone(&worker));

    let sticker = StickerRef::Bytes {
        name: "sticker.svg".to_string(),
        content: b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec().into(),
    };
    let result = pipeline
        .start(RunRequest::new(three_pngs(), sticker, placement()))
        .await;

    assert!(result.is_err());
    assert_eq!(failure_kind(&pipeline), Some(FailureKind::Sticker));
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);

    let events = events.lock().unwrap();
    assert!(progress_values(&events).is_empty());
    assert!(events.contains(&PipelineEvent::Notification(Notification::Error {
        message: GENERIC_FAILURE_MESSAGE.to_string(),
        retryable: true,
    })));
}

#[tokio::test]
async fn test_retry_fails_with_same_kind() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, _events) = setup(Arc::clone(&worker));

    let files = vec![
        white_png("a.png", 40),
        SourceFile::new("broken.png", MediaKind::Image, b"not a png".to_vec()),
    ];
    pipeline
        .start(RunRequest::new(files, red_sticker(), placement()))
        .await
        .unwrap_err();
    assert_eq!(failure_kind(&pipeline), Some(FailureKind::Composite));

    let err = pipeline.retry().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Composite);
    match pipeline.state() {
        RunState::Failed(failure) => assert!(failure.message.contains("broken.png")),
        other => panic!("unexpected state: {other:?}"),
    }
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reset_allows_a_new_run() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, _events) = setup(Arc::clone(&worker));

    let request = RunRequest::new(vec![white_png("a.png", 30)], red_sticker(), placement());
    pipeline.start(request.clone()).await.unwrap();
    assert_eq!(pipeline.state(), &RunState::Succeeded);

    // Terminal until reset.
    assert!(pipeline.start(request.clone()).await.unwrap().is_none());

    pipeline.reset();
    assert_eq!(pipeline.state(), &RunState::Idle);

    let archive = pipeline.start(request).await.unwrap().unwrap();
    assert_eq!(archive.entries.len(), 2);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_worker_failure_fails_run() {
    let worker = Arc::new(ScriptedWorker {
        fail_with: Some("no encoder".to_string()),
        ..ScriptedWorker::default()
    });
    let (mut pipeline, events) = setup(Arc::clone(&worker));

    let err = pipeline
        .start(RunRequest::new(three_pngs(), red_sticker(), placement()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Worker);
    assert!(err.to_string().contains("no encoder"));
    assert_eq!(failure_kind(&pipeline), Some(FailureKind::Worker));

    let progress = progress_values(&events.lock().unwrap());
    assert!(progress.iter().all(|v| *v <= 80.0));
}

#[tokio::test]
async fn test_cancel_between_batches() {
    let worker = Arc::new(ScriptedWorker::default());
    let mut pipeline = Pipeline::new(&AppConfig::default(), worker.clone());
    let cancel = pipeline.cancel_flag();
    pipeline.on_event(Box::new(move |event| {
        if matches!(event, PipelineEvent::Progress(_)) {
            cancel.store(true, Ordering::SeqCst);
        }
    }));

    let err = pipeline
        .start(RunRequest::new(three_pngs(), red_sticker(), placement()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(failure_kind(&pipeline), Some(FailureKind::Cancelled));
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_video_source_gets_its_own_entry() {
    let worker = Arc::new(ScriptedWorker::default());
    let (mut pipeline, _events) = setup(Arc::clone(&worker));

    let files = vec![
        white_png("a.png", 64),
        SourceFile::new("clip.mov", MediaKind::Video, b"mov-bytes".to_vec()),
    ];
    let archive = pipeline
        .start(RunRequest::new(files.clone(), red_sticker(), placement()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(archive.entries.len(), files.len() + 1);
    assert_eq!(archive.entries, vec!["a.png", "clip.mov", "video.mp4"]);
}
