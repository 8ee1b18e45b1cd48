//! Video worker: message protocol and the ffmpeg implementation.
//!
//! The worker runs outside the orchestrator's control flow and talks to it
//! only through messages:
//!
//! ```text
//! orchestrator ── VideoRequest ──▶ worker
//!              ◀── Progress(v) | Heartbeat ──  (any number)
//!              ◀── Complete | Failed (exactly one)
//! ```
//!
//! The ffmpeg worker stickers every video source, then builds the canonical
//! reel: every composited image shown as a still, followed by every
//! stickered clip, all letterboxed to one resolution. Once the orchestrator
//! stops listening, the running ffmpeg child is killed.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use image::ImageFormat;
use stickerbatch_common::config::VideoConfig;
use stickerbatch_media_model::{
    Blob, ProcessedOutput, SourceFile, StickerPlacement, CANONICAL_VIDEO_NAME,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::VideoError;
use crate::sticker::StickerImage;

/// Everything the worker needs, sent in one message.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    /// The full file set of the run.
    pub files: Vec<SourceFile>,
    pub sticker: Arc<StickerImage>,
    pub placement: StickerPlacement,
    /// Snapshot of the archive built so far (the composited images).
    pub archive: Vec<ProcessedOutput>,
}

/// Messages from the worker back to the orchestrator.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Video-phase progress in `[0, 100]`, never lower than the previous one.
    Progress(f64),
    /// The worker is alive but has no new progress to report.
    Heartbeat,
    /// Terminal: the composed video plus stickered copies of video sources.
    Complete {
        video: Blob,
        clips: Vec<ProcessedOutput>,
    },
    /// Terminal: the worker gave up.
    Failed { message: String },
}

/// The worker's end of the channel.
///
/// Terminal messages consume the reply, so at most one can be sent.
#[derive(Debug)]
pub struct WorkerReply {
    tx: UnboundedSender<WorkerMessage>,
    last_progress: f64,
}

impl WorkerReply {
    pub fn new(tx: UnboundedSender<WorkerMessage>) -> Self {
        Self {
            tx,
            last_progress: 0.0,
        }
    }

    /// Report progress. Values are clamped to `[0, 100]`. A value that is
    /// not above the last reported one is sent as a [`WorkerMessage::Heartbeat`],
    /// so every call counts as a sign of life.
    pub fn progress(&mut self, value: f64) {
        if !value.is_finite() {
            self.heartbeat();
            return;
        }
        let value = value.clamp(0.0, 100.0);
        if value <= self.last_progress {
            self.heartbeat();
            return;
        }
        self.last_progress = value;
        // A closed channel means the coordinator stopped listening.
        let _ = self.tx.send(WorkerMessage::Progress(value));
    }

    pub fn heartbeat(&self) {
        let _ = self.tx.send(WorkerMessage::Heartbeat);
    }

    /// Whether the orchestrator has stopped listening. Workers should stop
    /// as soon as this turns true.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle another thread can poll for [`WorkerReply::is_closed`].
    fn listener(&self) -> UnboundedSender<WorkerMessage> {
        self.tx.clone()
    }

    pub fn complete(self, video: impl Into<Blob>, clips: Vec<ProcessedOutput>) {
        let _ = self.tx.send(WorkerMessage::Complete {
            video: video.into(),
            clips,
        });
    }

    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(WorkerMessage::Failed {
            message: message.into(),
        });
    }
}

/// An isolated video-processing context.
///
/// `run` is called on a dedicated thread and may block. It must finish by
/// calling [`WorkerReply::complete`] or [`WorkerReply::fail`], and should
/// report progress or heartbeats often enough to stay under the stall
/// timeout. When [`WorkerReply::is_closed`] turns true the result is no
/// longer wanted.
pub trait VideoWorker: Send + Sync + 'static {
    /// Worker name for logs.
    fn name(&self) -> &str;

    /// Process the request, reporting through `reply`.
    fn run(&self, request: VideoRequest, reply: WorkerReply);
}

/// How often a running ffmpeg child is checked against a closed reply.
const LISTENER_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// ffmpeg/ffprobe-backed worker.
#[derive(Debug, Clone)]
pub struct FfmpegVideoWorker {
    config: VideoConfig,
}

#[derive(Debug, Clone, Copy)]
struct VideoProbe {
    width: u32,
    height: u32,
    duration_secs: f64,
}

impl FfmpegVideoWorker {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// Whether ffmpeg and ffprobe can be launched.
    pub fn is_available(&self) -> bool {
        binary_runs(&self.config.ffmpeg_path) && binary_runs(&self.config.ffprobe_path)
    }

    fn render(
        &self,
        request: VideoRequest,
        reply: &mut WorkerReply,
    ) -> Result<(Blob, Vec<ProcessedOutput>), VideoError> {
        let workdir = tempfile::Builder::new()
            .prefix("stickerbatch-video-")
            .tempdir()?;
        let dir = workdir.path();

        let sticker_path = dir.join("sticker.png");
        let sticker_png = request.sticker.to_png().map_err(|source| VideoError::Stage {
            name: request.sticker.name().to_string(),
            source,
        })?;
        std::fs::write(&sticker_path, sticker_png)?;

        let videos: Vec<&SourceFile> = request.files.iter().filter(|f| f.is_video()).collect();

        let mut staged_videos = Vec::with_capacity(videos.len());
        for (index, video) in videos.iter().enumerate() {
            ensure_listening(reply)?;
            let path = dir.join(format!("source_{index}.{}", extension_of(video.name(), "mp4")));
            std::fs::write(&path, video.content())?;
            let probe = self.probe(&path).ok_or_else(|| VideoError::Probe {
                file: video.name().to_string(),
            })?;
            staged_videos.push((*video, path, probe));
        }

        let still_secs = self.config.still_secs.max(0.1);
        let video_secs: f64 = staged_videos.iter().map(|(_, _, p)| p.duration_secs).sum();
        let reel_secs = request.archive.len() as f64 * still_secs + video_secs;
        let total_secs = video_secs + reel_secs;
        let mut done_secs = 0.0;

        tracing::info!(
            videos = staged_videos.len(),
            stills = request.archive.len(),
            expected_secs = total_secs,
            "Video worker started"
        );

        let mut clips = Vec::with_capacity(staged_videos.len());
        let mut clip_paths = Vec::with_capacity(staged_videos.len());
        for (index, (source, path, probe)) in staged_videos.iter().enumerate() {
            let out_path = dir.join(format!("clip_{index}.{}", extension_of(source.name(), "mp4")));
            let rect = request.placement.resolve(probe.width, probe.height);
            let args = overlay_args(path, &sticker_path, &out_path, rect.pixel_side(), rect.pixel_origin());

            let clip_secs = probe.duration_secs;
            let base_secs = done_secs;
            self.run_ffmpeg(&args, reply, &|secs: f64| {
                percent(base_secs + secs.min(clip_secs), total_secs)
            })?;
            done_secs += probe.duration_secs;
            reply.progress(percent(done_secs, total_secs));

            let bytes = std::fs::read(&out_path)?;
            tracing::debug!(clip = %source.name(), bytes = bytes.len(), "Stickered video source");
            clips.push(ProcessedOutput::new(source.name(), bytes));
            clip_paths.push(out_path);
        }

        let mut still_paths = Vec::with_capacity(request.archive.len());
        for (index, still) in request.archive.iter().enumerate() {
            still_paths.push(stage_still(dir, index, still)?);
        }

        if still_paths.is_empty() && clip_paths.is_empty() {
            return Err(VideoError::NothingToCompose);
        }

        ensure_listening(reply)?;
        let reel_path = dir.join(CANONICAL_VIDEO_NAME);
        let args = reel_args(&still_paths, &clip_paths, &self.config, &reel_path);
        let base_secs = done_secs;
        self.run_ffmpeg(&args, reply, &|secs: f64| {
            percent(base_secs + secs.min(reel_secs), total_secs)
        })?;
        reply.progress(100.0);

        let video = std::fs::read(&reel_path)?;
        tracing::info!(bytes = video.len(), clips = clips.len(), "Video reel composed");
        Ok((video.into(), clips))
    }

    /// Run ffmpeg to completion, turning each `-progress` block into a
    /// progress report through `to_percent`. The child is killed if the
    /// reply closes while it runs.
    fn run_ffmpeg(
        &self,
        args: &[String],
        reply: &mut WorkerReply,
        to_percent: &dyn Fn(f64) -> f64,
    ) -> Result<(), VideoError> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VideoError::MissingBinary {
                binary: self.config.ffmpeg_path.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let child = Mutex::new(child);
        let finished = AtomicBool::new(false);
        let abandoned = AtomicBool::new(false);
        let listener = reply.listener();

        let read_result = std::thread::scope(|scope| {
            scope.spawn(|| {
                while !finished.load(Ordering::Acquire) {
                    if listener.is_closed() {
                        abandoned.store(true, Ordering::Release);
                        let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Err(e) = child.kill() {
                            tracing::warn!(error = %e, "Failed to kill ffmpeg");
                        }
                        break;
                    }
                    std::thread::sleep(LISTENER_CHECK_INTERVAL);
                }
            });

            let result = read_progress(stdout, reply, to_percent);
            finished.store(true, Ordering::Release);
            result
        });

        // Stdout is closed, so the child has exited or is about to.
        let status = child
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .wait()?;
        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if abandoned.load(Ordering::Acquire) {
            tracing::info!("ffmpeg killed, nobody is waiting for the result");
            return Err(VideoError::Abandoned);
        }
        read_result?;

        if !status.success() {
            return Err(VideoError::Ffmpeg {
                status: status.to_string(),
                stderr: stderr_output.trim().to_string(),
            });
        }
        Ok(())
    }

    fn probe(&self, path: &Path) -> Option<VideoProbe> {
        let dims = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=p=0:s=x",
            ])
            .arg(path)
            .output()
            .ok()?;
        if !dims.status.success() {
            return None;
        }
        let (width, height) = parse_dimensions(&String::from_utf8(dims.stdout).ok()?)?;

        let duration_secs = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| String::from_utf8(out.stdout).ok())
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or(0.0);

        Some(VideoProbe {
            width,
            height,
            duration_secs,
        })
    }
}

impl VideoWorker for FfmpegVideoWorker {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn run(&self, request: VideoRequest, mut reply: WorkerReply) {
        let started = std::time::Instant::now();
        match self.render(request, &mut reply) {
            Ok((video, clips)) => {
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Video worker finished"
                );
                reply.complete(video, clips);
            }
            Err(VideoError::Abandoned) => {
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Video worker stopped early"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video worker failed");
                reply.fail(e.to_string());
            }
        }
    }
}

/// Read ffmpeg's `-progress pipe:1` output until it closes.
fn read_progress(
    stdout: impl Read,
    reply: &mut WorkerReply,
    to_percent: &dyn Fn(f64) -> f64,
) -> std::io::Result<()> {
    let mut state = ProgressState::default();
    for line in BufReader::new(stdout).lines() {
        let line = line?;
        if let Some((key, value)) = line.trim().split_once('=') {
            state.update(key, value);
            if key == "progress" {
                reply.progress(to_percent(state.out_time_secs));
                if state.complete {
                    tracing::debug!(out_time_secs = state.out_time_secs, "ffmpeg reported end of stream");
                }
            }
        }
    }
    Ok(())
}

fn ensure_listening(reply: &WorkerReply) -> Result<(), VideoError> {
    if reply.is_closed() {
        return Err(VideoError::Abandoned);
    }
    Ok(())
}

fn binary_runs(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn percent(done: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        (done / total * 100.0).clamp(0.0, 100.0)
    }
}

fn extension_of<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(fallback)
}

fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let line = raw.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Write a composited image where ffmpeg's image demuxer can loop it.
/// PNG and JPEG go through untouched; anything else is converted to PNG.
fn stage_still(dir: &Path, index: usize, still: &ProcessedOutput) -> Result<PathBuf, VideoError> {
    let stage_err = |source| VideoError::Stage {
        name: still.name.clone(),
        source,
    };
    match image::guess_format(&still.blob) {
        Ok(ImageFormat::Png) => {
            let path = dir.join(format!("still_{index}.png"));
            std::fs::write(&path, &still.blob)?;
            Ok(path)
        }
        Ok(ImageFormat::Jpeg) => {
            let path = dir.join(format!("still_{index}.jpg"));
            std::fs::write(&path, &still.blob)?;
            Ok(path)
        }
        _ => {
            let path = dir.join(format!("still_{index}.png"));
            let decoded = image::load_from_memory(&still.blob).map_err(stage_err)?;
            decoded
                .save_with_format(&path, ImageFormat::Png)
                .map_err(stage_err)?;
            Ok(path)
        }
    }
}

fn progress_flags() -> Vec<String> {
    [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Args to overlay the sticker onto one video, keeping its container.
fn overlay_args(
    input: &Path,
    sticker: &Path,
    output: &Path,
    side: u32,
    (x, y): (i64, i64),
) -> Vec<String> {
    let mut args = progress_flags();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-i".to_string(),
        sticker.display().to_string(),
        "-filter_complex".to_string(),
        format!(
            "[1:v]scale={side}:{side}[stk];[0:v][stk]overlay={x}:{y}:format=auto,pad=ceil(iw/2)*2:ceil(ih/2)*2[out]"
        ),
        "-map".to_string(),
        "[out]".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
    ]);
    args.extend(codec_args_for_extension(extension_of(
        &output.display().to_string(),
        "mp4",
    )));
    args.push(output.display().to_string());
    args
}

/// Args to concatenate stills and clips into the canonical reel.
fn reel_args(stills: &[PathBuf], clips: &[PathBuf], config: &VideoConfig, output: &Path) -> Vec<String> {
    let width = even(config.width);
    let height = even(config.height);
    let fps = config.fps.max(1);
    let still_secs = config.still_secs.max(0.1);

    let mut args = progress_flags();
    for still in stills {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            fps.to_string(),
            "-t".to_string(),
            format!("{still_secs:.3}"),
            "-i".to_string(),
            still.display().to_string(),
        ]);
    }
    for clip in clips {
        args.extend(["-i".to_string(), clip.display().to_string()]);
    }

    let inputs = stills.len() + clips.len();
    let mut graph = String::new();
    for index in 0..inputs {
        graph.push_str(&format!(
            "[{index}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{index}];"
        ));
    }
    for index in 0..inputs {
        graph.push_str(&format!("[v{index}]"));
    }
    graph.push_str(&format!("concat=n={inputs}:v=1:a=0[out]"));

    args.extend([
        "-filter_complex".to_string(),
        graph,
        "-map".to_string(),
        "[out]".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]);
    args
}

fn codec_args_for_extension(ext: &str) -> Vec<String> {
    let args: &[&str] = match ext.to_ascii_lowercase().as_str() {
        "webm" => &[
            "-c:v",
            "libvpx-vp9",
            "-b:v",
            "0",
            "-crf",
            "32",
            "-c:a",
            "libopus",
        ],
        "mp4" | "m4v" | "mov" => &[
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "20",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-movflags",
            "+faststart",
        ],
        _ => &[
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "20",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
        ],
    };
    args.iter().map(|s| s.to_string()).collect()
}

fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}
