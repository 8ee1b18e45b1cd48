//! Apply a sticker to a batch of files.

use std::io::Write;
use std::path::PathBuf;

use stickerbatch_common::{preferences_file_path, AppConfig, JsonFileStore, PreferenceStore};
use stickerbatch_media_model::{SourceFile, StickerPlacement};
use stickerbatch_pipeline::{Notification, Pipeline, PipelineEvent, RunRequest};
use stickerbatch_render_engine::StickerRef;

pub struct ApplyArgs {
    pub files: Vec<PathBuf>,
    pub sticker: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub size: Option<f64>,
    pub output: PathBuf,
    pub batch_size: Option<usize>,
    pub retries: u32,
}

pub async fn run(mut config: AppConfig, args: ApplyArgs) -> anyhow::Result<()> {
    let mut store = JsonFileStore::open(preferences_file_path())?;
    let placement = resolve_placement(&mut store, args.x, args.y, args.size)?;

    println!(
        "Sticker {} at ({:.0}%, {:.0}%), size {:.0}%",
        args.sticker, placement.position.x, placement.position.y, placement.size
    );
    if placement.is_near_edge() {
        println!("[WARN] The sticker is close to the edge and may not be visible");
    }

    let files = args
        .files
        .iter()
        .map(|path| SourceFile::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;
    let videos = files.iter().filter(|f| f.is_video()).count();
    println!(
        "  {} file(s): {} image(s), {videos} video(s)",
        files.len(),
        files.len() - videos
    );

    if let Some(batch_size) = args.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    let mut pipeline = Pipeline::with_ffmpeg(&config);
    pipeline.on_event(Box::new(print_event));

    let request = RunRequest::new(files, StickerRef::parse(&args.sticker), placement);
    let mut outcome = pipeline.start(request).await;
    let mut attempt = 0;

    loop {
        match outcome {
            Ok(Some(archive)) => {
                let path = archive.save_into(&args.output)?;
                println!(
                    "Archive written: {} ({} entries)",
                    path.display(),
                    archive.entries.len()
                );
                return Ok(());
            }
            Ok(None) => {
                anyhow::bail!("Nothing to do: a sticker and at least one file are required");
            }
            Err(e) if attempt < args.retries => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "Run failed, retrying");
                println!("Retrying ({attempt}/{})...", args.retries);
                outcome = pipeline.retry().await;
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("Sticker run failed"));
            }
        }
    }
}

fn print_event(event: PipelineEvent) {
    match event {
        PipelineEvent::Progress(value) => {
            print!("\r  Progress: {value:5.1}%  ");
            let _ = std::io::stdout().flush();
        }
        PipelineEvent::Notification(Notification::Success { message, .. }) => {
            println!("\n{message}");
        }
        PipelineEvent::Notification(Notification::Error { message, retryable }) => {
            if retryable {
                println!("\n{message} (retry with --retries)");
            } else {
                println!("\n{message}");
            }
        }
        PipelineEvent::StateChanged(state) => {
            tracing::debug!(?state, "Pipeline state");
        }
    }
}

/// Placement from the flags, falling back to the saved one per field.
///
/// Explicit values are clamped and saved for next time.
fn resolve_placement(
    store: &mut dyn PreferenceStore,
    x: Option<f64>,
    y: Option<f64>,
    size: Option<f64>,
) -> anyhow::Result<StickerPlacement> {
    let saved = StickerPlacement::restore(store);
    if x.is_none() && y.is_none() && size.is_none() {
        return Ok(saved.clamped());
    }

    let placement = StickerPlacement::new(
        x.unwrap_or(saved.position.x),
        y.unwrap_or(saved.position.y),
        size.unwrap_or(saved.size),
    )
    .clamped();
    placement.persist(store)?;
    Ok(placement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stickerbatch_common::MemoryStore;

    #[test]
    fn test_defaults_without_flags_or_saved_values() {
        let mut store = MemoryStore::new();
        let placement = resolve_placement(&mut store, None, None, None).unwrap();
        assert_eq!(placement, StickerPlacement::default());
        assert!(store.get("stickerSize").is_none());
    }

    #[test]
    fn test_flags_are_clamped_and_saved() {
        let mut store = MemoryStore::new();
        let placement = resolve_placement(&mut store, Some(120.0), None, Some(0.0)).unwrap();
        assert_eq!(placement, StickerPlacement::new(100.0, 50.0, 1.0));

        let restored = resolve_placement(&mut store, None, None, None).unwrap();
        assert_eq!(restored, placement);
    }

    #[test]
    fn test_partial_flags_keep_saved_fields() {
        let mut store = MemoryStore::new();
        resolve_placement(&mut store, Some(10.0), Some(20.0), Some(30.0)).unwrap();

        let placement = resolve_placement(&mut store, None, Some(80.0), None).unwrap();
        assert_eq!(placement, StickerPlacement::new(10.0, 80.0, 30.0));
    }
}
