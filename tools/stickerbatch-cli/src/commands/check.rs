//! Check ffmpeg availability and configuration.

use stickerbatch_common::{config_file_path, preferences_file_path, AppConfig};
use stickerbatch_render_engine::FfmpegVideoWorker;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Stickerbatch System Check");
    println!("{}", "=".repeat(50));

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[OK] Config: defaults ({} not found)", config_path.display());
    }
    println!("     Preferences: {}", preferences_file_path().display());

    println!(
        "     Batch size: {}, image progress share: {:.0}%",
        config.pipeline.effective_batch_size(),
        config.pipeline.effective_image_share() * 100.0
    );
    println!(
        "     Archive: {} ({:?})",
        config.archive.file_name, config.archive.compression
    );

    let worker = FfmpegVideoWorker::new(config.video.clone());
    let ready = worker.is_available();
    if ready {
        println!(
            "[OK] ffmpeg: {} / ffprobe: {}",
            config.video.ffmpeg_path, config.video.ffprobe_path
        );
        println!(
            "     Video: {}x{} @ {} fps, {}s per image",
            config.video.width, config.video.height, config.video.fps, config.video.still_secs
        );
    } else {
        println!(
            "[FAIL] ffmpeg/ffprobe not runnable ({} / {})",
            config.video.ffmpeg_path, config.video.ffprobe_path
        );
    }

    println!();
    if ready {
        println!("Stickerbatch is ready.");
    } else {
        println!("Runs will fail in the video phase until ffmpeg is installed.");
    }

    Ok(())
}
