//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image-phase scheduling.
    pub pipeline: PipelineConfig,

    /// Video offload settings.
    pub video: VideoConfig,

    /// Output archive settings.
    pub archive: ArchiveConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Scheduling parameters for the image phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Files composited concurrently per batch. Batches run one after another,
    /// so this bounds peak memory.
    pub batch_size: usize,

    /// Fraction of overall progress reserved for the image phase; the rest
    /// belongs to the video phase.
    pub image_progress_share: f64,
}

/// Parameters for the ffmpeg-backed video worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// ffmpeg binary name or path.
    pub ffmpeg_path: String,

    /// ffprobe binary name or path.
    pub ffprobe_path: String,

    /// Output width of the composed video.
    pub width: u32,

    /// Output height of the composed video.
    pub height: u32,

    /// Output frame rate of the composed video.
    pub fps: u32,

    /// How long each composited image is shown in the composed video.
    pub still_secs: f64,

    /// Fail the run when the worker stays silent this long (0 = wait forever).
    pub stall_timeout_secs: u64,
}

/// Archive compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    /// Store entries as-is. Media is already compressed.
    #[default]
    Stored,
    /// Deflate every entry.
    Deflated,
}

/// Output archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// File name offered for download.
    pub file_name: String,

    /// Compression applied to entries.
    pub compression: ArchiveCompression,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "stickerbatch=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            image_progress_share: 0.8,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            still_secs: 2.0,
            stall_timeout_secs: 120,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            file_name: "stickers.zip".to_string(),
            compression: ArchiveCompression::Stored,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl PipelineConfig {
    /// Batch size with the zero case lifted to one.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Image share clamped to `[0.0, 1.0]`.
    pub fn effective_image_share(&self) -> f64 {
        if self.image_progress_share.is_finite() {
            self.image_progress_share.clamp(0.0, 1.0)
        } else {
            PipelineConfig::default().image_progress_share
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stickerbatch").join("config.json")
}

/// Standard location of the front end's preference file.
pub fn preferences_file_path() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("stickerbatch").join("preferences.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"pipeline":{"batch_size":4},"archive":{"compression":"deflated"}}"#)
                .unwrap();
        assert_eq!(config.pipeline.batch_size, 4);
        assert!((config.pipeline.image_progress_share - 0.8).abs() < 1e-9);
        assert_eq!(config.archive.compression, ArchiveCompression::Deflated);
        assert_eq!(config.archive.file_name, "stickers.zip");
        assert_eq!(config.video.fps, 30);
    }

    #[test]
    fn test_effective_values_are_sanitized() {
        let config = PipelineConfig {
            batch_size: 0,
            image_progress_share: 3.0,
        };
        assert_eq!(config.effective_batch_size(), 1);
        assert_eq!(config.effective_image_share(), 1.0);

        let nan = PipelineConfig {
            batch_size: 2,
            image_progress_share: f64::NAN,
        };
        assert!((nan.effective_image_share() - 0.8).abs() < 1e-9);
    }
}
