//! Error types shared across Stickerbatch crates.

use std::path::PathBuf;

/// Top-level error type for Stickerbatch operations that are not tied to a
/// single pipeline stage (configuration, preferences, file handling).
#[derive(Debug, thiserror::Error)]
pub enum StickerError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Preference store error: {message}")]
    Preferences { message: String },

    #[error("Input error: {message}")]
    Input { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StickerError.
pub type StickerResult<T> = Result<T, StickerError>;

impl StickerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn preferences(msg: impl Into<String>) -> Self {
        Self::Preferences {
            message: msg.into(),
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
