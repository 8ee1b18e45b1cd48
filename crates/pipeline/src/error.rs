//! Pipeline errors.

use stickerbatch_render_engine::error::{CompositeError, DecodeError};

/// The video worker did not deliver.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to start video worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Video worker failed: {0}")]
    Failed(String),

    #[error("Video worker sent nothing for {secs}s")]
    Stalled { secs: u64 },

    #[error("Video worker exited without a result")]
    Disconnected,
}

/// Serializing the archive failed.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Failed to add archive entry {name}: {source}")]
    Entry {
        name: String,
        source: zip::result::ZipError,
    },

    #[error("Failed to write archive entry {name}: {source}")]
    Write {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to finish archive: {0}")]
    Finish(#[source] zip::result::ZipError),
}

/// Why `start` did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("no sticker selected")]
    MissingSticker,

    #[error("no files selected")]
    NoFiles,

    #[error("a run already finished; reset first")]
    NotIdle,
}

/// Anything that aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Sticker(#[from] DecodeError),

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Run was cancelled")]
    Cancelled,
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Coarse failure category, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Sticker,
    Composite,
    Worker,
    Archive,
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Sticker(_) => FailureKind::Sticker,
            Self::Composite(_) => FailureKind::Composite,
            Self::Worker(_) => FailureKind::Worker,
            Self::Archive(_) => FailureKind::Archive,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}
