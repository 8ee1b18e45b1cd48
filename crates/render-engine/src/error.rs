//! Render errors.

/// The sticker could not be turned into a drawable raster.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Failed to read sticker {reference}: {source}")]
    Unreadable {
        reference: String,
        source: std::io::Error,
    },

    #[error("Sticker {reference} is empty")]
    Empty { reference: String },

    #[error("Sticker {reference} is not a decodable raster image: {source}")]
    Unsupported {
        reference: String,
        source: image::ImageError,
    },

    #[error("Sticker {reference} has zero dimensions")]
    ZeroSized { reference: String },

    #[error("Sticker decode for {reference} was interrupted")]
    Interrupted { reference: String },
}

/// Compositing one source file failed. Always names the file.
#[derive(Debug, thiserror::Error)]
#[error("Failed to composite {file}: {cause}")]
pub struct CompositeError {
    pub file: String,
    #[source]
    pub cause: CompositeCause,
}

/// Why compositing failed.
#[derive(Debug, thiserror::Error)]
pub enum CompositeCause {
    #[error("source is empty")]
    EmptySource,

    #[error("decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("source has zero dimensions")]
    ZeroDimensions,

    #[error("cannot allocate a {width}x{height} surface")]
    SurfaceAllocation { width: u32, height: u32 },

    #[error("encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("compositing task was interrupted")]
    Interrupted,
}

impl CompositeError {
    pub fn new(file: impl Into<String>, cause: CompositeCause) -> Self {
        Self {
            file: file.into(),
            cause,
        }
    }
}

impl CompositeCause {
    /// Stable label for logs and retry comparisons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptySource | Self::ZeroDimensions => "invalid-source",
            Self::Decode(_) => "decode",
            Self::SurfaceAllocation { .. } => "surface-allocation",
            Self::Encode(_) => "encode",
            Self::Interrupted => "interrupted",
        }
    }
}

/// The ffmpeg video worker failed.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("Failed to start {binary}: {source}")]
    MissingBinary {
        binary: String,
        source: std::io::Error,
    },

    #[error("ffmpeg failed (status {status}): {stderr}")]
    Ffmpeg { status: String, stderr: String },

    #[error("Failed to probe video {file}")]
    Probe { file: String },

    #[error("Nothing to compose into a video")]
    NothingToCompose,

    #[error("Video result no longer wanted")]
    Abandoned,

    #[error("Failed to stage image {name}: {source}")]
    Stage {
        name: String,
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
