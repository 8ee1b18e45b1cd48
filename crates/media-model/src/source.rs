//! Source files and processed outputs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stickerbatch_common::error::{StickerError, StickerResult};

/// Immutable, cheaply clonable binary content.
pub type Blob = Arc<[u8]>;

/// Archive name of the composed video.
pub const CANONICAL_VIDEO_NAME: &str = "video.mp4";

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "tga", "qoi", "ico", "pnm", "ppm",
    "pgm", "pbm",
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi"];

/// Declared kind of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Infer the kind from a file name's extension (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// One caller-supplied file. Never modified once accepted into a run.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    kind: MediaKind,
    content: Blob,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, kind: MediaKind, content: impl Into<Blob>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
        }
    }

    /// Read a file from disk, inferring its kind from the extension.
    pub fn from_path(path: &Path) -> StickerResult<Self> {
        if !path.exists() {
            return Err(StickerError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StickerError::input(format!("Invalid file name: {}", path.display())))?
            .to_string();

        let kind = MediaKind::from_name(&name).ok_or_else(|| {
            StickerError::unsupported(format!("Unrecognized media type: {name}"))
        })?;

        let content = std::fs::read(path)?;
        Ok(Self::new(name, kind, content))
    }

    /// Original file name; images keep it in the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn content(&self) -> &Blob {
        &self.content
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bytes", &self.content.len())
            .finish()
    }
}

/// A named blob produced by a stage and consumed once by the archive.
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessedOutput {
    pub name: String,
    pub blob: Blob,
}

impl ProcessedOutput {
    pub fn new(name: impl Into<String>, blob: impl Into<Blob>) -> Self {
        Self {
            name: name.into(),
            blob: blob.into(),
        }
    }
}

impl fmt::Debug for ProcessedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedOutput")
            .field("name", &self.name)
            .field("bytes", &self.blob.len())
            .finish()
    }
}
