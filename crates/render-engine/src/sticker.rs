//! Sticker loading.
//!
//! A sticker must be fully decoded (dimensions known, pixels readable)
//! before any compositing starts. The decoded raster is read-only and shared
//! by every compositing task of a run.

use std::path::{Path, PathBuf};

use image::RgbaImage;
use stickerbatch_media_model::Blob;

use crate::compositor::guessed_reader;
use crate::error::DecodeError;

/// Where the sticker's pixel data comes from.
#[derive(Debug, Clone)]
pub enum StickerRef {
    /// A file on disk.
    Path(PathBuf),
    /// Bytes already held in memory, with a name used for format hints.
    Bytes { name: String, content: Blob },
}

impl StickerRef {
    /// Parse a user-supplied reference: a plain path or a `file://` URL.
    pub fn parse(reference: &str) -> Self {
        let path = reference.strip_prefix("file://").unwrap_or(reference);
        Self::Path(PathBuf::from(path))
    }

    /// Human-readable form for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { name, .. } => name.clone(),
        }
    }
}

/// A decoded sticker, ready to draw.
#[derive(Debug, Clone)]
pub struct StickerImage {
    name: String,
    pixels: RgbaImage,
}

impl StickerImage {
    /// Decode raw bytes. `name` only serves as a format hint and label.
    pub fn decode(name: impl Into<String>, bytes: &[u8]) -> Result<Self, DecodeError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(DecodeError::Empty { reference: name });
        }

        let reader = guessed_reader(bytes, &name).map_err(|source| DecodeError::Unreadable {
            reference: name.clone(),
            source,
        })?;
        let image = reader.decode().map_err(|source| DecodeError::Unsupported {
            reference: name.clone(),
            source,
        })?;

        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::ZeroSized { reference: name });
        }

        Ok(Self {
            name,
            pixels: image.to_rgba8(),
        })
    }

    pub fn from_rgba(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            name: name.into(),
            pixels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// PNG encoding of the sticker, for consumers that need it as a file.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.pixels.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Load and fully decode a sticker.
///
/// File reads go through tokio; decoding runs on the blocking pool.
pub async fn load(reference: &StickerRef) -> Result<StickerImage, DecodeError> {
    let label = reference.describe();
    tracing::debug!(sticker = %label, "Loading sticker");

    let (name, bytes): (String, Blob) = match reference {
        StickerRef::Path(path) => {
            if is_remote(path) {
                return Err(DecodeError::Unreadable {
                    reference: label,
                    source: std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "remote sticker references are not supported",
                    ),
                });
            }
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| DecodeError::Unreadable {
                    reference: label.clone(),
                    source,
                })?;
            (label.clone(), bytes.into())
        }
        StickerRef::Bytes { name, content } => (name.clone(), content.clone()),
    };

    let sticker = tokio::task::spawn_blocking(move || StickerImage::decode(name, &bytes))
        .await
        .map_err(|_| DecodeError::Interrupted {
            reference: label.clone(),
        })??;

    tracing::info!(
        sticker = %label,
        width = sticker.width(),
        height = sticker.height(),
        "Sticker decoded"
    );
    Ok(sticker)
}

fn is_remote(path: &Path) -> bool {
    path.to_str()
        .map(|s| s.starts_with("http://") || s.starts_with("https://"))
        .unwrap_or(false)
}
