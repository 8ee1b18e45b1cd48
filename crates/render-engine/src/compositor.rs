//! Image compositor: draws the sticker over one source image.
//!
//! The source is decoded, turned upright according to any EXIF orientation
//! tag, and rendered at native resolution onto an RGBA surface; the
//! sticker is scaled into its placement square and alpha-composited on top,
//! and the surface is re-encoded in the source's container format when an
//! encoder for it exists (PNG otherwise).
//!
//! Placement values are trusted to be pre-clamped; only structural validity
//! (non-empty input, positive dimensions) is checked here.

use std::io::Cursor;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use stickerbatch_media_model::{ProcessedOutput, SourceFile, StickerPlacement};

use crate::error::{CompositeCause, CompositeError};
use crate::sticker::StickerImage;

/// Anything that can sticker one image source.
///
/// Called from the blocking pool, possibly for several files at once.
pub trait Composer: Send + Sync + 'static {
    fn compose(
        &self,
        source: &SourceFile,
        sticker: &StickerImage,
        placement: &StickerPlacement,
    ) -> Result<ProcessedOutput, CompositeError>;
}

impl<T: Composer + ?Sized> Composer for Arc<T> {
    fn compose(
        &self,
        source: &SourceFile,
        sticker: &StickerImage,
        placement: &StickerPlacement,
    ) -> Result<ProcessedOutput, CompositeError> {
        (**self).compose(source, sticker, placement)
    }
}

/// Default cap on a single RGBA surface (1 GiB).
pub const DEFAULT_MAX_SURFACE_BYTES: u64 = 1 << 30;

const BYTES_PER_PIXEL: u64 = 4;

/// Stateless compositor. Cheap to clone and share across tasks.
#[derive(Debug, Clone)]
pub struct ImageCompositor {
    max_surface_bytes: u64,
}

impl Default for ImageCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCompositor {
    pub fn new() -> Self {
        Self {
            max_surface_bytes: DEFAULT_MAX_SURFACE_BYTES,
        }
    }

    /// Refuse surfaces larger than `bytes`.
    pub fn with_max_surface_bytes(bytes: u64) -> Self {
        Self {
            max_surface_bytes: bytes,
        }
    }

    /// Composite `sticker` onto `source` and re-encode the result.
    ///
    /// The output keeps the source's name and its dimensions as displayed:
    /// a photo tagged as rotated comes out rotated, with no orientation tag.
    pub fn compose(
        &self,
        source: &SourceFile,
        sticker: &StickerImage,
        placement: &StickerPlacement,
    ) -> Result<ProcessedOutput, CompositeError> {
        let name = source.name();
        let fail = |cause| CompositeError::new(name, cause);

        let bytes = source.content();
        if bytes.is_empty() {
            return Err(fail(CompositeCause::EmptySource));
        }

        let reader = guessed_reader(bytes, name)
            .map_err(|e| fail(CompositeCause::Decode(image::ImageError::IoError(e))))?;
        let source_format = reader.format();
        let mut decoder = reader
            .into_decoder()
            .map_err(|e| fail(CompositeCause::Decode(e)))?;
        let orientation = decoder.orientation().unwrap_or_else(|e| {
            tracing::debug!(file = %name, error = %e, "Ignoring unreadable orientation");
            Orientation::NoTransforms
        });
        let mut decoded =
            DynamicImage::from_decoder(decoder).map_err(|e| fail(CompositeCause::Decode(e)))?;
        decoded.apply_orientation(orientation);

        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(fail(CompositeCause::ZeroDimensions));
        }
        self.check_surface(width, height).map_err(fail)?;

        let mut surface = decoded.to_rgba8();
        drop(decoded);

        let rect = placement.resolve(width, height);
        let side = rect.pixel_side();
        self.check_surface(side, side).map_err(fail)?;
        let (x, y) = rect.pixel_origin();

        let scaled = scale_sticker(sticker.pixels(), side);
        imageops::overlay(&mut surface, &scaled, x, y);

        let output_format = encodable_format(source_format);
        let encoded = encode(surface, output_format).map_err(|e| fail(CompositeCause::Encode(e)))?;

        tracing::debug!(
            file = %name,
            width,
            height,
            sticker_px = side,
            x,
            y,
            format = ?output_format,
            bytes = encoded.len(),
            "Composited image"
        );

        Ok(ProcessedOutput::new(name, encoded))
    }

    fn check_surface(&self, width: u32, height: u32) -> Result<(), CompositeCause> {
        let needed = (width as u64)
            .checked_mul(height as u64)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL));
        match needed {
            Some(bytes) if bytes <= self.max_surface_bytes => Ok(()),
            _ => Err(CompositeCause::SurfaceAllocation { width, height }),
        }
    }
}

impl Composer for ImageCompositor {
    fn compose(
        &self,
        source: &SourceFile,
        sticker: &StickerImage,
        placement: &StickerPlacement,
    ) -> Result<ProcessedOutput, CompositeError> {
        ImageCompositor::compose(self, source, sticker, placement)
    }
}

/// Reader with the format sniffed from magic bytes, falling back to the
/// file extension for formats without a signature (e.g. TGA).
pub(crate) fn guessed_reader<'a>(
    bytes: &'a [u8],
    name: &str,
) -> std::io::Result<ImageReader<Cursor<&'a [u8]>>> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        if let Ok(format) = ImageFormat::from_path(name) {
            reader.set_format(format);
        }
    }
    Ok(reader)
}

fn scale_sticker(sticker: &RgbaImage, side: u32) -> RgbaImage {
    if sticker.width() == side && sticker.height() == side {
        return sticker.clone();
    }
    imageops::resize(sticker, side, side, FilterType::Lanczos3)
}

/// The source's own format when we can write it, PNG otherwise.
fn encodable_format(source: Option<ImageFormat>) -> ImageFormat {
    match source {
        Some(
            format @ (ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::Bmp
            | ImageFormat::Tiff
            | ImageFormat::WebP
            | ImageFormat::Tga
            | ImageFormat::Qoi
            | ImageFormat::Ico),
        ) => format,
        _ => ImageFormat::Png,
    }
}

fn encode(surface: RgbaImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        // No alpha channel in JPEG.
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgba8(surface)
                .to_rgb8()
                .write_to(&mut out, format)?;
        }
        _ => surface.write_to(&mut out, format)?,
    }
    Ok(out.into_inner())
}
