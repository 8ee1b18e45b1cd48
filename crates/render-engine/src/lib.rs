//! Stickerbatch Render Engine
//!
//! The pixel-level stages of the pipeline:
//!
//! ```text
//! sticker.png ──▶ Sticker Loader ──▶ StickerImage (shared, read-only)
//!                                         │
//! photo.jpg ─────▶ Image Compositor ◀─────┤
//!                        │                │
//!                        ▼                │
//!                  photo.jpg (stickered)  │
//!                                         │
//! clip.mov ──────▶ Video Worker ◀─────────┘
//!                        │
//!                        ▼
//!              clip.mov (stickered) + video.mp4 (reel)
//! ```

pub mod compositor;
pub mod error;
pub mod sticker;
pub mod video;

pub use compositor::{Composer, ImageCompositor};
pub use error::*;
pub use sticker::{StickerImage, StickerRef};
pub use video::{FfmpegVideoWorker, VideoRequest, VideoWorker, WorkerMessage, WorkerReply};
