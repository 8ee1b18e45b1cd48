//! Sticker placement.
//!
//! Position is a percentage of the target's width/height; size is a
//! percentage of the target's shorter side. Both are resolved to pixels per
//! target, since every file in a run may have different dimensions.

use serde::{Deserialize, Serialize};
use stickerbatch_common::error::StickerResult;
use stickerbatch_common::preferences::PreferenceStore;

/// Preference key for the last-used position (JSON `{"x":..,"y":..}`).
pub const POSITION_KEY: &str = "stickerPosition";

/// Preference key for the last-used size.
pub const SIZE_KEY: &str = "stickerSize";

/// Smallest size a front end may submit.
pub const MIN_SIZE: f64 = 1.0;

/// Largest size a front end may submit.
pub const MAX_SIZE: f64 = 200.0;

/// Beyond this percentage on either axis the sticker is likely cut off.
pub const EDGE_WARNING_THRESHOLD: f64 = 90.0;

/// Sticker center as percentages of the target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Centered position.
    pub const CENTER: Position = Position { x: 50.0, y: 50.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Where and how large the sticker is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StickerPlacement {
    pub position: Position,

    /// Percentage of the target's shorter side.
    pub size: f64,
}

impl Default for StickerPlacement {
    fn default() -> Self {
        Self {
            position: Position::CENTER,
            size: 100.0,
        }
    }
}

/// A placement resolved against one target, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickerRect {
    pub center_x: f64,
    pub center_y: f64,
    /// Edge length of the square the sticker is drawn into.
    pub side: f64,
}

impl StickerPlacement {
    pub fn new(x: f64, y: f64, size: f64) -> Self {
        Self {
            position: Position::new(x, y),
            size,
        }
    }

    /// Clamp into the range the compositor expects: position to `[0, 100]`,
    /// size to `[MIN_SIZE, MAX_SIZE]`. Non-finite values fall back to the
    /// defaults.
    ///
    /// Front ends call this before handing a placement to the pipeline.
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        let axis = |value: f64, fallback: f64| {
            if value.is_finite() {
                value.clamp(0.0, 100.0)
            } else {
                fallback
            }
        };
        let size = if self.size.is_finite() {
            self.size.clamp(MIN_SIZE, MAX_SIZE)
        } else {
            defaults.size
        };

        Self {
            position: Position {
                x: axis(self.position.x, defaults.position.x),
                y: axis(self.position.y, defaults.position.y),
            },
            size,
        }
    }

    /// Whether a front end should warn that the sticker may not be visible.
    pub fn is_near_edge(&self) -> bool {
        self.position.x > EDGE_WARNING_THRESHOLD || self.position.y > EDGE_WARNING_THRESHOLD
    }

    /// Resolve against a `width` x `height` target.
    pub fn resolve(&self, width: u32, height: u32) -> StickerRect {
        let (w, h) = (width as f64, height as f64);
        StickerRect {
            center_x: self.position.x / 100.0 * w,
            center_y: self.position.y / 100.0 * h,
            side: self.size / 100.0 * w.min(h),
        }
    }

    /// Restore the last-used placement. Missing or unreadable values fall
    /// back to the defaults independently.
    pub fn restore(store: &dyn PreferenceStore) -> Self {
        let defaults = Self::default();

        let position = store
            .get(POSITION_KEY)
            .and_then(|raw| match serde_json::from_str::<Position>(&raw) {
                Ok(position) => Some(position),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Ignoring stored sticker position");
                    None
                }
            })
            .unwrap_or(defaults.position);

        let size = store
            .get(SIZE_KEY)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(defaults.size);

        Self { position, size }
    }

    /// Remember this placement for the next session.
    pub fn persist(&self, store: &mut dyn PreferenceStore) -> StickerResult<()> {
        store.set(POSITION_KEY, &serde_json::to_string(&self.position)?)?;
        store.set(SIZE_KEY, &self.size.to_string())?;
        Ok(())
    }
}

impl StickerRect {
    /// Sticker edge in whole pixels; never zero.
    pub fn pixel_side(&self) -> u32 {
        self.side.round().max(1.0) as u32
    }

    /// Top-left corner in whole pixels. May be negative or past the far edge,
    /// in which case the sticker is cropped.
    pub fn pixel_origin(&self) -> (i64, i64) {
        let half = self.pixel_side() as f64 / 2.0;
        (
            (self.center_x - half).round() as i64,
            (self.center_y - half).round() as i64,
        )
    }
}
