//! Frame data structures for captured ink snapshots

use image::{Rgb, RgbImage};
use std::time::Instant;

/// Background color of a fresh drawing surface
pub const PAPER: Rgb<u8> = Rgb([255, 255, 255]);

/// Stroke color used by the drawing surface
pub const INK: Rgb<u8> = Rgb([0, 0, 0]);

/// An immutable snapshot of the drawing surface
///
/// Owns its pixels outright. Nothing that happens to the surface after the
/// snapshot was taken (more strokes, a clear) is visible through it.
#[derive(Debug, Clone)]
pub struct InkFrame {
    image: RgbImage,
    /// Timestamp when the snapshot was captured
    pub captured_at: Instant,
}

impl InkFrame {
    /// Wrap an owned RGB raster as a snapshot
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Get the raster
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

impl From<RgbImage> for InkFrame {
    fn from(image: RgbImage) -> Self {
        Self::new(image)
    }
}
