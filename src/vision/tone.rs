//! Tone transform: luma, optional binarization, optional polarity flip
//!
//! Which combination is right depends entirely on how the paired model was
//! trained. A model trained on white-on-black digits fed black-on-white ink
//! still produces confident-looking garbage.

use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

use super::bounds::luma;

/// Tone settings taken from the pipeline bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneSettings {
    /// Binarization cutoff; 0 disables binarization
    pub threshold: u8,
    /// Flip to light ink on a dark background
    pub invert: bool,
}

impl ToneSettings {
    /// Intensity that white paper maps to
    pub fn background_intensity(&self) -> u8 {
        if self.invert {
            0
        } else {
            255
        }
    }
}

/// Convert an RGB canvas to single-channel intensity
pub fn apply_tone(image: &RgbImage, settings: ToneSettings) -> GrayImage {
    debug!(
        "Tone transform: threshold={}, invert={}",
        settings.threshold, settings.invert
    );

    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let mut value = luma(pixel);
        if settings.threshold > 0 {
            value = if value >= settings.threshold as f64 { 255.0 } else { 0.0 };
        }
        if settings.invert {
            value = 255.0 - value;
        }
        gray.put_pixel(x, y, Luma([to_byte(value)]));
    }

    gray
}

/// Store a float intensity the way a clamped byte array does
fn to_byte(value: f64) -> u8 {
    value.round_ties_even().clamp(0.0, 255.0) as u8
}
