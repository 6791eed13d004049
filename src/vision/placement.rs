//! Crop, rescale and center ink on the model canvas
//!
//! Mirrors the MNIST convention: the ink's longer side is scaled to a fixed
//! size smaller than the canvas, leaving a margin the model was trained with.

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use super::bounds::BoundingBox;
use super::round_half_up;
use crate::surface::PAPER;

/// Result of placing ink on the canvas
#[derive(Debug, Clone)]
pub struct Placement {
    /// Canvas of exactly `canvas_size` x `canvas_size`
    pub canvas: RgbImage,
    /// Size of the rescaled crop (width, height)
    pub resized: (u32, u32),
    /// Top-left of the crop on the canvas
    pub offset: (u32, u32),
}

/// Scale factor and rescaled dimensions for a box
pub fn scaled_dimensions(bounds: &BoundingBox, target_ink_size: u32) -> (f64, u32, u32) {
    let w = bounds.width.max(1) as f64;
    let h = bounds.height.max(1) as f64;
    let target = target_ink_size as f64;

    let scale = (target / w).min(target / h);
    let new_w = (round_half_up(w * scale) as u32).max(1);
    let new_h = (round_half_up(h * scale) as u32).max(1);
    (scale, new_w, new_h)
}

/// Crop `bounds` out of `image`, rescale it and center it on a white canvas
pub fn scale_and_place(
    image: &RgbImage,
    bounds: &BoundingBox,
    target_ink_size: u32,
    canvas_size: u32,
) -> Placement {
    let mut canvas = RgbImage::from_pixel(canvas_size, canvas_size, PAPER);

    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return Placement {
            canvas,
            resized: (0, 0),
            offset: (0, 0),
        };
    }

    // Keep the crop inside the raster
    let x = bounds.x.min(img_w - 1);
    let y = bounds.y.min(img_h - 1);
    let crop_w = bounds.width.clamp(1, img_w - x);
    let crop_h = bounds.height.clamp(1, img_h - y);
    let crop = imageops::crop_imm(image, x, y, crop_w, crop_h).to_image();

    let (scale, new_w, new_h) = scaled_dimensions(
        &BoundingBox {
            x,
            y,
            width: crop_w,
            height: crop_h,
        },
        target_ink_size,
    );
    let new_w = new_w.min(canvas_size);
    let new_h = new_h.min(canvas_size);

    // Triangle is bilinear; it averages over the footprint when shrinking
    let resized = imageops::resize(&crop, new_w, new_h, FilterType::Triangle);

    let dx = (canvas_size - new_w) / 2;
    let dy = (canvas_size - new_h) / 2;
    imageops::replace(&mut canvas, &resized, dx as i64, dy as i64);

    debug!(
        "Placed {}x{} crop at scale {:.3} as {}x{} at ({}, {})",
        crop_w, crop_h, scale, new_w, new_h, dx, dy
    );

    Placement {
        canvas,
        resized: (new_w, new_h),
        offset: (dx, dy),
    }
}
